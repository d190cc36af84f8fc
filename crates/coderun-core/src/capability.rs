//! Deployment and toolchain capability detection
//!
//! Serverless hosts cannot spawn compiler processes, and a regular host may
//! simply lack a toolchain. The orchestrator asks a [`CapabilitySource`]
//! before doing any filesystem or process work for a compiled language. The
//! live [`CapabilityDetector`] re-checks on every call; a fixed
//! [`CapabilitySnapshot`] can be injected instead.

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::time::Duration;

use crate::config::{CoderunConfig, ExecutionStrategy};
use crate::core_types::Language;
use crate::errors::ExecutionError;
use crate::executors::process::ProcessSpec;
use crate::executors::toolchains::{CppToolchain, JavaToolchain, Toolchain};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Support {
    Available,
    Unavailable { reason: String },
}

impl Support {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Support::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Support::Available)
    }

    fn and(self, other: Support) -> Support {
        match self {
            Support::Available => other,
            unavailable => unavailable,
        }
    }
}

#[async_trait]
pub trait CapabilitySource: Send + Sync {
    /// Whether this deployment may spawn processes at all. No process work.
    fn environment(&self) -> Support;

    /// Whether the local toolchain for `language` is usable.
    async fn toolchain(&self, language: Language) -> Support;

    async fn supports(&self, language: Language) -> bool {
        self.environment()
            .and(self.toolchain(language).await)
            .is_available()
    }
}

/// Fixed description of what a host permits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilitySnapshot {
    pub environment: Support,
    pub toolchains: BTreeMap<String, Support>,
}

impl CapabilitySnapshot {
    /// Everything available.
    pub fn permissive() -> Self {
        Self {
            environment: Support::Available,
            toolchains: BTreeMap::new(),
        }
    }

    /// A host where no process may be spawned.
    pub fn restricted(reason: impl Into<String>) -> Self {
        Self {
            environment: Support::unavailable(reason),
            toolchains: BTreeMap::new(),
        }
    }

    pub fn with_toolchain(mut self, language: Language, support: Support) -> Self {
        self.toolchains.insert(language.id().to_string(), support);
        self
    }
}

#[async_trait]
impl CapabilitySource for CapabilitySnapshot {
    fn environment(&self) -> Support {
        self.environment.clone()
    }

    async fn toolchain(&self, language: Language) -> Support {
        self.toolchains
            .get(language.id())
            .cloned()
            .unwrap_or(Support::Available)
    }
}

/// Live detector: reads deployment markers and probes toolchains on demand.
pub struct CapabilityDetector {
    markers: Vec<String>,
    allow_process_spawning: bool,
    probe_timeout: Duration,
    env_passthrough: Vec<String>,
    probes: HashMap<Language, Vec<ProcessSpec>>,
    environment_override: Option<HashMap<String, String>>,
}

impl CapabilityDetector {
    pub fn new(markers: Vec<String>, probe_timeout: Duration) -> Self {
        Self {
            markers,
            allow_process_spawning: true,
            probe_timeout,
            env_passthrough: vec!["PATH".to_string()],
            probes: HashMap::new(),
            environment_override: None,
        }
    }

    /// Detector with probes for every compiled language configured to run locally.
    pub fn from_config(config: &CoderunConfig) -> Result<Self, ExecutionError> {
        let mut detector = Self::new(
            config.capability.restricted_markers.clone(),
            Duration::from_millis(config.capability.probe_timeout_ms),
        );
        detector.allow_process_spawning = config.capability.allow_process_spawning;
        detector.env_passthrough = config.execution.env_passthrough.clone();

        if config.toolchains.java.strategy == ExecutionStrategy::Local {
            detector =
                detector.with_toolchain(&JavaToolchain::new(config.toolchains.java.clone())?);
        }
        if config.toolchains.cpp.strategy == ExecutionStrategy::Local {
            detector = detector.with_toolchain(&CppToolchain::new(config.toolchains.cpp.clone()));
        }
        Ok(detector)
    }

    pub fn with_toolchain(self, toolchain: &dyn Toolchain) -> Self {
        self.with_probes(toolchain.language(), toolchain.probes())
    }

    pub fn with_probes(mut self, language: Language, probes: Vec<ProcessSpec>) -> Self {
        self.probes.insert(language, probes);
        self
    }

    pub fn with_process_spawning(mut self, allowed: bool) -> Self {
        self.allow_process_spawning = allowed;
        self
    }

    /// Use a fixed set of variables instead of the process environment.
    pub fn with_environment(mut self, vars: HashMap<String, String>) -> Self {
        self.environment_override = Some(vars);
        self
    }

    fn environment_vars(&self) -> HashMap<String, String> {
        match &self.environment_override {
            Some(vars) => vars.clone(),
            None => env::vars().collect(),
        }
    }

    /// First configured marker present in the environment.
    pub fn restricted_marker(&self) -> Option<String> {
        let vars = self.environment_vars();
        self.markers
            .iter()
            .find(|marker| vars.get(marker.as_str()).is_some_and(|v| !v.is_empty()))
            .cloned()
    }

    async fn probe(&self, spec: &ProcessSpec) -> Result<(), String> {
        let program = spec.program().to_string();
        which::which(&program).map_err(|_| format!("{} not found", program))?;

        let outcome = spec
            .clone()
            .env_passthrough(&self.env_passthrough)
            .run(None, self.probe_timeout)
            .await
            .map_err(|e| format!("{} could not be started: {}", program, e))?;

        if outcome.timed_out {
            return Err(format!(
                "{} did not respond within {:?}",
                program, self.probe_timeout
            ));
        }
        if !outcome.success() {
            return Err(format!(
                "{} exited with status {}",
                program,
                outcome
                    .exit_code
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            ));
        }
        Ok(())
    }

    /// Probe every language concurrently.
    pub async fn snapshot(&self) -> CapabilitySnapshot {
        let environment = self.environment();
        let results = join_all(
            Language::ALL
                .into_iter()
                .map(|language| async move { (language, self.toolchain(language).await) }),
        )
        .await;

        CapabilitySnapshot {
            environment,
            toolchains: results
                .into_iter()
                .map(|(language, support)| (language.id().to_string(), support))
                .collect(),
        }
    }
}

#[async_trait]
impl CapabilitySource for CapabilityDetector {
    fn environment(&self) -> Support {
        if !self.allow_process_spawning {
            return Support::unavailable("process spawning is disabled");
        }
        match self.restricted_marker() {
            Some(marker) => Support::unavailable(format!("{} is set", marker)),
            None => Support::Available,
        }
    }

    async fn toolchain(&self, language: Language) -> Support {
        let Some(probes) = self.probes.get(&language) else {
            return Support::Available;
        };
        if !self.allow_process_spawning {
            return Support::unavailable("process spawning is disabled");
        }

        for spec in probes {
            if let Err(reason) = self.probe(spec).await {
                log::info!(
                    "{} toolchain unavailable: {}",
                    language.display_name(),
                    reason
                );
                return Support::unavailable(reason);
            }
        }
        Support::Available
    }
}
