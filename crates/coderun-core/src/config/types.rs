//! Configuration types for the execution service
//!
//! Every section and field carries a default, so an empty document (or no
//! document at all) yields a working single-host configuration.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::core_types::Language;
use crate::errors::ExecutionError;

/// Root configuration document (`coderun.yaml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoderunConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub execution: ExecutionSettings,
    #[serde(default)]
    pub interpreter: InterpreterSettings,
    #[serde(default)]
    pub toolchains: ToolchainSettings,
    #[serde(default)]
    pub delegation: DelegationSettings,
    #[serde(default)]
    pub capability: CapabilitySettings,
    #[serde(default)]
    pub security: SecuritySettings,
}

/// HTTP surface settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_true")]
    pub enable_cors: bool,
    #[serde(default)]
    pub cors_origins: Option<Vec<String>>,
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    #[serde(default = "default_true")]
    pub enable_logging: bool,
}

/// Limits shared by all executors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// Wall-clock budget for a single evaluation, compile or run step.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Upper bound on concurrent compile-and-run executions.
    #[serde(default = "default_max_concurrent_processes")]
    pub max_concurrent_processes: usize,
    /// Parent directory for scratch workspaces. Defaults to the system temp dir.
    #[serde(default)]
    pub scratch_root: Option<PathBuf>,
    /// Host environment variables forwarded to compilers and programs.
    #[serde(default = "default_env_passthrough")]
    pub env_passthrough: Vec<String>,
}

/// JavaScript engine limits and isolation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpreterSettings {
    #[serde(default = "default_memory_limit_bytes")]
    pub memory_limit_bytes: usize,
    #[serde(default = "default_max_stack_bytes")]
    pub max_stack_bytes: usize,
    #[serde(default = "default_max_timer_delay_ms")]
    pub max_timer_delay_ms: u64,
    /// Extra time the wrapper guard waits past the engine deadline.
    #[serde(default = "default_wrapper_grace_ms")]
    pub wrapper_grace_ms: u64,
    /// Evaluate each submission in a worker process that is killed at the deadline.
    #[serde(default = "default_true")]
    pub isolate: bool,
    /// Worker executable. Resolved next to the running binary, then on `PATH`.
    #[serde(default)]
    pub worker_program: Option<PathBuf>,
    /// Overrunning in-thread evaluations tolerated before new ones are refused.
    #[serde(default = "default_max_stalled_evaluations")]
    pub max_stalled_evaluations: usize,
}

/// Where a compiled language is built and run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    /// Local compiler and runtime processes.
    #[default]
    Local,
    /// Remote compile-and-run service (Judge0).
    Delegated,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolchainSettings {
    #[serde(default)]
    pub java: JavaToolchainSettings,
    #[serde(default)]
    pub cpp: CppToolchainSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JavaToolchainSettings {
    #[serde(default = "default_javac")]
    pub compiler: String,
    #[serde(default = "default_java")]
    pub runtime: String,
    #[serde(default)]
    pub strategy: ExecutionStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CppToolchainSettings {
    #[serde(default = "default_cxx")]
    pub compiler: String,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub strategy: ExecutionStrategy,
}

/// Remote runtimes used for delegated languages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationSettings {
    /// Base URL of the sibling runtime service. Python is unavailable without it.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Path of the execute endpoint; delegated paths are derived from it.
    #[serde(default = "default_execute_path")]
    pub execute_path: String,
    #[serde(default = "default_delegation_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub judge0: Option<Judge0Settings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Judge0Settings {
    #[serde(default = "default_judge0_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_judge0_host")]
    pub host: String,
    /// Resolved from `RAPIDAPI_KEY` when absent.
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Deployment and toolchain detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitySettings {
    /// Environment variables whose presence marks a host that cannot spawn processes.
    #[serde(default = "default_restricted_markers")]
    pub restricted_markers: Vec<String>,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub allow_process_spawning: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecuritySettings {
    /// Additional denylist expressions appended to the built-in rules.
    #[serde(default)]
    pub extra_patterns: Vec<String>,
}

fn default_true() -> bool {
    true
}
fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}
fn default_max_body_size() -> usize {
    1024 * 1024
}
fn default_timeout_ms() -> u64 {
    5000
}
fn default_max_concurrent_processes() -> usize {
    4
}
fn default_env_passthrough() -> Vec<String> {
    ["PATH", "HOME", "LANG", "JAVA_HOME"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_memory_limit_bytes() -> usize {
    64 * 1024 * 1024
}
fn default_max_stack_bytes() -> usize {
    1024 * 1024
}
fn default_max_timer_delay_ms() -> u64 {
    1000
}
fn default_wrapper_grace_ms() -> u64 {
    500
}
fn default_max_stalled_evaluations() -> usize {
    1
}

fn default_javac() -> String {
    "javac".to_string()
}
fn default_java() -> String {
    "java".to_string()
}
fn default_cxx() -> String {
    "g++".to_string()
}
fn default_execute_path() -> String {
    "/api/execute".to_string()
}
fn default_delegation_timeout_ms() -> u64 {
    30_000
}
fn default_judge0_endpoint() -> String {
    "https://judge0-ce.p.rapidapi.com".to_string()
}
fn default_judge0_host() -> String {
    "judge0-ce.p.rapidapi.com".to_string()
}
fn default_restricted_markers() -> Vec<String> {
    [
        "VERCEL",
        "VERCEL_ENV",
        "VERCEL_URL",
        "AWS_LAMBDA_FUNCTION_NAME",
        "NETLIFY",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_probe_timeout_ms() -> u64 {
    3000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            enable_cors: true,
            cors_origins: None,
            max_body_size: default_max_body_size(),
            enable_logging: true,
        }
    }
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_concurrent_processes: default_max_concurrent_processes(),
            scratch_root: None,
            env_passthrough: default_env_passthrough(),
        }
    }
}

impl ExecutionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for InterpreterSettings {
    fn default() -> Self {
        Self {
            memory_limit_bytes: default_memory_limit_bytes(),
            max_stack_bytes: default_max_stack_bytes(),
            max_timer_delay_ms: default_max_timer_delay_ms(),
            wrapper_grace_ms: default_wrapper_grace_ms(),
            isolate: true,
            worker_program: None,
            max_stalled_evaluations: default_max_stalled_evaluations(),
        }
    }
}

impl Default for JavaToolchainSettings {
    fn default() -> Self {
        Self {
            compiler: default_javac(),
            runtime: default_java(),
            strategy: ExecutionStrategy::Local,
        }
    }
}

impl Default for CppToolchainSettings {
    fn default() -> Self {
        Self {
            compiler: default_cxx(),
            flags: Vec::new(),
            strategy: ExecutionStrategy::Local,
        }
    }
}

impl ToolchainSettings {
    /// Strategy configured for a compiled language; `None` for the others.
    pub fn strategy_for(&self, language: Language) -> Option<ExecutionStrategy> {
        match language {
            Language::Java => Some(self.java.strategy),
            Language::Cpp => Some(self.cpp.strategy),
            Language::JavaScript | Language::Python => None,
        }
    }
}

impl Default for DelegationSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            execute_path: default_execute_path(),
            timeout_ms: default_delegation_timeout_ms(),
            judge0: None,
        }
    }
}

impl DelegationSettings {
    /// Full URL of the sibling endpoint serving `language`, if a base URL is set.
    ///
    /// `/api/execute` becomes `/api/python-execute` for Python.
    pub fn endpoint_for(&self, language: Language) -> Option<String> {
        let base = self.base_url.as_deref()?.trim_end_matches('/');
        Some(format!(
            "{}{}",
            base,
            delegated_path(&self.execute_path, language)
        ))
    }
}

/// Derive the sibling path for a delegated language from the execute path.
pub fn delegated_path(execute_path: &str, language: Language) -> String {
    let replacement = format!("/api/{}-execute", language.id());
    if execute_path.contains("/api/execute") {
        execute_path.replacen("/api/execute", &replacement, 1)
    } else {
        format!("{}/{}-execute", execute_path.trim_end_matches('/'), language.id())
    }
}

impl Default for Judge0Settings {
    fn default() -> Self {
        Self {
            endpoint: default_judge0_endpoint(),
            host: default_judge0_host(),
            api_key: None,
        }
    }
}

impl Default for CapabilitySettings {
    fn default() -> Self {
        Self {
            restricted_markers: default_restricted_markers(),
            probe_timeout_ms: default_probe_timeout_ms(),
            allow_process_spawning: true,
        }
    }
}

impl CoderunConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ExecutionError> {
        self.server.bind_addr.parse::<SocketAddr>().map_err(|e| {
            ExecutionError::ConfigError(format!(
                "Invalid bind address '{}': {}",
                self.server.bind_addr, e
            ))
        })?;

        if self.execution.timeout_ms == 0 {
            return Err(ExecutionError::ConfigError(
                "execution.timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.execution.max_concurrent_processes == 0 {
            return Err(ExecutionError::ConfigError(
                "execution.max_concurrent_processes must be greater than 0".to_string(),
            ));
        }

        if self.interpreter.memory_limit_bytes < 1024 * 1024 {
            return Err(ExecutionError::ConfigError(
                "interpreter.memory_limit_bytes must be at least 1 MiB".to_string(),
            ));
        }

        if self.interpreter.max_stalled_evaluations == 0 {
            return Err(ExecutionError::ConfigError(
                "interpreter.max_stalled_evaluations must be greater than 0".to_string(),
            ));
        }

        if self.capability.probe_timeout_ms == 0 {
            return Err(ExecutionError::ConfigError(
                "capability.probe_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if let Some(base_url) = &self.delegation.base_url {
            reqwest::Url::parse(base_url).map_err(|e| {
                ExecutionError::ConfigError(format!(
                    "Invalid delegation base_url '{}': {}",
                    base_url, e
                ))
            })?;
        }

        for language in [Language::Java, Language::Cpp] {
            if self.toolchains.strategy_for(language) == Some(ExecutionStrategy::Delegated)
                && self.delegation.judge0.is_none()
            {
                return Err(ExecutionError::ConfigError(format!(
                    "{} is configured for delegated execution but delegation.judge0 is not set",
                    language.display_name()
                )));
            }
        }

        for pattern in &self.security.extra_patterns {
            Regex::new(pattern).map_err(|e| {
                ExecutionError::ConfigError(format!(
                    "Invalid security pattern '{}': {}",
                    pattern, e
                ))
            })?;
        }

        Ok(())
    }
}
