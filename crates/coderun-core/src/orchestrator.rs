//! Request orchestration
//!
//! Validates a payload, checks that the language can run on this host,
//! screens the source and dispatches to exactly one executor. Every failure
//! is folded into an [`ExecutionResult`]; nothing escapes as an error or a
//! panic.

use futures_util::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use crate::capability::{CapabilityDetector, CapabilitySource, Support};
use crate::config::{CoderunConfig, ExecutionStrategy};
use crate::core_types::{ExecutionPayload, ExecutionRequest, ExecutionResult, Language};
use crate::errors::{ErrorKind, ExecutionError, INTERNAL_ERROR_MESSAGE};
use crate::executors::{
    CodeExecutor, CompileAndRunExecutor, CppToolchain, DelegatingExecutor, InterpreterExecutor,
    JavaToolchain, Toolchain,
};
use crate::guardrails::SecurityScreener;

pub struct Orchestrator {
    screener: SecurityScreener,
    capabilities: Arc<dyn CapabilitySource>,
    executors: HashMap<Language, Arc<dyn CodeExecutor>>,
    timeout: Duration,
}

impl Orchestrator {
    /// Orchestrator with no executors registered.
    pub fn new(screener: SecurityScreener, capabilities: Arc<dyn CapabilitySource>) -> Self {
        Self {
            screener,
            capabilities,
            executors: HashMap::new(),
            timeout: Duration::from_millis(5000),
        }
    }

    pub fn with_executor(mut self, language: Language, executor: Arc<dyn CodeExecutor>) -> Self {
        self.executors.insert(language, executor);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the full pipeline from configuration, probing the live host.
    pub fn from_config(config: &CoderunConfig) -> Result<Self, ExecutionError> {
        let capabilities = Arc::new(CapabilityDetector::from_config(config)?);
        Self::from_config_with_capabilities(config, capabilities)
    }

    pub fn from_config_with_capabilities(
        config: &CoderunConfig,
        capabilities: Arc<dyn CapabilitySource>,
    ) -> Result<Self, ExecutionError> {
        let screener = SecurityScreener::with_extra_patterns(&config.security.extra_patterns)?;
        let mut orchestrator =
            Self::new(screener, capabilities).with_timeout(config.execution.timeout());

        orchestrator.executors.insert(
            Language::JavaScript,
            Arc::new(InterpreterExecutor::from_settings(
                &config.execution,
                &config.interpreter,
            )),
        );

        let admission = Arc::new(Semaphore::new(config.execution.max_concurrent_processes));
        let toolchains: [Box<dyn Toolchain>; 2] = [
            Box::new(JavaToolchain::new(config.toolchains.java.clone())?),
            Box::new(CppToolchain::new(config.toolchains.cpp.clone())),
        ];
        for toolchain in toolchains {
            let language = toolchain.language();
            let executor: Arc<dyn CodeExecutor> = match config.toolchains.strategy_for(language) {
                Some(ExecutionStrategy::Delegated) => {
                    let judge0 = config.delegation.judge0.as_ref().ok_or_else(|| {
                        ExecutionError::ConfigError(format!(
                            "{} is configured for delegated execution but delegation.judge0 is not set",
                            language.display_name()
                        ))
                    })?;
                    Arc::new(DelegatingExecutor::judge0(
                        toolchain,
                        judge0,
                        Duration::from_millis(config.delegation.timeout_ms),
                    )?)
                }
                _ => Arc::new(
                    CompileAndRunExecutor::new(toolchain, &config.execution)
                        .with_admission(admission.clone()),
                ),
            };
            orchestrator.executors.insert(language, executor);
        }

        if let Some(endpoint) = config.delegation.endpoint_for(Language::Python) {
            log::info!("Python submissions are delegated to {}", endpoint);
            orchestrator.executors.insert(
                Language::Python,
                Arc::new(DelegatingExecutor::passthrough(
                    Language::Python,
                    endpoint,
                    Duration::from_millis(config.delegation.timeout_ms),
                )?),
            );
        }

        Ok(orchestrator)
    }

    /// Languages with a registered executor, in advertised order.
    pub fn languages(&self) -> Vec<Language> {
        Language::ALL
            .into_iter()
            .filter(|language| self.executors.contains_key(language))
            .collect()
    }

    pub fn capabilities(&self) -> &Arc<dyn CapabilitySource> {
        &self.capabilities
    }

    /// Run one submission end to end.
    pub async fn execute(&self, payload: ExecutionPayload) -> ExecutionResult {
        match self.dispatch(payload).await {
            Ok(result) => result,
            Err(e) => {
                match e.kind() {
                    ErrorKind::Internal => log::error!("Execution failed: {}", e),
                    ErrorKind::SecurityRejection => log::warn!("Submission rejected: {:?}", e),
                    _ => log::debug!("Submission refused: {}", e),
                }
                e.into()
            }
        }
    }

    async fn dispatch(&self, payload: ExecutionPayload) -> Result<ExecutionResult, ExecutionError> {
        let request = ExecutionRequest::try_from(payload)?;
        let language = request.language();

        let executor = self.executors.get(&language).ok_or_else(|| {
            ExecutionError::CapabilityUnavailable {
                language,
                reason: "no runtime is configured for this language".to_string(),
            }
        })?;

        if executor.spawns_processes() {
            if let Support::Unavailable { reason } = self.capabilities.environment() {
                return Err(ExecutionError::CapabilityUnavailable { language, reason });
            }
        }

        self.screener.check(request.code())?;

        if executor.spawns_processes() {
            if let Support::Unavailable { reason } = self.capabilities.toolchain(language).await {
                return Err(ExecutionError::CapabilityUnavailable { language, reason });
            }
        }

        log::debug!("Dispatching {} submission to {}", language, executor.name());
        let started = Instant::now();
        let result = match AssertUnwindSafe(executor.run(request.code()))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => self.recover(executor.name(), panic),
        };

        Ok(result.with_execution_time(started.elapsed().as_millis() as u64))
    }

    fn recover(&self, executor: &str, panic: Box<dyn Any + Send>) -> ExecutionResult {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_default();

        if message.contains("timed out") {
            return ExecutionError::Timeout {
                limit_ms: self.timeout.as_millis() as u64,
            }
            .into();
        }

        log::error!("{} executor panicked: {}", executor, message);
        ExecutionResult::failure(ErrorKind::Internal, INTERNAL_ERROR_MESSAGE)
    }
}
