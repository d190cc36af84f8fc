//! Compile-and-run executor.
//!
//! Each invocation moves through `workspace created -> compiling -> running`
//! and always ends with the workspace removed. The workspace is an RAII guard,
//! so an early return or a panic releases it the same way a normal run does.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use super::process::ProcessOutcome;
use super::toolchains::{PreparedSource, Toolchain};
use super::workspace::ScratchWorkspace;
use super::CodeExecutor;
use crate::config::ExecutionSettings;
use crate::core_types::ExecutionResult;
use crate::errors::{ErrorKind, ExecutionError};

pub struct CompileAndRunExecutor {
    toolchain: Box<dyn Toolchain>,
    timeout: Duration,
    scratch_root: Option<PathBuf>,
    env_passthrough: Vec<String>,
    admission: Arc<Semaphore>,
}

impl CompileAndRunExecutor {
    pub fn new(toolchain: Box<dyn Toolchain>, settings: &ExecutionSettings) -> Self {
        Self {
            toolchain,
            timeout: settings.timeout(),
            scratch_root: settings.scratch_root.clone(),
            env_passthrough: settings.env_passthrough.clone(),
            admission: Arc::new(Semaphore::new(settings.max_concurrent_processes)),
        }
    }

    /// Share one admission gate between several executors.
    pub fn with_admission(mut self, admission: Arc<Semaphore>) -> Self {
        self.admission = admission;
        self
    }

    pub fn toolchain(&self) -> &dyn Toolchain {
        self.toolchain.as_ref()
    }

    fn timeout_error(&self) -> ExecutionError {
        ExecutionError::Timeout {
            limit_ms: self.timeout.as_millis() as u64,
        }
    }

    fn spawn_error(&self, stage: &'static str, err: std::io::Error) -> ExecutionError {
        ExecutionError::Spawn {
            language: self.toolchain.label().to_string(),
            stage,
            message: err.to_string(),
        }
    }

    async fn compile(
        &self,
        workspace: &ScratchWorkspace,
        source: &PreparedSource,
    ) -> Result<(), ExecutionError> {
        let outcome = self
            .toolchain
            .compile_spec(workspace, source)
            .env_passthrough(&self.env_passthrough)
            .run(Some(workspace.root()), self.timeout)
            .await
            .map_err(|e| self.spawn_error("compilation", e))?;

        if outcome.timed_out {
            return Err(self.timeout_error());
        }

        if !outcome.success() {
            let diagnostics = if outcome.stderr.trim().is_empty() {
                outcome.stdout.trim().to_string()
            } else {
                outcome.stderr.trim_end().to_string()
            };
            return Err(ExecutionError::Compile {
                language: self.toolchain.label().to_string(),
                diagnostics,
            });
        }

        Ok(())
    }

    fn interpret(&self, outcome: ProcessOutcome) -> Result<ExecutionResult, ExecutionError> {
        if outcome.timed_out {
            return Err(self.timeout_error());
        }

        let stdout = outcome.stdout.trim();
        match outcome.exit_code {
            Some(0) => Ok(ExecutionResult::success(stdout).with_stderr(&outcome.stderr)),
            code => {
                let stderr = outcome.stderr.trim();
                let message = if !stderr.is_empty() {
                    stderr.to_string()
                } else {
                    match code {
                        Some(code) => format!("Process exited with status {}", code),
                        None => "Process terminated by signal".to_string(),
                    }
                };
                Ok(ExecutionResult::failure(ErrorKind::Runtime, message)
                    .with_partial_output(stdout))
            }
        }
    }
}

#[async_trait]
impl CodeExecutor for CompileAndRunExecutor {
    fn name(&self) -> &str {
        self.toolchain.label()
    }

    fn spawns_processes(&self) -> bool {
        true
    }

    async fn execute_code(&self, code: &str) -> Result<ExecutionResult, ExecutionError> {
        let _permit = self
            .admission
            .acquire()
            .await
            .map_err(|e| ExecutionError::Internal(format!("Admission gate closed: {}", e)))?;

        let source = self.toolchain.prepare(code);
        let workspace = ScratchWorkspace::create(
            self.toolchain.workspace_prefix(),
            self.scratch_root.as_deref(),
            &source.source_name,
            &source.artifact_name,
        )?;
        workspace.write_source(&source.contents).await?;

        log::debug!(
            "Compiling {} submission in {}",
            self.toolchain.label(),
            workspace.root().display()
        );
        self.compile(&workspace, &source).await?;

        let outcome = self
            .toolchain
            .run_spec(&workspace, &source)
            .env_passthrough(&self.env_passthrough)
            .run(Some(workspace.root()), self.timeout)
            .await
            .map_err(|e| self.spawn_error("execution", e))?;

        let result = self.interpret(outcome);
        workspace.cleanup();
        result
    }
}
