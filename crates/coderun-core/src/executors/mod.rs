//! Execution strategies for submitted code.
//!
//! Three strategies sit behind one trait: an embedded restricted
//! JavaScript engine, compile-and-run through local toolchain processes, and
//! delegation to a remote runtime service.

use async_trait::async_trait;

use crate::core_types::ExecutionResult;
use crate::errors::ExecutionError;

#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Whether this executor spawns host processes. Such executors are gated
    /// on deployment and toolchain capability before they run.
    fn spawns_processes(&self) -> bool {
        false
    }

    /// Run one submission. `Ok` covers every completed run, including ones
    /// where the program itself failed; `Err` is reserved for faults.
    async fn execute_code(&self, code: &str) -> Result<ExecutionResult, ExecutionError>;

    /// [`execute_code`](Self::execute_code) with faults folded into the result.
    async fn run(&self, code: &str) -> ExecutionResult {
        match self.execute_code(code).await {
            Ok(result) => result,
            Err(e) => {
                if e.kind().is_internal() {
                    log::error!("{} executor fault: {}", self.name(), e);
                } else {
                    log::debug!("{} executor reported: {}", self.name(), e);
                }
                e.into()
            }
        }
    }
}

pub mod compiled;
pub mod delegating;
pub mod interpreter;
pub mod process;
pub mod toolchains;
pub mod workspace;

pub use compiled::CompileAndRunExecutor;
pub use delegating::{DelegatingExecutor, DelegationProtocol};
pub use interpreter::{serve_worker, InterpreterExecutor, InterpreterLimits, WORKER_PROGRAM};
pub use process::{ProcessOutcome, ProcessSpec};
pub use toolchains::{CppToolchain, JavaToolchain, PreparedSource, Toolchain};
pub use workspace::ScratchWorkspace;
