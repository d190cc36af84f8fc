//! Execution orchestrator for running untrusted learner code snippets.
//!
//! A submission names a language and carries source text. The orchestrator
//! validates it, checks what this host can actually run, screens the source
//! against a denylist and hands it to exactly one executor:
//!
//! - **JavaScript** is evaluated by an embedded engine with a restricted set
//!   of globals, a memory cap and an interrupt-driven deadline, hosted in a
//!   worker process that is killed if the deadline cannot interrupt it.
//! - **Java and C++** are compiled and run as child processes inside a
//!   throwaway scratch workspace, or sent to a Judge0-compatible service.
//! - **Python** is forwarded to a sibling runtime service over HTTP.
//!
//! Every outcome, including panics inside an executor, comes back as an
//! [`ExecutionResult`] whose error kind decides the HTTP status.

pub mod capability;
pub mod config;
pub mod core_types;
pub mod errors;
pub mod executors;
pub mod guardrails;
pub mod orchestrator;

pub use capability::{CapabilityDetector, CapabilitySnapshot, CapabilitySource, Support};
pub use config::*;
pub use core_types::{ExecutionPayload, ExecutionRequest, ExecutionResult, Language};
pub use errors::{ErrorKind, ExecutionError};
pub use executors::CodeExecutor;
pub use guardrails::SecurityScreener;
pub use orchestrator::Orchestrator;
