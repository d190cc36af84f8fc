//! Error types for the execution pipeline
//!
//! Every failure an execution attempt can hit is modelled here and classified
//! into an [`ErrorKind`]. Executors surface faults as [`ExecutionError`] and the
//! orchestrator folds them into a uniform [`ExecutionResult`](crate::core_types::ExecutionResult),
//! so nothing below the HTTP layer ever has to reason about status codes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core_types::{Language, SUPPORTED_LANGUAGES};

/// Message returned to callers for any failure that is not their fault.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error during code execution";

/// Message returned when the screener rejects a submission.
pub const UNSAFE_CODE_MESSAGE: &str = "Code contains potentially unsafe operations";

/// Classification used to pick the HTTP status and log severity of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    SecurityRejection,
    CapabilityUnavailable,
    Compile,
    Runtime,
    Internal,
}

impl ErrorKind {
    /// Failures caused by the request itself rather than by the program it carried.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::Validation | ErrorKind::SecurityRejection | ErrorKind::CapabilityUnavailable
        )
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, ErrorKind::Internal)
    }
}

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Invalid code provided")]
    InvalidCode,
    #[error("Language '{0}' is not supported. Supported languages: {langs}", langs = SUPPORTED_LANGUAGES)]
    UnsupportedLanguage(String),
    #[error("{}", UNSAFE_CODE_MESSAGE)]
    SecurityRejection { rule: String },
    #[error("{} execution is not available in the current deployment environment ({reason}). Please try JavaScript instead.", .language.display_name())]
    CapabilityUnavailable { language: Language, reason: String },
    #[error("{language} compilation failed:\n{diagnostics}")]
    Compile { language: String, diagnostics: String },
    /// Diagnostics from a delegated compile step.
    #[error("Compilation Error:\n{0}")]
    RemoteCompile(String),
    #[error("{0}")]
    Runtime(String),
    #[error("Code execution timed out ({})", describe_limit(.limit_ms))]
    Timeout { limit_ms: u64 },
    /// The delegated runtime reported a timeout without saying which limit.
    #[error("Code execution timed out")]
    RemoteTimeout,
    #[error("{} execution is temporarily at capacity, please retry shortly", .language.display_name())]
    Overloaded { language: Language },
    #[error("Code execution exceeded memory limit")]
    MemoryLimit,
    #[error("{language} {stage} error: {message}")]
    Spawn {
        language: String,
        stage: &'static str,
        message: String,
    },
    #[error("Failed to execute {language} code using the delegated runtime")]
    Delegation { language: String, details: String },
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

fn describe_limit(limit_ms: &u64) -> String {
    if *limit_ms >= 1000 && limit_ms % 1000 == 0 {
        format!("{} second limit", limit_ms / 1000)
    } else {
        format!("{} ms limit", limit_ms)
    }
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutionError::InvalidCode | ExecutionError::UnsupportedLanguage(_) => {
                ErrorKind::Validation
            }
            ExecutionError::SecurityRejection { .. } => ErrorKind::SecurityRejection,
            ExecutionError::CapabilityUnavailable { .. } => ErrorKind::CapabilityUnavailable,
            ExecutionError::Compile { .. } | ExecutionError::RemoteCompile(_) => {
                ErrorKind::Compile
            }
            ExecutionError::Runtime(_)
            | ExecutionError::Timeout { .. }
            | ExecutionError::RemoteTimeout
            | ExecutionError::Overloaded { .. }
            | ExecutionError::MemoryLimit
            | ExecutionError::Spawn { .. }
            | ExecutionError::Delegation { .. } => ErrorKind::Runtime,
            ExecutionError::ConfigError(_)
            | ExecutionError::Io(_)
            | ExecutionError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Text safe to hand back to the caller. Internal faults are collapsed to a
    /// generic message so host paths never leave the process.
    pub fn client_message(&self) -> String {
        if self.kind().is_internal() {
            INTERNAL_ERROR_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }
}
