//! Error types for the HTTP server.

use coderun_core::errors::ExecutionError;
use thiserror::Error;

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Error, Debug)]
pub enum ServerError {
    /// Request body was not valid JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Pipeline construction or configuration failure from the core crate
    #[error("Execution pipeline error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ServerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::Json(_) => 400,
            ServerError::Io(_) | ServerError::Execution(_) | ServerError::Config(_) => 500,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ServerError::Json(_) => "json_error",
            ServerError::Io(_) => "io_error",
            ServerError::Execution(_) => "execution_error",
            ServerError::Config(_) => "config_error",
        }
    }
}
