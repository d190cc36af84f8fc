//! Configuration module for the execution service
//!
//! YAML configuration with per-field defaults, environment overrides and
//! validation.

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;

#[cfg(test)]
mod tests;

use crate::errors::ExecutionError;
use std::path::Path;

/// Load a configuration from a YAML file
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<CoderunConfig, ExecutionError> {
    ConfigLoader::from_file(path).await
}
