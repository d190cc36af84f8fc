//! Configuration loader for YAML files and environment overrides
//!
//! Resolution order: explicit path, `./coderun.yaml`, the user config
//! directory, then built-in defaults. Environment overrides are applied last
//! and the result is validated before it is returned.

use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::config::types::*;
use crate::errors::ExecutionError;

pub const CONFIG_FILE_NAME: &str = "coderun.yaml";

/// Configuration loader with environment resolution
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the first location that exists.
    pub async fn discover(explicit: Option<&Path>) -> Result<CoderunConfig, ExecutionError> {
        if let Some(path) = explicit {
            return Self::from_file(path).await;
        }

        for candidate in Self::candidate_paths() {
            if candidate.exists() {
                log::info!("Loading configuration from {}", candidate.display());
                return Self::from_file(&candidate).await;
            }
        }

        log::info!("No configuration file found, using defaults");
        Self::from_str("{}")
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("coderun").join(CONFIG_FILE_NAME));
        }
        paths
    }

    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<CoderunConfig, ExecutionError> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).await.map_err(|e| {
            ExecutionError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_str(content: &str) -> Result<CoderunConfig, ExecutionError> {
        let mut config: CoderunConfig = if content.trim().is_empty() {
            CoderunConfig::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| {
                ExecutionError::ConfigError(format!("Failed to parse YAML config: {}", e))
            })?
        };

        Self::resolve_environment(&mut config)?;

        config.validate()?;

        Ok(config)
    }

    /// Apply `CODERUN_*` overrides and resolve secrets from the environment.
    fn resolve_environment(config: &mut CoderunConfig) -> Result<(), ExecutionError> {
        if let Ok(bind_addr) = env::var("CODERUN_BIND_ADDR") {
            config.server.bind_addr = bind_addr;
        }

        if let Ok(timeout) = env::var("CODERUN_TIMEOUT_MS") {
            config.execution.timeout_ms = parse_number("CODERUN_TIMEOUT_MS", &timeout)?;
        }

        if let Ok(max) = env::var("CODERUN_MAX_CONCURRENT") {
            config.execution.max_concurrent_processes =
                parse_number("CODERUN_MAX_CONCURRENT", &max)?;
        }

        if let Ok(url) = env::var("CODERUN_DELEGATION_URL") {
            if !url.is_empty() {
                config.delegation.base_url = Some(url);
            }
        }

        if let Some(judge0) = &mut config.delegation.judge0 {
            if judge0.api_key.is_none() {
                judge0.api_key = env::var("RAPIDAPI_KEY").ok().filter(|key| !key.is_empty());
            }
        }

        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ExecutionError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        ExecutionError::ConfigError(format!("Invalid value for {}: '{}' ({})", name, value, e))
    })
}
