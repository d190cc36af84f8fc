//! Tests for configuration loading, overrides and validation

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::core_types::Language;
    use serial_test::serial;
    use std::env;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn clear_overrides() {
        for var in [
            "CODERUN_BIND_ADDR",
            "CODERUN_TIMEOUT_MS",
            "CODERUN_MAX_CONCURRENT",
            "CODERUN_DELEGATION_URL",
            "RAPIDAPI_KEY",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_empty_document_yields_defaults() {
        clear_overrides();
        let config = ConfigLoader::from_str("").unwrap();

        assert_eq!(config.server.bind_addr, "127.0.0.1:3000");
        assert_eq!(config.execution.timeout_ms, 5000);
        assert_eq!(config.execution.max_concurrent_processes, 4);
        assert_eq!(config.interpreter.memory_limit_bytes, 64 * 1024 * 1024);
        assert!(config.interpreter.isolate);
        assert!(config.interpreter.worker_program.is_none());
        assert_eq!(config.interpreter.max_stalled_evaluations, 1);
        assert_eq!(config.toolchains.cpp.compiler, "g++");
        assert_eq!(config.toolchains.java.strategy, ExecutionStrategy::Local);
        assert!(config.capability.restricted_markers.contains(&"VERCEL".to_string()));
        assert!(config.delegation.base_url.is_none());
    }

    #[tokio::test]
    #[serial]
    async fn test_load_from_file() {
        clear_overrides();
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
execution:
  timeout_ms: 2000
  max_concurrent_processes: 2
toolchains:
  cpp:
    compiler: clang++
    flags: ["-O2", "-std=c++17"]
delegation:
  base_url: "http://localhost:8080"
security:
  extra_patterns:
    - "import\\s*\\("
"#
        )
        .unwrap();

        let config = ConfigLoader::from_file(file.path()).await.unwrap();
        assert_eq!(config.execution.timeout_ms, 2000);
        assert_eq!(config.execution.max_concurrent_processes, 2);
        assert_eq!(config.toolchains.cpp.compiler, "clang++");
        assert_eq!(config.toolchains.cpp.flags, vec!["-O2", "-std=c++17"]);
        assert_eq!(config.security.extra_patterns.len(), 1);
        assert_eq!(
            config.delegation.endpoint_for(Language::Python).as_deref(),
            Some("http://localhost:8080/api/python-execute")
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_config_error() {
        let err = ConfigLoader::from_file("/nonexistent/coderun.yaml")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    #[serial]
    fn test_environment_overrides() {
        clear_overrides();
        env::set_var("CODERUN_TIMEOUT_MS", "1500");
        env::set_var("CODERUN_DELEGATION_URL", "https://runtime.example.com/");
        env::set_var("RAPIDAPI_KEY", "secret");

        let config = ConfigLoader::from_str("delegation:\n  judge0: {}\n").unwrap();
        clear_overrides();

        assert_eq!(config.execution.timeout_ms, 1500);
        assert_eq!(
            config.delegation.endpoint_for(Language::Python).as_deref(),
            Some("https://runtime.example.com/api/python-execute")
        );
        assert_eq!(
            config.delegation.judge0.unwrap().api_key.as_deref(),
            Some("secret")
        );
    }

    #[test]
    #[serial]
    fn test_invalid_override_is_rejected() {
        clear_overrides();
        env::set_var("CODERUN_TIMEOUT_MS", "soon");
        let result = ConfigLoader::from_str("");
        clear_overrides();
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_validation_failures() {
        clear_overrides();
        assert!(ConfigLoader::from_str("execution:\n  timeout_ms: 0\n").is_err());
        assert!(ConfigLoader::from_str("server:\n  bind_addr: nowhere\n").is_err());
        assert!(ConfigLoader::from_str("security:\n  extra_patterns: ['(']\n").is_err());
        assert!(ConfigLoader::from_str("delegation:\n  base_url: 'not a url'\n").is_err());
        assert!(
            ConfigLoader::from_str("interpreter:\n  max_stalled_evaluations: 0\n").is_err()
        );

        let err = ConfigLoader::from_str("toolchains:\n  java:\n    strategy: delegated\n")
            .unwrap_err();
        assert!(err.to_string().contains("delegation.judge0"));
    }

    #[test]
    fn test_delegated_path_derivation() {
        assert_eq!(
            delegated_path("/api/execute", Language::Python),
            "/api/python-execute"
        );
        assert_eq!(
            delegated_path("/v1/api/execute", Language::Python),
            "/v1/api/python-execute"
        );
        assert_eq!(
            delegated_path("/run", Language::Python),
            "/run/python-execute"
        );
    }
}
