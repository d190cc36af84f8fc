//! Delegation of execution to a remote runtime service.
//!
//! Two wire protocols are supported: `passthrough`, where a sibling service
//! speaks the same `{code, language} -> {output?, error?}` contract as this
//! one, and Judge0 for remote compile-and-run. Nothing here touches the local
//! filesystem or spawns processes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::toolchains::Toolchain;
use super::CodeExecutor;
use crate::config::Judge0Settings;
use crate::core_types::{ExecutionResult, Language};
use crate::errors::{ErrorKind, ExecutionError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegationProtocol {
    Passthrough,
    Judge0 { host: String, api_key: String },
}

#[derive(Serialize)]
struct PassthroughRequest<'a> {
    code: &'a str,
    language: &'a str,
}

#[derive(Debug, Deserialize)]
struct PassthroughResponse {
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct Judge0Submission<'a> {
    source_code: &'a str,
    language_id: u32,
    stdin: &'a str,
}

#[derive(Debug, Deserialize)]
struct Judge0Status {
    id: u32,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct Judge0Response {
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    stderr: Option<String>,
    #[serde(default)]
    compile_output: Option<String>,
    #[serde(default)]
    message: Option<String>,
    status: Judge0Status,
}

const JUDGE0_ACCEPTED: u32 = 3;
const JUDGE0_TIME_LIMIT_EXCEEDED: u32 = 5;
const JUDGE0_COMPILATION_ERROR: u32 = 6;

/// Judge0 language identifiers.
pub fn judge0_language_id(language: Language) -> u32 {
    match language {
        Language::JavaScript => 63,
        Language::Python => 71,
        Language::Java => 62,
        Language::Cpp => 54,
    }
}

pub struct DelegatingExecutor {
    client: reqwest::Client,
    endpoint: String,
    language: Language,
    protocol: DelegationProtocol,
    source: Option<Box<dyn Toolchain>>,
}

impl DelegatingExecutor {
    pub fn new(
        language: Language,
        endpoint: impl Into<String>,
        protocol: DelegationProtocol,
        timeout: Duration,
    ) -> Result<Self, ExecutionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExecutionError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            language,
            protocol,
            source: None,
        })
    }

    /// Sibling service speaking the same contract as this one.
    pub fn passthrough(
        language: Language,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ExecutionError> {
        Self::new(language, endpoint, DelegationProtocol::Passthrough, timeout)
    }

    /// Judge0 submission endpoint. Snippets are completed with `toolchain`
    /// before submission.
    pub fn judge0(
        toolchain: Box<dyn Toolchain>,
        settings: &Judge0Settings,
        timeout: Duration,
    ) -> Result<Self, ExecutionError> {
        let api_key = settings.api_key.clone().ok_or_else(|| {
            ExecutionError::ConfigError(
                "Judge0 delegation requires an API key (set RAPIDAPI_KEY)".to_string(),
            )
        })?;
        let endpoint = format!(
            "{}/submissions?base64_encoded=false&wait=true",
            settings.endpoint.trim_end_matches('/')
        );
        let mut executor = Self::new(
            toolchain.language(),
            endpoint,
            DelegationProtocol::Judge0 {
                host: settings.host.clone(),
                api_key,
            },
            timeout,
        )?;
        executor.source = Some(toolchain);
        Ok(executor)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn transport_error(&self, details: impl ToString) -> ExecutionError {
        ExecutionError::Delegation {
            language: self.language.display_name().to_string(),
            details: details.to_string(),
        }
    }

    async fn run_passthrough(&self, code: &str) -> Result<ExecutionResult, ExecutionError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&PassthroughRequest {
                code,
                language: self.language.id(),
            })
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body: PassthroughResponse = response.json().await.map_err(|e| {
            self.transport_error(format!("unreadable response (HTTP {}): {}", status, e))
        })?;

        match (body.output, body.error) {
            (output, Some(error)) => Ok(ExecutionResult::failure(ErrorKind::Runtime, error)
                .with_partial_output(output.as_deref().unwrap_or_default())),
            (Some(output), None) if status.is_success() => Ok(ExecutionResult::success(output)),
            (None, None) if status.is_success() => Ok(ExecutionResult::success("")),
            _ => Err(self.transport_error(format!("HTTP {} without an error body", status))),
        }
    }

    async fn run_judge0(
        &self,
        code: &str,
        host: &str,
        api_key: &str,
    ) -> Result<ExecutionResult, ExecutionError> {
        let source_code = match &self.source {
            Some(toolchain) => toolchain.prepare_remote(code),
            None => code.to_string(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-RapidAPI-Key", api_key)
            .header("X-RapidAPI-Host", host)
            .json(&Judge0Submission {
                source_code: &source_code,
                language_id: judge0_language_id(self.language),
                stdin: "",
            })
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(self.transport_error(format!("HTTP {}", response.status())));
        }

        let body: Judge0Response = response
            .json()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.interpret_judge0(body)
    }

    fn interpret_judge0(&self, body: Judge0Response) -> Result<ExecutionResult, ExecutionError> {
        let stdout = body.stdout.unwrap_or_default();
        let stdout = stdout.trim();
        let stderr = body.stderr.unwrap_or_default();

        match body.status.id {
            JUDGE0_ACCEPTED => Ok(ExecutionResult::success(stdout).with_stderr(&stderr)),
            JUDGE0_COMPILATION_ERROR => {
                let diagnostics = body
                    .compile_output
                    .map(|output| output.trim_end().to_string())
                    .filter(|output| !output.is_empty())
                    .unwrap_or_else(|| "Unknown compilation error".to_string());
                Err(ExecutionError::RemoteCompile(diagnostics))
            }
            // The service enforces its own limit and does not report it.
            JUDGE0_TIME_LIMIT_EXCEEDED => Err(ExecutionError::RemoteTimeout),
            _ => {
                let message = [stderr.trim(), body.message.as_deref().unwrap_or("").trim()]
                    .into_iter()
                    .find(|text| !text.is_empty())
                    .map(str::to_string)
                    .unwrap_or(body.status.description);
                Ok(ExecutionResult::failure(ErrorKind::Runtime, message)
                    .with_partial_output(stdout))
            }
        }
    }
}

#[async_trait]
impl CodeExecutor for DelegatingExecutor {
    fn name(&self) -> &str {
        match self.protocol {
            DelegationProtocol::Passthrough => "delegated",
            DelegationProtocol::Judge0 { .. } => "judge0",
        }
    }

    async fn execute_code(&self, code: &str) -> Result<ExecutionResult, ExecutionError> {
        log::debug!(
            "Delegating {} submission to {}",
            self.language.display_name(),
            self.endpoint
        );
        match &self.protocol {
            DelegationProtocol::Passthrough => self.run_passthrough(code).await,
            DelegationProtocol::Judge0 { host, api_key } => {
                self.run_judge0(code, host, api_key).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::CppToolchain;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    async fn spawn_mock(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn passthrough(base: &str) -> DelegatingExecutor {
        DelegatingExecutor::passthrough(
            Language::Python,
            format!("{}/api/python-execute", base),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_passthrough_forwards_code_unchanged() {
        let router = Router::new().route(
            "/api/python-execute",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["language"], "python");
                Json(json!({ "output": format!("ran: {}", body["code"].as_str().unwrap()) }))
            }),
        );
        let base = spawn_mock(router).await;

        let result = passthrough(&base).run("print('hi')\n").await;
        assert_eq!(result.output.as_deref(), Some("ran: print('hi')\n"));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_passthrough_relays_program_errors() {
        let router = Router::new().route(
            "/api/python-execute",
            post(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "NameError: name 'x' is not defined" })),
                )
            }),
        );
        let base = spawn_mock(router).await;

        let result = passthrough(&base).run("x").await;
        assert_eq!(
            result.error.as_deref(),
            Some("NameError: name 'x' is not defined")
        );
        assert_eq!(result.error_kind, Some(ErrorKind::Runtime));
    }

    #[tokio::test]
    async fn test_transport_failure_is_generic() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = passthrough(&format!("http://{}", addr)).run("1").await;
        assert_eq!(
            result.error.as_deref(),
            Some("Failed to execute Python code using the delegated runtime")
        );
    }

    #[tokio::test]
    async fn test_judge0_status_mapping() {
        let router = Router::new().route(
            "/submissions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["x-rapidapi-key"], "key");
                assert_eq!(body["language_id"], 54);
                let source = body["source_code"].as_str().unwrap().to_string();
                assert!(source.contains("#include <iostream>"));
                if source.contains("cout << 7;") {
                    assert!(source.contains("int main() {\n    cout << 7;\n    return 0;\n}"));
                    Json(json!({
                        "status": {"id": 3, "description": "Accepted"},
                        "stdout": "7\n"
                    }))
                } else if source.contains("missing diagnostics") {
                    Json(json!({"status": {"id": 6, "description": "Compilation Error"}}))
                } else if source.contains("syntax error") {
                    Json(json!({
                        "status": {"id": 6, "description": "Compilation Error"},
                        "compile_output": "program.cpp:1: error: expected ';'\n"
                    }))
                } else if source.contains("spin") {
                    Json(json!({"status": {"id": 5, "description": "Time Limit Exceeded"}}))
                } else {
                    Json(json!({
                        "status": {"id": 3, "description": "Accepted"},
                        "stdout": "42\n"
                    }))
                }
            }),
        );
        let base = spawn_mock(router).await;
        let settings = Judge0Settings {
            endpoint: base,
            api_key: Some("key".to_string()),
            ..Default::default()
        };
        let executor = DelegatingExecutor::judge0(
            Box::new(CppToolchain::default()),
            &settings,
            Duration::from_secs(5),
        )
        .unwrap();

        let result = executor.run("int main() { cout << 42; }").await;
        assert_eq!(result.output.as_deref(), Some("42"));

        let result = executor.run("cout << 7;").await;
        assert_eq!(result.output.as_deref(), Some("7"));

        let result = executor.run("int main() { syntax error }").await;
        assert_eq!(
            result.error.as_deref(),
            Some("Compilation Error:\nprogram.cpp:1: error: expected ';'")
        );
        assert_eq!(result.error_kind, Some(ErrorKind::Compile));

        let result = executor.run("int main() { missing diagnostics }").await;
        assert_eq!(
            result.error.as_deref(),
            Some("Compilation Error:\nUnknown compilation error")
        );

        let result = executor.run("int main() { spin(); }").await;
        assert_eq!(result.error.as_deref(), Some("Code execution timed out"));
        assert_eq!(result.error_kind, Some(ErrorKind::Runtime));
    }

    #[test]
    fn test_judge0_requires_api_key() {
        let result = DelegatingExecutor::judge0(
            Box::new(CppToolchain::default()),
            &Judge0Settings::default(),
            Duration::from_secs(1),
        );
        assert!(result.is_err());
    }
}
