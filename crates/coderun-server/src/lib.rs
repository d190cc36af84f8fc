//! HTTP surface for the execution orchestrator
//!
//! Exposes a single `POST /api/execute` endpoint taking `{code, language}` and
//! answering with `{output?, error?, executionTimeMs?}`, plus a health probe.
//! The status code is derived from the error kind the orchestrator attached to
//! the result: request problems are 400, server faults are 500 and anything
//! the submitted program did on its own is reported with 200.

pub mod error;

pub use error::{Result, ServerError};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::{middleware, Router};
use coderun_core::config::ServerSettings;
use coderun_core::core_types::{ExecutionPayload, ExecutionResult};
use coderun_core::errors::ErrorKind;
use coderun_core::orchestrator::Orchestrator;
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub const EXECUTE_PATH: &str = "/api/execute";

const METHOD_NOT_ALLOWED_MESSAGE: &str = "Method not allowed. Use POST to execute code.";
const INVALID_JSON_MESSAGE: &str = "Invalid JSON in request body";

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub enable_cors: bool,
    /// CORS allowed origins (if None, allows any origin)
    pub cors_origins: Option<Vec<String>>,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
    pub enable_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            enable_cors: true,
            cors_origins: None,
            max_body_size: 1024 * 1024,
            enable_logging: true,
        }
    }
}

impl ServerConfig {
    /// Build from the `server` section of the YAML configuration.
    pub fn from_settings(settings: &ServerSettings) -> Result<Self> {
        let mut config = Self::default()
            .with_bind_addr_str(&settings.bind_addr)?
            .with_cors(settings.enable_cors)
            .with_max_body_size(settings.max_body_size)
            .with_logging(settings.enable_logging);
        if let Some(origins) = &settings.cors_origins {
            config = config.with_cors_origins(origins.clone());
        }
        Ok(config)
    }

    /// Parse and set the bind address from a string.
    pub fn with_bind_addr_str(mut self, addr: &str) -> Result<Self> {
        self.bind_addr = addr
            .parse()
            .map_err(|e| ServerError::config_error(format!("Invalid bind address: {}", e)))?;
        Ok(self)
    }

    pub fn with_cors(mut self, enable: bool) -> Self {
        self.enable_cors = enable;
        self
    }

    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    pub fn with_logging(mut self, enable: bool) -> Self {
        self.enable_logging = enable;
        self
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// HTTP status for a finished execution.
pub fn status_for(result: &ExecutionResult) -> StatusCode {
    match result.error_kind {
        Some(kind) if kind.is_client_error() => StatusCode::BAD_REQUEST,
        Some(ErrorKind::Internal) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    }
}

fn parse_payload(body: &[u8]) -> Result<ExecutionPayload> {
    Ok(serde_json::from_slice(body)?)
}

/// Handler for the /api/execute POST endpoint.
async fn execute_handler(
    State(app_state): State<AppState>,
    body: Bytes,
) -> (StatusCode, Json<ExecutionResult>) {
    let payload = match parse_payload(&body) {
        Ok(payload) => payload,
        Err(e) => {
            log::warn!("Rejecting execute request ({}): {}", e.error_type(), e);
            let status =
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::BAD_REQUEST);
            return (
                status,
                Json(ExecutionResult::failure(ErrorKind::Validation, INVALID_JSON_MESSAGE)),
            );
        }
    };

    let result = app_state.orchestrator.execute(payload).await;
    let status = status_for(&result);
    if status.is_success() {
        log::debug!(
            "Execution finished in {}ms",
            result.execution_time_ms.unwrap_or_default()
        );
    } else {
        log::info!(
            "Execution refused with {}: {}",
            status,
            result.error.as_deref().unwrap_or_default()
        );
    }
    (status, Json(result))
}

async fn method_not_allowed_handler() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": METHOD_NOT_ALLOWED_MESSAGE })),
    )
}

pub struct CodeRunServer {
    orchestrator: Arc<Orchestrator>,
    config: ServerConfig,
}

impl CodeRunServer {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            config: ServerConfig::default(),
        }
    }

    pub fn with_config(orchestrator: Arc<Orchestrator>, config: ServerConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    /// Build the Axum router with all routes and middleware.
    pub fn build_router(&self) -> Router {
        let state = AppState {
            orchestrator: self.orchestrator.clone(),
        };

        let mut router = Router::new()
            .route(
                "/health",
                get(|| async {
                    Json(HealthResponse {
                        status: "healthy".to_string(),
                        timestamp: chrono::Utc::now(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                    })
                }),
            )
            .route(
                EXECUTE_PATH,
                post(execute_handler).fallback(method_not_allowed_handler),
            )
            .with_state(state);

        router = router.layer(RequestBodyLimitLayer::new(self.config.max_body_size));

        if self.config.enable_logging {
            router = router.layer(middleware::from_fn(
                |request: axum::http::Request<axum::body::Body>,
                 next: axum::middleware::Next| async {
                    let request_id = uuid::Uuid::new_v4().to_string();
                    let method = request.method().clone();
                    let uri = request.uri().clone();

                    // health probes are polled frequently
                    if uri.path() == "/health" {
                        log::debug!("Request {} {} {}", request_id, method, uri);
                    } else {
                        log::info!("Request {} {} {}", request_id, method, uri);
                    }

                    let start = std::time::Instant::now();
                    let response = next.run(request).await;
                    let duration = start.elapsed();

                    log::info!(
                        "Response {} {} completed in {:?}",
                        request_id,
                        response.status(),
                        duration
                    );

                    response
                },
            ));
        }

        router = router.layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            let cors_layer = if let Some(ref origins) = self.config.cors_origins {
                let origins: std::result::Result<Vec<_>, _> =
                    origins.iter().map(|s| s.parse()).collect();
                match origins {
                    Ok(origins) => CorsLayer::new()
                        .allow_origin(origins)
                        .allow_methods(Any)
                        .allow_headers(Any),
                    Err(_) => {
                        log::warn!("Invalid CORS origin configured, falling back to permissive CORS");
                        CorsLayer::permissive()
                    }
                }
            } else {
                CorsLayer::permissive()
            };
            router = router.layer(cors_layer);
        }

        router
    }

    async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(self.config.bind_addr).await.map_err(|e| {
            ServerError::config_error(format!(
                "Failed to bind to {}: {}",
                self.config.bind_addr, e
            ))
        })
    }

    fn announce(&self) {
        log::info!("coderun server starting on {}", self.config.bind_addr);
        log::info!("Health check: http://{}/health", self.config.bind_addr);
        log::info!(
            "Execute endpoint: http://{}{}",
            self.config.bind_addr,
            EXECUTE_PATH
        );
        log::info!(
            "Languages available: {}",
            self.orchestrator
                .languages()
                .iter()
                .map(|language| language.id())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    /// Start the server with graceful shutdown support.
    pub async fn serve_with_shutdown<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = self.bind().await?;
        self.announce();

        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(shutdown_signal)
            .await?;

        log::info!("coderun server shut down gracefully");
        Ok(())
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            log::info!("Received SIGTERM, shutting down...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use coderun_core::capability::{CapabilitySnapshot, Support};
    use coderun_core::config::CoderunConfig;
    use coderun_core::core_types::Language;
    use tower::ServiceExt; // for `oneshot`

    fn router_with(capabilities: CapabilitySnapshot) -> Router {
        let orchestrator = Orchestrator::from_config_with_capabilities(
            &CoderunConfig::default(),
            Arc::new(capabilities),
        )
        .unwrap();
        CodeRunServer::new(Arc::new(orchestrator)).build_router()
    }

    async fn post_execute(app: Router, body: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(EXECUTE_PATH)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_execute_javascript() {
        let app = router_with(CapabilitySnapshot::permissive());
        let (status, body) = post_execute(
            app,
            r#"{"code": "console.log(1+1)", "language": "javascript"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["output"], "2");
        assert!(body.get("error").is_none());
        assert!(body["executionTimeMs"].is_u64());
    }

    #[tokio::test]
    async fn test_program_errors_are_reported_with_ok_status() {
        let app = router_with(CapabilitySnapshot::permissive());
        let (status, body) = post_execute(
            app,
            r#"{"code": "undefinedVariable + 1", "language": "javascript"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("Reference Error:"));
    }

    #[tokio::test]
    async fn test_unsafe_code_is_rejected() {
        let app = router_with(CapabilitySnapshot::permissive());
        let (status, body) = post_execute(
            app,
            r#"{"code": "const fs = require('fs')", "language": "javascript"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Code contains potentially unsafe operations");
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let app = router_with(CapabilitySnapshot::permissive());
        let (status, body) =
            post_execute(app.clone(), r#"{"code": "", "language": "javascript"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid code provided");

        let (status, body) = post_execute(app, r#"{"code": "x", "language": "cobol"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"],
            "Language 'cobol' is not supported. Supported languages: javascript, python, java, cpp"
        );
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let app = router_with(CapabilitySnapshot::permissive());
        let (status, body) = post_execute(app, "{\"code\": ").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], INVALID_JSON_MESSAGE);
    }

    #[tokio::test]
    async fn test_restricted_host_reports_unavailable() {
        let app = router_with(CapabilitySnapshot::restricted("VERCEL is set"));
        let (status, body) =
            post_execute(app, r#"{"code": "int main(){return 0;}", "language": "cpp"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"],
            "C++ execution is not available in the current deployment environment (VERCEL is set). Please try JavaScript instead."
        );
    }

    #[tokio::test]
    async fn test_missing_toolchain_reports_unavailable() {
        let app = router_with(
            CapabilitySnapshot::permissive()
                .with_toolchain(Language::Java, Support::unavailable("javac not found")),
        );
        let (status, body) = post_execute(
            app,
            r#"{"code": "System.out.println(1);", "language": "java"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("not available"));
    }

    #[tokio::test]
    async fn test_get_is_method_not_allowed() {
        let app = router_with(CapabilitySnapshot::permissive());
        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri(EXECUTE_PATH)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let body = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "Method not allowed. Use POST to execute code.");
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = router_with(CapabilitySnapshot::permissive());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&ExecutionResult::success("ok")),
            StatusCode::OK
        );
        assert_eq!(
            status_for(&ExecutionResult::failure(ErrorKind::Compile, "bad")),
            StatusCode::OK
        );
        assert_eq!(
            status_for(&ExecutionResult::failure(ErrorKind::Runtime, "bad")),
            StatusCode::OK
        );
        assert_eq!(
            status_for(&ExecutionResult::failure(ErrorKind::SecurityRejection, "no")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&ExecutionResult::failure(ErrorKind::Internal, "boom")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_server_config_from_settings() {
        let settings = ServerSettings {
            bind_addr: "0.0.0.0:8080".to_string(),
            cors_origins: Some(vec!["https://learn.example.com".to_string()]),
            ..Default::default()
        };
        let config = ServerConfig::from_settings(&settings).unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(
            config.cors_origins,
            Some(vec!["https://learn.example.com".to_string()])
        );

        let settings = ServerSettings {
            bind_addr: "not-an-address".to_string(),
            ..Default::default()
        };
        assert!(ServerConfig::from_settings(&settings).is_err());
    }
}
