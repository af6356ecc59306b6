use crate::config::{AppState, ServerConfig};
use crate::websocket;
use anyhow::Result;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use toolgraph_core::{EngineError, ErrorKind};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

mod handlers;

/// Start the API server
pub async fn serve(addr: &str, config: ServerConfig) -> Result<()> {
    let state = AppState::new(&config)?;

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("API server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the API router
fn create_router(state: AppState) -> Router {
    Router::new()
        // API routes
        .route("/api/health", get(health_check))
        .route("/api/tools", get(handlers::list_tools))
        .route(
            "/api/workflows",
            get(handlers::list_workflows).post(handlers::save_workflow),
        )
        .route("/api/workflows/execute", post(handlers::execute_workflow))
        .route("/api/workflows/{id}", get(handlers::get_workflow))
        // Paths used by the original workflow editor
        .route("/tools", get(handlers::list_tools))
        .route("/save-workflow", post(handlers::save_workflow))
        .route("/execute-workflow", post(handlers::execute_workflow))
        // Lifecycle event stream
        .route("/ws", get(websocket::ws_handler))
        // Middleware
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "toolgraph",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Validation failure kind, for rejected workflow descriptions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
            kind: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
            kind: None,
        }
    }
}

/// Custom error type for API handlers
pub struct ApiError {
    status: StatusCode,
    error: anyhow::Error,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self {
            status: StatusCode::NOT_FOUND,
            error: anyhow::Error::msg(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.error.downcast_ref::<EngineError>().map(|e| e.kind);
        let error_msg = self.error.to_string();
        let details = self
            .error
            .chain()
            .skip(1)
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(": ");

        let mut response = if details.is_empty() {
            ErrorResponse::new(error_msg)
        } else {
            ErrorResponse::with_details(error_msg, details)
        };
        response.kind = kind;

        if self.status.is_server_error() {
            tracing::error!("Request failed: {:#}", self.error);
        }

        (self.status, Json(response)).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let error = err.into();
        // Rejected descriptions are the caller's fault
        let status = if error.is::<EngineError>() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self { status, error }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_router(dir: &tempfile::TempDir) -> Router {
        let config =
            ServerConfig::load(&dir.path().join("missing.toml"), dir.path().to_path_buf())
                .unwrap();
        create_router(AppState::new(&config).unwrap())
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn linear_workflow() -> Value {
        json!({
            "nodes": [
                {"id": "1", "data": {"label": "input_query_tool", "parameters": {}}},
                {"id": "2", "data": {"label": "output_report_tool", "parameters": {}}}
            ],
            "edges": [{"source": "1", "target": "2"}]
        })
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(&dir);

        let (status, body) = send(&app, "GET", "/api/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_list_tools() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(&dir);

        let (status, body) = send(&app, "GET", "/api/tools", None).await;

        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                "filter_by_path",
                "format_report",
                "generate_text",
                "http_fetch",
                "pass_through"
            ]
        );
    }

    #[tokio::test]
    async fn test_save_then_execute() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(&dir);

        let mut workflow = linear_workflow();
        workflow["id"] = json!("greeting");
        let (status, body) = send(&app, "POST", "/save-workflow", Some(workflow)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "greeting");

        let (status, body) = send(&app, "GET", "/api/workflows", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["workflows"], json!(["greeting"]));

        let (status, body) = send(
            &app,
            "POST",
            "/api/workflows/execute",
            Some(json!({"workflowId": "greeting", "input": "hello"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], "Final Report:\n\nhello");
        assert_eq!(body["nodes"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_save_defaults_id() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(&dir);

        let (status, body) = send(&app, "POST", "/api/workflows", Some(linear_workflow())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "workflow1");

        let (status, body) = send(&app, "GET", "/api/workflows/workflow1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["edges"][0]["target"], "2");
    }

    #[tokio::test]
    async fn test_save_rejects_malformed_description() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(&dir);

        let (status, body) = send(
            &app,
            "POST",
            "/api/workflows",
            Some(json!({"nodes": [{"data": {"label": "pass_through"}}], "edges": []})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "ParseError");
    }

    #[tokio::test]
    async fn test_execute_unknown_workflow_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(&dir);

        let (status, body) = send(
            &app,
            "POST",
            "/execute-workflow",
            Some(json!({"workflowId": "nope"})),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Workflow not found: nope");

        let (status, _) = send(&app, "GET", "/api/workflows/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_execute_inline_cycle_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(&dir);

        let workflow = json!({
            "nodes": [
                {"id": "s", "tool_name": "pass_through"},
                {"id": "a", "tool_name": "pass_through"},
                {"id": "b", "tool_name": "pass_through"},
                {"id": "t", "tool_name": "format_report"}
            ],
            "edges": [
                {"source": "s", "target": "a"},
                {"source": "a", "target": "b"},
                {"source": "b", "target": "a"},
                {"source": "b", "target": "t"}
            ]
        });
        let (status, body) = send(
            &app,
            "POST",
            "/api/workflows/execute",
            Some(json!({"workflow": workflow, "input": "x"})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "CycleDetected");
    }
}
