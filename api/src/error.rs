use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use grafana_mcp_core::error::{ErrorBody, codes};
use grafana_mcp_runtime::{RpcError, error_response};
use serde_json::Value;

/// Transport-level failures, rendered before a message reaches the server.
#[derive(Debug)]
pub enum AppError {
    /// No session id on a request that needs one (400)
    MissingSessionId,
    /// Session id present but not a UUID (400)
    InvalidSessionId(String),
    /// Unknown or expired session (404)
    SessionNotFound(String),
    /// Body is not JSON (400, JSON-RPC parse error body)
    MalformedBody(String),
    /// No acceptable response representation (406)
    NotAcceptable(String),
    /// Server is draining (503)
    ShuttingDown,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::MalformedBody(cause) => {
                tracing::debug!(event = "http.malformed_body", error = %cause);
                let body = error_response(
                    Value::Null,
                    RpcError::parse_error(format!("Parse error: {cause}")),
                );
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
            AppError::MissingSessionId => (
                StatusCode::BAD_REQUEST,
                body(codes::VALIDATION_FAILED, "missing session id".to_string()),
            ),
            AppError::InvalidSessionId(raw) => (
                StatusCode::BAD_REQUEST,
                body(
                    codes::VALIDATION_FAILED,
                    format!("session id '{raw}' is not a valid UUID"),
                ),
            ),
            AppError::SessionNotFound(id) => (
                StatusCode::NOT_FOUND,
                body(codes::SESSION_NOT_FOUND, format!("session '{id}' not found")),
            ),
            AppError::NotAcceptable(accept) => (
                StatusCode::NOT_ACCEPTABLE,
                body(
                    codes::VALIDATION_FAILED,
                    format!(
                        "cannot satisfy Accept '{accept}'; use application/json or text/event-stream"
                    ),
                ),
            ),
            AppError::ShuttingDown => (
                StatusCode::SERVICE_UNAVAILABLE,
                body(codes::INTERNAL_ERROR, "server is shutting down".to_string()),
            ),
        };
        (status, Json(body)).into_response()
    }
}

fn body(code: &str, message: String) -> ErrorBody {
    ErrorBody {
        error: code.to_string(),
        message,
        field: None,
        status: None,
        detail: None,
    }
}
