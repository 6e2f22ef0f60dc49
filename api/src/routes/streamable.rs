//! Streamable HTTP transport: one endpoint, one POST per message, session
//! carried in the `Mcp-Session-Id` header.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use grafana_mcp_runtime::session::{Session, SessionKind};
use serde_json::Value;

use crate::error::AppError;
use crate::middleware::cors::SESSION_HEADER;
use crate::routes::request_headers;
use crate::state::AppState;

pub fn router(path: &str) -> Router<AppState> {
    Router::new().route(
        path,
        post(streamable_post)
            .get(streamable_get)
            .delete(streamable_delete),
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseFormat {
    Json,
    EventStream,
}

/// JSON wins whenever the client accepts it; an event stream only when that
/// is all it accepts.
pub fn negotiate(accept: Option<&str>) -> Result<ResponseFormat, AppError> {
    let raw = accept.unwrap_or("").trim();
    if raw.is_empty() {
        return Ok(ResponseFormat::Json);
    }
    let media: Vec<String> = raw
        .split(',')
        .filter_map(|part| part.split(';').next())
        .map(|media| media.trim().to_ascii_lowercase())
        .filter(|media| !media.is_empty())
        .collect();

    if media
        .iter()
        .any(|m| matches!(m.as_str(), "*/*" | "application/json" | "application/*"))
    {
        Ok(ResponseFormat::Json)
    } else if media
        .iter()
        .any(|m| matches!(m.as_str(), "text/event-stream" | "text/*"))
    {
        Ok(ResponseFormat::EventStream)
    } else {
        Err(AppError::NotAcceptable(raw.to_string()))
    }
}

fn is_initialize(message: &Value) -> bool {
    let single = |item: &Value| item.get("method").and_then(Value::as_str) == Some("initialize");
    match message {
        Value::Array(items) => items.iter().any(single),
        other => single(other),
    }
}

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub async fn streamable_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let format = negotiate(
        headers
            .get(header::ACCEPT)
            .and_then(|value| value.to_str().ok()),
    )?;
    let message: Value =
        serde_json::from_slice(&body).map_err(|err| AppError::MalformedBody(err.to_string()))?;

    let session = match session_header(&headers) {
        Some(id) => {
            state
                .sessions
                .get(&id)
                .ok_or(AppError::SessionNotFound(id))?
                .session
        }
        None if is_initialize(&message) => {
            if !state.accepting() {
                return Err(AppError::ShuttingDown);
            }
            let session = Arc::new(Session::new(SessionKind::StreamableHttp));
            state.sessions.insert(Arc::clone(&session), None);
            session
        }
        None => return Err(AppError::MissingSessionId),
    };

    let reply = state
        .server
        .handle_message(message, &session, &request_headers(&headers))
        .await;

    let mut response = match (reply, format) {
        (None, _) => StatusCode::ACCEPTED.into_response(),
        (Some(reply), ResponseFormat::Json) => (StatusCode::OK, Json(reply)).into_response(),
        (Some(reply), ResponseFormat::EventStream) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/event-stream")],
            Body::from(format!("event: message\ndata: {reply}\n\n")),
        )
            .into_response(),
    };
    if let Ok(value) = HeaderValue::from_str(session.id()) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    Ok(response)
}

/// Server-initiated streams are not offered.
pub async fn streamable_get() -> StatusCode {
    StatusCode::METHOD_NOT_ALLOWED
}

pub async fn streamable_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let id = session_header(&headers).ok_or(AppError::MissingSessionId)?;
    if state.sessions.remove(&id) {
        tracing::info!(event = "session.deleted", session_id = %id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::SessionNotFound(id))
    }
}
