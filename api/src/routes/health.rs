use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub transport: &'static str,
    pub sessions: usize,
}

pub fn router(path: &str) -> Router<AppState> {
    Router::new().route(path, get(health_check))
}

/// Liveness plus the open session count; 503 once shutdown has begun.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let accepting = state.accepting();
    let http_status = if accepting {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        http_status,
        Json(HealthResponse {
            status: if accepting { "ok" } else { "shutting_down" },
            version: grafana_mcp_runtime::SERVER_VERSION,
            transport: state.settings.transport.as_str(),
            sessions: state.sessions.len(),
        }),
    )
}
