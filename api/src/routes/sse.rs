//! Event-stream transport: a long-lived `GET <base>/sse` push channel plus
//! `POST <base>/messages/?session_id=<id>` for client messages.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::Router;
use futures::stream::{self, Stream, StreamExt};
use grafana_mcp_runtime::dispatch::{Inbound, run_session};
use grafana_mcp_runtime::session::{Session, SessionKind};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::AppError;
use crate::routes::request_headers;
use crate::sessions::SessionRegistry;
use crate::state::AppState;

const CHANNEL_CAPACITY: usize = 64;

pub fn router(sse_path: &str, message_path: &str) -> Router<AppState> {
    let mut router = Router::new()
        .route(sse_path, get(sse_connect).post(post_message))
        .route(message_path, post(post_message));
    let bare = message_path.trim_end_matches('/');
    if !bare.is_empty() && bare != message_path {
        router = router.route(bare, post(post_message));
    }
    router
}

/// Removes the session from the registry when the client disconnects.
struct ConnectionGuard {
    sessions: Arc<SessionRegistry>,
    session_id: String,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.sessions.remove(&self.session_id) {
            tracing::info!(event = "sse.disconnected", session_id = %self.session_id);
        }
    }
}

pub async fn sse_connect(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    if !state.accepting() {
        return Err(AppError::ShuttingDown);
    }

    let session = Arc::new(Session::new(SessionKind::Sse));
    let session_id = session.id().to_string();
    let (in_tx, in_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (out_tx, out_rx) = mpsc::channel::<Value>(CHANNEL_CAPACITY);
    state.sessions.insert(Arc::clone(&session), Some(in_tx));

    {
        let sessions = Arc::clone(&state.sessions);
        let session_id = session_id.clone();
        let pump = run_session(
            Arc::clone(&state.server),
            session,
            in_rx,
            out_tx,
            state.settings.notify_timeout,
            state.lifecycle.subscribe(),
        );
        tokio::spawn(async move {
            pump.await;
            sessions.remove(&session_id);
        });
    }

    let endpoint = format!("{}?session_id={session_id}", state.settings.message_path());
    let guard = ConnectionGuard {
        sessions: Arc::clone(&state.sessions),
        session_id,
    };

    let opening = stream::once(async move {
        Ok::<_, Infallible>(Event::default().event("endpoint").data(endpoint))
    });
    let messages = stream::unfold((out_rx, guard), |(mut out_rx, guard)| async move {
        let message = out_rx.recv().await?;
        let event = Event::default().event("message").data(message.to_string());
        Some((Ok(event), (out_rx, guard)))
    });

    let keep_alive = KeepAlive::new()
        .interval(state.settings.keep_alive)
        .event(Event::default().event("ping"));
    Ok(Sse::new(opening.chain(messages)).keep_alive(keep_alive))
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    session_id: Option<String>,
}

pub async fn post_message(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let raw = query
        .session_id
        .filter(|raw| !raw.trim().is_empty())
        .ok_or(AppError::MissingSessionId)?;
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::InvalidSessionId(raw.clone()))?;
    let id = raw.trim();

    let inbound = state
        .sessions
        .get(id)
        .and_then(|entry| entry.inbound)
        .ok_or_else(|| AppError::SessionNotFound(id.to_string()))?;

    let message: Value =
        serde_json::from_slice(&body).map_err(|err| AppError::MalformedBody(err.to_string()))?;

    inbound
        .send(Inbound::new(message, request_headers(&headers)))
        .await
        .map_err(|_| AppError::SessionNotFound(id.to_string()))?;
    Ok(StatusCode::ACCEPTED)
}
