//! HTTP transports for the Grafana MCP server.
//!
//! [`router`] builds the axum application for one transport (event stream or
//! streamable HTTP) around a shared [`AppState`]; [`serve`] runs it on a
//! listener until the lifecycle reaches `ShuttingDown`, then drains for at
//! most the configured grace period.

use std::future::IntoFuture;
use std::sync::Arc;

use axum::Router;
use grafana_mcp_core::error::{Error, Result};
use grafana_mcp_runtime::lifecycle::{Lifecycle, ServerState, shutdown_requested};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod middleware;
pub mod routes;
pub mod sessions;
pub mod settings;
pub mod shutdown;
pub mod state;

pub use settings::{HttpTransport, TransportSettings};
pub use state::AppState;

use settings::REAP_INTERVAL;

pub fn router(state: AppState) -> Router {
    let settings = Arc::clone(&state.settings);
    let transport_routes = match settings.transport {
        HttpTransport::Sse => {
            routes::sse::router(&settings.sse_path(), &settings.message_path())
        }
        HttpTransport::StreamableHttp => routes::streamable::router(&settings.streamable_path),
    };

    Router::new()
        .merge(routes::health::router(&settings.health_path()))
        .merge(transport_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::cors::build_cors_layer(&settings.cors_origins)),
        )
        .with_state(state)
}

pub async fn bind(settings: &TransportSettings) -> Result<TcpListener> {
    TcpListener::bind(&settings.address).await.map_err(|err| {
        Error::config(format!("cannot listen on {}: {err}", settings.address))
    })
}

/// Serve until shutdown is requested through the lifecycle.
pub async fn serve(state: AppState, listener: TcpListener) -> Result<()> {
    let lifecycle = Arc::clone(&state.lifecycle);
    let settings = Arc::clone(&state.settings);
    let sessions = Arc::clone(&state.sessions);

    if lifecycle.transition(ServerState::Listening).is_err() {
        tracing::info!(event = "http.not_started", state = lifecycle.state().as_str());
        return Ok(());
    }

    let reaper = (settings.transport == HttpTransport::StreamableHttp).then(|| {
        sessions::spawn_reaper(
            Arc::clone(&sessions),
            settings.session_idle,
            REAP_INTERVAL,
            lifecycle.subscribe(),
        )
    });

    tracing::info!(
        event = "http.listening",
        address = %settings.address,
        transport = settings.transport.as_str(),
        base_path = %settings.base_path,
    );

    let server = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_requested(lifecycle.subscribe()))
        .into_future();
    let grace = settings.graceful_shutdown;
    let deadline = {
        let state = lifecycle.subscribe();
        async move {
            shutdown_requested(state).await;
            tokio::time::sleep(grace).await;
        }
    };

    let outcome = tokio::select! {
        result = server => result.map_err(|err| Error::Internal(format!("HTTP server failed: {err}"))),
        _ = deadline => {
            tracing::warn!(
                event = "http.grace_period_elapsed",
                grace_secs = grace.as_secs(),
                open = sessions.len(),
            );
            Ok(())
        }
    };

    let closed = sessions.close_all();
    if let Some(reaper) = reaper {
        reaper.abort();
    }
    mark_stopped(&lifecycle);
    tracing::info!(event = "http.stopped", closed_sessions = closed);
    outcome
}

/// Finish the lifecycle. Returns false when something else already moved it
/// past `ShuttingDown`.
fn mark_stopped(lifecycle: &Lifecycle) -> bool {
    lifecycle.begin_shutdown();
    match lifecycle.transition(ServerState::Stopped) {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(
                event = "http.stop_transition_failed",
                state = lifecycle.state().as_str(),
                error = %err,
            );
            false
        }
    }
}
