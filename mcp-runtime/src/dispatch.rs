//! Per-session message pump shared by every transport.
//!
//! Requests run concurrently but their responses leave in arrival order.
//! Notifications are handled inline so a `notifications/cancelled` can reach
//! a call that is still running.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesOrdered;
use grafana_mcp_core::config::RequestHeaders;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::McpServer;
use crate::lifecycle::ServerState;
use crate::session::{Session, request_ids};

pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(120);

/// What a transport hands the pump.
#[derive(Debug)]
pub enum Inbound {
    /// One decoded message and the headers it arrived with
    Message { message: Value, headers: RequestHeaders },
    /// A response the transport produced itself, such as a parse error.
    /// It leaves behind every response queued before it.
    Reply(Value),
}

impl Inbound {
    pub fn new(message: Value, headers: RequestHeaders) -> Self {
        Self::Message { message, headers }
    }

    pub fn reply(response: Value) -> Self {
        Self::Reply(response)
    }
}

/// Why a session pump stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// Inbound side closed and every response was flushed
    Drained,
    /// The consumer stopped reading or fell too far behind
    OutboundClosed,
    Shutdown,
}

/// Drive one session until its inbound channel closes, its consumer goes
/// away or the server starts shutting down. The session is closed on exit.
pub async fn run_session(
    server: Arc<McpServer>,
    session: Arc<Session>,
    mut inbound: mpsc::Receiver<Inbound>,
    outbound: mpsc::Sender<Value>,
    notify_timeout: Duration,
    mut shutdown: watch::Receiver<ServerState>,
) -> SessionEnd {
    let mut pending: FuturesOrdered<BoxFuture<'static, Option<Value>>> = FuturesOrdered::new();
    let mut inbound_open = true;

    let end = loop {
        if !inbound_open && pending.is_empty() {
            break SessionEnd::Drained;
        }

        tokio::select! {
            received = inbound.recv(), if inbound_open => match received {
                Some(Inbound::Reply(response)) => {
                    pending.push_back(Box::pin(async move { Some(response) }));
                }
                Some(Inbound::Message { message, headers }) => {
                    if request_ids(&message).is_empty() {
                        // Notifications and stray responses never answer.
                        server.handle_message(message, &session, &headers).await;
                    } else {
                        let server = Arc::clone(&server);
                        let session = Arc::clone(&session);
                        pending.push_back(Box::pin(async move {
                            server.handle_message(message, &session, &headers).await
                        }));
                    }
                }
                None => inbound_open = false,
            },
            Some(response) = pending.next(), if !pending.is_empty() => {
                let Some(response) = response else { continue };
                if let Err(err) = outbound.send_timeout(response, notify_timeout).await {
                    tracing::warn!(
                        event = "session.outbound_stalled",
                        session_id = %session.id(),
                        error = %err,
                    );
                    break SessionEnd::OutboundClosed;
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() >= ServerState::ShuttingDown {
                    break SessionEnd::Shutdown;
                }
            },
        }
    };

    session.close();
    tracing::info!(
        event = "session.closed",
        session_id = %session.id(),
        transport = session.kind().as_str(),
        reason = ?end,
    );
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use grafana_mcp_core::config::{ConfigLayer, ConfigSources};
    use mockito::Matcher;
    use serde_json::json;

    use crate::lifecycle::Lifecycle;
    use crate::session::SessionKind;
    use crate::{ServerOptions, tools};

    fn server_for(base: &str) -> Arc<McpServer> {
        let cli = ConfigLayer {
            url: Some(base.to_string()),
            service_account_token: Some("glsa_test".to_string()),
            ..ConfigLayer::default()
        };
        Arc::new(
            McpServer::new(
                tools::default_registry().expect("registry"),
                ConfigSources::new(cli, ConfigLayer::default()),
                ServerOptions::default(),
            )
            .expect("server"),
        )
    }

    fn call(id: u64, query: &str) -> Inbound {
        Inbound::new(
            json!({
                "jsonrpc": "2.0", "id": id, "method": "tools/call",
                "params": {"name": "search", "arguments": {"query": query}}
            }),
            RequestHeaders::default(),
        )
    }

    #[tokio::test]
    async fn responses_follow_arrival_order() {
        let mut upstream = mockito::Server::new_async().await;
        upstream
            .mock("GET", "/api/search")
            .match_query(Matcher::UrlEncoded("query".into(), "slow".into()))
            .with_status(200)
            .with_chunked_body(|writer| {
                std::thread::sleep(Duration::from_millis(300));
                writer.write_all(b"[]")
            })
            .create_async()
            .await;
        upstream
            .mock("GET", "/api/search")
            .match_query(Matcher::UrlEncoded("query".into(), "fast".into()))
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let lifecycle = Lifecycle::new();
        let session = Arc::new(Session::new(SessionKind::Stdio));
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let pump = tokio::spawn(run_session(
            server_for(&upstream.url()),
            Arc::clone(&session),
            in_rx,
            out_tx,
            DEFAULT_NOTIFY_TIMEOUT,
            lifecycle.subscribe(),
        ));

        in_tx.send(call(1, "slow")).await.expect("send");
        in_tx
            .send(Inbound::new(
                json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
                RequestHeaders::default(),
            ))
            .await
            .expect("send");
        in_tx.send(call(2, "fast")).await.expect("send");
        drop(in_tx);

        let first = out_rx.recv().await.expect("first response");
        let second = out_rx.recv().await.expect("second response");
        assert_eq!(first["id"], json!(1));
        assert_eq!(second["id"], json!(2));
        assert!(out_rx.recv().await.is_none());
        assert_eq!(pump.await.expect("joined"), SessionEnd::Drained);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn shutdown_stops_the_pump() {
        let lifecycle = Lifecycle::new();
        lifecycle.transition(ServerState::Listening).expect("listen");
        let session = Arc::new(Session::new(SessionKind::Sse));
        let (_in_tx, in_rx) = mpsc::channel(1);
        let (out_tx, _out_rx) = mpsc::channel(1);
        let pump = tokio::spawn(run_session(
            server_for("http://localhost:3000"),
            Arc::clone(&session),
            in_rx,
            out_tx,
            DEFAULT_NOTIFY_TIMEOUT,
            lifecycle.subscribe(),
        ));
        lifecycle.begin_shutdown();
        assert_eq!(pump.await.expect("joined"), SessionEnd::Shutdown);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn stalled_consumer_ends_the_session() {
        let lifecycle = Lifecycle::new();
        let session = Arc::new(Session::new(SessionKind::Sse));
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, _out_rx) = mpsc::channel(1);
        let pump = tokio::spawn(run_session(
            server_for("http://localhost:3000"),
            Arc::clone(&session),
            in_rx,
            out_tx,
            Duration::from_millis(50),
            lifecycle.subscribe(),
        ));
        for id in 0..2 {
            in_tx
                .send(Inbound::new(
                    json!({"jsonrpc": "2.0", "id": id, "method": "ping"}),
                    RequestHeaders::default(),
                ))
                .await
                .expect("send");
        }
        assert_eq!(pump.await.expect("joined"), SessionEnd::OutboundClosed);
    }

    #[tokio::test]
    async fn transport_replies_queue_behind_earlier_responses() {
        let mut upstream = mockito::Server::new_async().await;
        upstream
            .mock("GET", "/api/search")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_chunked_body(|writer| {
                std::thread::sleep(Duration::from_millis(300));
                writer.write_all(b"[]")
            })
            .create_async()
            .await;

        let lifecycle = Lifecycle::new();
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let pump = tokio::spawn(run_session(
            server_for(&upstream.url()),
            Arc::new(Session::new(SessionKind::Stdio)),
            in_rx,
            out_tx,
            DEFAULT_NOTIFY_TIMEOUT,
            lifecycle.subscribe(),
        ));

        in_tx.send(call(1, "slow")).await.expect("send");
        in_tx
            .send(Inbound::reply(json!({"jsonrpc": "2.0", "id": null, "error": {"code": -32700}})))
            .await
            .expect("send");
        drop(in_tx);

        let first = out_rx.recv().await.expect("first response");
        let second = out_rx.recv().await.expect("second response");
        assert_eq!(first["id"], json!(1));
        assert_eq!(second["error"]["code"], json!(-32700));
        assert_eq!(pump.await.expect("joined"), SessionEnd::Drained);
    }
}
