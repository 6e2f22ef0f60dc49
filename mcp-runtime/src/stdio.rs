//! Newline-delimited JSON-RPC over a byte stream (stdin/stdout in practice).

use std::sync::Arc;

use grafana_mcp_core::config::RequestHeaders;
use grafana_mcp_core::error::{Error, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};

use crate::dispatch::{DEFAULT_NOTIFY_TIMEOUT, Inbound, run_session};
use crate::lifecycle::{ServerState, shutdown_requested};
use crate::session::{Session, SessionKind};
use crate::{McpServer, RpcError, error_response};

const CHANNEL_CAPACITY: usize = 64;

/// Serve one session over `reader`/`writer` until the reader hits EOF and
/// every response has been written, or shutdown is requested.
pub async fn serve_lines<R, W>(
    reader: R,
    mut writer: W,
    server: Arc<McpServer>,
    shutdown: watch::Receiver<ServerState>,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let session = Arc::new(Session::new(SessionKind::Stdio));
    tracing::info!(event = "session.opened", session_id = %session.id(), transport = "stdio");

    let (in_tx, in_rx) = mpsc::channel::<Inbound>(CHANNEL_CAPACITY);
    let (out_tx, mut out_rx) = mpsc::channel::<Value>(CHANNEL_CAPACITY);

    let pump = tokio::spawn(run_session(
        server,
        session,
        in_rx,
        out_tx,
        DEFAULT_NOTIFY_TIMEOUT,
        shutdown.clone(),
    ));

    let read_loop = tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            let next = tokio::select! {
                next = lines.next_line() => next,
                _ = shutdown_requested(shutdown.clone()) => break,
            };
            let line = match next {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(event = "stdio.read_failed", error = %err);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let inbound = match serde_json::from_str::<Value>(&line) {
                Ok(message) => Inbound::new(message, RequestHeaders::default()),
                Err(err) => Inbound::reply(error_response(
                    Value::Null,
                    RpcError::parse_error(format!("Parse error: {err}")),
                )),
            };
            if in_tx.send(inbound).await.is_err() {
                break;
            }
        }
    });

    while let Some(response) = out_rx.recv().await {
        let mut line = response.to_string();
        line.push('\n');
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|err| Error::Internal(format!("stdout write failed: {err}")))?;
        writer
            .flush()
            .await
            .map_err(|err| Error::Internal(format!("stdout flush failed: {err}")))?;
    }

    read_loop.abort();
    pump.await
        .map_err(|err| Error::Internal(format!("session task failed: {err}")))?;
    Ok(())
}

pub async fn serve_stdio(
    server: Arc<McpServer>,
    shutdown: watch::Receiver<ServerState>,
) -> Result<()> {
    serve_lines(tokio::io::stdin(), tokio::io::stdout(), server, shutdown).await
}
