use std::sync::Arc;

use grafana_mcp_runtime::lifecycle::Lifecycle;

/// Resolve on Ctrl+C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(event = "signal.install_failed", signal = "ctrl_c", error = %err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::warn!(event = "signal.install_failed", signal = "sigterm", error = %err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!(event = "signal.received", signal = "ctrl_c"),
        _ = terminate => tracing::info!(event = "signal.received", signal = "sigterm"),
    }
}

/// Move the lifecycle to `ShuttingDown` once a signal arrives.
pub fn spawn_signal_listener(lifecycle: Arc<Lifecycle>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        shutdown_signal().await;
        lifecycle.begin_shutdown();
    })
}
