use std::sync::Arc;

use grafana_mcp_api::{AppState, HttpTransport, TransportSettings};
use grafana_mcp_core::config::{ConfigLayer, ConfigSources};
use grafana_mcp_core::error::{Error, Result, exit};
use grafana_mcp_runtime::guard::{GuardOptions, run_guard};
use grafana_mcp_runtime::instructions::load_instructions;
use grafana_mcp_runtime::lifecycle::{Lifecycle, ServerState};
use grafana_mcp_runtime::{McpServer, ServerOptions, stdio, tools};

use crate::cli::{Cli, Transport};

pub fn exit_code_for(err: &Error) -> i32 {
    match err {
        Error::Config(_) => exit::CONFIG_ERROR,
        Error::Connectivity { .. } | Error::Authentication { .. } => exit::CONNECTIVITY_FAILURE,
        _ => exit::RUNTIME_FAILURE,
    }
}

/// Run the process to completion and return its exit code.
pub async fn run(cli: Cli) -> i32 {
    match run_inner(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(event = "startup.failed", code = err.code(), error = %err);
            exit_code_for(&err)
        }
    }
}

async fn run_inner(cli: Cli) -> Result<i32> {
    let sources = ConfigSources::new(cli.config_layer(), ConfigLayer::from_env());
    let registry = tools::default_registry()?;
    let debug = cli.debug || cli.log_level.eq_ignore_ascii_case("debug");
    let server = McpServer::new(
        registry,
        sources,
        ServerOptions {
            instructions: load_instructions(),
            debug,
        },
    )?;

    if cli.check_connection {
        let report = run_guard(&server.default_client()?, &GuardOptions::default()).await;
        let rendered = serde_json::to_string_pretty(&report)
            .map_err(|err| Error::Internal(format!("cannot encode report: {err}")))?;
        println!("{rendered}");
        return Ok(report.exit_code());
    }

    let lifecycle = Arc::new(Lifecycle::new());
    let signals = grafana_mcp_api::shutdown::spawn_signal_listener(Arc::clone(&lifecycle));
    let outcome = launch(Arc::new(server), &cli, &GuardOptions::default(), lifecycle).await;
    signals.abort();
    outcome
}

/// Gate on the connectivity guard, detect capabilities, then serve the
/// selected transport until shutdown. The lifecycle only reaches
/// `Listening` once the guard has passed.
async fn launch(
    server: Arc<McpServer>,
    cli: &Cli,
    guard: &GuardOptions,
    lifecycle: Arc<Lifecycle>,
) -> Result<i32> {
    if let Err(code) = preflight(&server, cli.require_grafana(), guard).await {
        return Ok(code);
    }

    match server.refresh_capabilities().await {
        Ok(detected) => tracing::info!(
            event = "capabilities.detected",
            capabilities = ?detected.available(),
        ),
        Err(err) => tracing::warn!(event = "capabilities.unavailable", error = %err),
    }

    let outcome = match cli.transport {
        Transport::Stdio => serve_stdio(server, &lifecycle).await,
        Transport::Sse => serve_http(server, cli, HttpTransport::Sse, lifecycle).await,
        Transport::StreamableHttp => {
            serve_http(server, cli, HttpTransport::StreamableHttp, lifecycle).await
        }
    };
    outcome.map(|()| exit::SUCCESS)
}

/// Gate startup on the connectivity guard. `Err` carries the exit code.
pub async fn preflight(
    server: &McpServer,
    require_grafana: bool,
    options: &GuardOptions,
) -> std::result::Result<(), i32> {
    if !require_grafana {
        tracing::warn!(event = "guard.skipped", "connectivity checks disabled");
        return Ok(());
    }
    let client = server.default_client().map_err(|err| {
        tracing::error!(event = "guard.config_invalid", error = %err);
        exit_code_for(&err)
    })?;
    let report = run_guard(&client, options).await;
    if report.is_fatal() {
        tracing::error!(
            event = "guard.aborted",
            url = %report.url,
            "Grafana connectivity checks failed; use --no-require-grafana to start anyway"
        );
        return Err(report.exit_code());
    }
    Ok(())
}

async fn serve_stdio(server: Arc<McpServer>, lifecycle: &Lifecycle) -> Result<()> {
    lifecycle.transition(ServerState::Listening)?;
    tracing::info!(event = "stdio.listening");
    let outcome = stdio::serve_stdio(server, lifecycle.subscribe()).await;
    lifecycle.begin_shutdown();
    lifecycle.transition(ServerState::Stopped)?;
    outcome
}

async fn serve_http(
    server: Arc<McpServer>,
    cli: &Cli,
    transport: HttpTransport,
    lifecycle: Arc<Lifecycle>,
) -> Result<()> {
    let settings = TransportSettings::new(
        transport,
        cli.address.clone(),
        &cli.base_path,
        &cli.streamable_http_path,
        |key| std::env::var(key).ok(),
    )?;
    let listener = grafana_mcp_api::bind(&settings).await?;
    grafana_mcp_api::serve(AppState::new(server, settings, lifecycle), listener).await
}
