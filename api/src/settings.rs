use std::time::Duration;

use grafana_mcp_core::error::{Error, Result};

pub const KEEP_ALIVE_ENV: &str = "MCP_STREAMABLE_HTTP_TIMEOUT_KEEP_ALIVE";
pub const NOTIFY_ENV: &str = "MCP_STREAMABLE_HTTP_TIMEOUT_NOTIFY";
pub const GRACEFUL_SHUTDOWN_ENV: &str = "MCP_STREAMABLE_HTTP_TIMEOUT_GRACEFUL_SHUTDOWN";
pub const SESSION_IDLE_ENV: &str = "MCP_SESSION_IDLE_TIMEOUT";
pub const CORS_ORIGINS_ENV: &str = "MCP_CORS_ORIGINS";

pub const DEFAULT_ADDRESS: &str = "localhost:8000";
pub const DEFAULT_STREAMABLE_PATH: &str = "mcp";
const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);
const DEFAULT_NOTIFY: Duration = Duration::from_secs(120);
const MIN_GRACEFUL_SHUTDOWN: Duration = Duration::from_secs(120);
const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(3600);
pub const REAP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpTransport {
    Sse,
    StreamableHttp,
}

impl HttpTransport {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sse => "sse",
            Self::StreamableHttp => "streamable-http",
        }
    }
}

/// Listener, path and timeout settings for the HTTP transports.
#[derive(Clone, Debug)]
pub struct TransportSettings {
    pub transport: HttpTransport,
    pub address: String,
    /// Normalized: empty or `/segment[/segment...]`, never a trailing slash
    pub base_path: String,
    pub streamable_path: String,
    pub keep_alive: Duration,
    pub notify_timeout: Duration,
    pub graceful_shutdown: Duration,
    pub session_idle: Duration,
    pub cors_origins: Vec<String>,
}

impl TransportSettings {
    /// `base_path` and `streamable_path` as given on the command line;
    /// timeouts and CORS origins come from `lookup`.
    pub fn new(
        transport: HttpTransport,
        address: impl Into<String>,
        base_path: &str,
        streamable_path: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let base_path = normalize_base_path(base_path);
        let streamable_path = join_streamable_path(&base_path, streamable_path);
        let keep_alive = seconds(&lookup, KEEP_ALIVE_ENV)?.unwrap_or(DEFAULT_KEEP_ALIVE);
        let notify_timeout = seconds(&lookup, NOTIFY_ENV)?.unwrap_or(DEFAULT_NOTIFY);
        let graceful_shutdown = seconds(&lookup, GRACEFUL_SHUTDOWN_ENV)?
            .unwrap_or_else(|| notify_timeout.max(MIN_GRACEFUL_SHUTDOWN));
        let session_idle = seconds(&lookup, SESSION_IDLE_ENV)?.unwrap_or(DEFAULT_SESSION_IDLE);
        let cors_origins = lookup(CORS_ORIGINS_ENV)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            transport,
            address: address.into(),
            base_path,
            streamable_path,
            keep_alive,
            notify_timeout,
            graceful_shutdown,
            session_idle,
            cors_origins,
        })
    }

    pub fn sse_path(&self) -> String {
        format!("{}/sse", self.base_path)
    }

    pub fn message_path(&self) -> String {
        format!("{}/messages/", self.base_path)
    }

    pub fn health_path(&self) -> String {
        format!("{}/health", self.base_path)
    }
}

/// Leading slash, no trailing slash; `/` and empty both become empty so
/// sub-paths can be appended directly.
pub fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

pub fn join_streamable_path(base_path: &str, raw: &str) -> String {
    let raw = raw.trim();
    let raw = if raw.is_empty() { DEFAULT_STREAMABLE_PATH } else { raw };
    if raw.starts_with('/') {
        let trimmed = raw.trim_end_matches('/');
        if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() }
    } else {
        format!("{base_path}/{}", raw.trim_end_matches('/'))
    }
}

fn seconds(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<Duration>> {
    let Some(raw) = lookup(key).filter(|raw| !raw.trim().is_empty()) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(|secs| Some(Duration::from_secs(secs)))
        .map_err(|_| Error::config(format!("{key} must be a whole number of seconds, got '{raw}'")))
}
