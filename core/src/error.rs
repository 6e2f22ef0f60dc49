use serde::Serialize;

/// Structured error payload returned to MCP callers.
/// Every failure a tool or transport reports is serialized through this shape
/// so clients can branch on `error` without parsing prose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (see [`codes`])
    pub error: String,
    /// Human/agent-readable description of what went wrong
    pub message: String,
    /// Which argument caused the error (validation failures only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Upstream HTTP status, when one was observed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Underlying cause, only populated at debug verbosity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Error codes used across the server
pub mod codes {
    pub const CONFIG_ERROR: &str = "config_error";
    pub const CONNECTIVITY_ERROR: &str = "connectivity_error";
    pub const AUTHENTICATION_FAILED: &str = "authentication_failed";
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const UPSTREAM_ERROR: &str = "upstream_error";
    pub const SESSION_NOT_FOUND: &str = "session_not_found";
    pub const TOOL_NOT_FOUND: &str = "tool_not_found";
    pub const TOOL_EXECUTION_FAILED: &str = "tool_execution_failed";
    pub const INTERNAL_ERROR: &str = "internal_error";
}

/// Process exit codes
pub mod exit {
    pub const SUCCESS: i32 = 0;
    /// Transport or listener failure after startup
    pub const RUNTIME_FAILURE: i32 = 1;
    /// Invalid configuration detected before any network I/O
    pub const CONFIG_ERROR: i32 = 2;
    /// The startup connectivity guard reported a fatal result
    pub const CONNECTIVITY_FAILURE: i32 = 3;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("cannot reach Grafana at {url}: {cause}")]
    Connectivity { url: String, cause: String, tls: bool },

    #[error("Grafana rejected the credentials (HTTP {status}): {message}")]
    Authentication { status: u16, message: String },

    #[error("invalid argument '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("Grafana API request failed with status {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error("unknown tool '{0}'")]
    ToolNotFound(String),

    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => codes::CONFIG_ERROR,
            Self::Connectivity { .. } => codes::CONNECTIVITY_ERROR,
            Self::Authentication { .. } => codes::AUTHENTICATION_FAILED,
            Self::Validation { .. } => codes::VALIDATION_FAILED,
            Self::Upstream { .. } => codes::UPSTREAM_ERROR,
            Self::SessionNotFound(_) => codes::SESSION_NOT_FOUND,
            Self::ToolNotFound(_) => codes::TOOL_NOT_FOUND,
            Self::ToolExecution(_) => codes::TOOL_EXECUTION_FAILED,
            Self::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// HTTP status reported by Grafana, if this error came from a response.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::Authentication { status, .. } | Self::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_tls_failure(&self) -> bool {
        matches!(self, Self::Connectivity { tls: true, .. })
    }

    /// Convert into the caller-facing payload. At normal verbosity internal
    /// causes are withheld; `debug` exposes them under `detail`.
    pub fn to_body(&self, debug: bool) -> ErrorBody {
        let (message, detail) = match self {
            Self::Internal(cause) => ("An internal error occurred".to_string(), cause.clone()),
            Self::Connectivity { url, cause, tls } => {
                let message = if *tls {
                    format!("TLS handshake with Grafana at {url} failed")
                } else {
                    format!("Unable to reach Grafana at {url}")
                };
                (message, cause.clone())
            }
            Self::Validation { message, .. } => (message.clone(), self.to_string()),
            Self::Upstream { message, .. } | Self::Authentication { message, .. } => {
                (message.clone(), self.to_string())
            }
            other => (other.to_string(), other.to_string()),
        };

        ErrorBody {
            error: self.code().to_string(),
            message,
            field: match self {
                Self::Validation { field, .. } => Some(field.clone()),
                _ => None,
            },
            status: self.upstream_status(),
            detail: debug.then_some(detail),
        }
    }
}
