//! Shared building blocks for the Grafana MCP server: layered configuration,
//! response envelopes and the error taxonomy.

pub mod config;
pub mod envelope;
pub mod error;

pub use config::{ConfigLayer, ConfigSources, Credential, RequestConfig, RequestHeaders, TlsOptions};
pub use envelope::{EnvelopeSpec, ResponseEnvelope};
pub use error::{Error, ErrorBody, Result};
