use axum::http::HeaderMap;
use grafana_mcp_core::config::RequestHeaders;

pub mod health;
pub mod sse;
pub mod streamable;

/// Copy the textual request headers into the form the config resolver reads.
pub(crate) fn request_headers(headers: &HeaderMap) -> RequestHeaders {
    RequestHeaders::from_pairs(headers.iter().filter_map(|(name, value)| {
        value
            .to_str()
            .ok()
            .map(|value| (name.as_str().to_string(), value.to_string()))
    }))
}
