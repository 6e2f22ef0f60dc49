use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::CorsLayer;

pub const SESSION_HEADER: &str = "mcp-session-id";

const CONNECTOR_ORIGINS: &[&str] = &[
    "https://chatgpt.com",
    "https://chat.openai.com",
    "https://claude.ai",
];

/// Build a CORS layer for the configured origins plus the hosted connector
/// origins.
///
/// - Methods: GET, POST, DELETE, OPTIONS
/// - Headers: content negotiation, session id and the Grafana credential headers
/// - Exposed: `Mcp-Session-Id`
/// - Max age: 3600s
pub fn build_cors_layer(configured: &[String]) -> CorsLayer {
    let mut origin_values: Vec<String> = configured.to_vec();

    for connector_origin in CONNECTOR_ORIGINS {
        if !origin_values
            .iter()
            .any(|existing| existing.eq_ignore_ascii_case(connector_origin))
        {
            origin_values.push((*connector_origin).to_string());
        }
    }

    let origins: Vec<HeaderValue> = origin_values
        .into_iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("authorization"),
            HeaderName::from_static("content-type"),
            HeaderName::from_static("accept"),
            HeaderName::from_static(SESSION_HEADER),
            HeaderName::from_static("x-grafana-url"),
            HeaderName::from_static("x-grafana-api-key"),
            HeaderName::from_static("x-access-token"),
            HeaderName::from_static("x-grafana-id"),
        ])
        .expose_headers([HeaderName::from_static(SESSION_HEADER)])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600))
}
