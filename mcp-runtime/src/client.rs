use std::sync::Arc;
use std::time::Duration;

use grafana_mcp_core::config::{Credential, RequestConfig, TlsOptions};
use grafana_mcp_core::error::{Error, Result};
use reqwest::{Method, RequestBuilder, Url};
use serde_json::Value;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Used by the startup guard so an unreachable host fails fast.
pub const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(5);
pub const USER_AGENT: &str = concat!("mcp-grafana/", env!("CARGO_PKG_VERSION"));

const API_PREFIX: &str = "/api";
const ERROR_MESSAGE_MAX_CHARS: usize = 300;

/// Build the shared HTTP client. TLS material is read once here, at startup.
pub fn build_http_client(tls: &TlsOptions) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECTIVITY_TIMEOUT);

    if tls.skip_verify {
        tracing::warn!(
            event = "tls.verification_disabled",
            "TLS certificate verification is disabled"
        );
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let Some(ca_file) = &tls.ca_file {
        let pem = std::fs::read(ca_file).map_err(|err| {
            Error::config(format!("cannot read CA file {}: {err}", ca_file.display()))
        })?;
        let certificate = reqwest::Certificate::from_pem(&pem).map_err(|err| {
            Error::config(format!("invalid CA file {}: {err}", ca_file.display()))
        })?;
        builder = builder.add_root_certificate(certificate);
    }

    match (&tls.cert_file, &tls.key_file) {
        (Some(cert_file), Some(key_file)) => {
            let mut pem = std::fs::read(cert_file).map_err(|err| {
                Error::config(format!(
                    "cannot read client certificate {}: {err}",
                    cert_file.display()
                ))
            })?;
            let key = std::fs::read(key_file).map_err(|err| {
                Error::config(format!("cannot read client key {}: {err}", key_file.display()))
            })?;
            pem.push(b'\n');
            pem.extend_from_slice(&key);
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|err| Error::config(format!("invalid client certificate/key: {err}")))?;
            builder = builder.identity(identity);
        }
        (None, None) => {}
        _ => {
            return Err(Error::config(
                "client certificate and key must be configured together",
            ));
        }
    }

    builder
        .build()
        .map_err(|err| Error::config(format!("cannot build HTTP client: {err}")))
}

/// How credentials are attached to an outbound request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthStyle {
    /// Grafana HTTP API conventions
    Grafana,
    /// Grafana OnCall API: raw token in `Authorization` plus `X-Grafana-URL`
    OnCall,
}

/// Authenticated client for one Grafana instance, built per tool invocation.
#[derive(Clone, Debug)]
pub struct GrafanaClient {
    http: reqwest::Client,
    config: Arc<RequestConfig>,
    timeout: Duration,
}

impl GrafanaClient {
    pub fn new(http: reqwest::Client, config: Arc<RequestConfig>) -> Self {
        Self {
            http,
            config,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    /// Join an API path onto the base URL without repeating `/api` when the
    /// base already ends with it.
    pub fn api_url(&self, path: &str) -> Result<Url> {
        let relative = relative_api_path(path)?;
        let base = self.config.base_url_str();
        let joined = if base.ends_with(API_PREFIX) {
            format!("{base}{relative}")
        } else {
            format!("{base}{API_PREFIX}{relative}")
        };
        Url::parse(&joined).map_err(|err| Error::config(format!("invalid API URL {joined}: {err}")))
    }

    pub async fn get_json(&self, path: &str, query: &[(String, String)]) -> Result<Value> {
        self.send_api_request(Method::GET, path, query, None).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        self.send_api_request(Method::POST, path, &[], Some(body)).await
    }

    pub async fn send_api_request(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let relative = relative_api_path(path)?;
        if requires_credential(&relative) {
            self.config.require_credential(&format!("{method} {relative}"))?;
        }
        let url = self.api_url(&relative)?;
        self.send_url_request(method, url, query, body, AuthStyle::Grafana)
            .await
    }

    /// Send to an absolute URL (plugin backends that live outside `/api`).
    pub async fn send_url_request(
        &self,
        method: Method,
        mut url: Url,
        query: &[(String, String)],
        body: Option<&Value>,
        auth: AuthStyle,
    ) -> Result<Value> {
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }

        let target = url.to_string();
        let mut request = self
            .http
            .request(method.clone(), url)
            .timeout(self.timeout)
            .header(reqwest::header::ACCEPT, "application/json");
        request = self.apply_credential(request, auth);
        if let Some(body) = body {
            request = request.json(body);
        }

        tracing::debug!(event = "grafana.request", method = %method, url = %target);
        let response = request
            .send()
            .await
            .map_err(|err| classify_transport_error(&err, self.config.base_url_str()))?;

        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|err| {
            Error::Upstream {
                status,
                message: format!("failed to read response body: {err}"),
            }
        })?;
        let body = parse_response_body(&bytes);

        match status {
            200..=299 => Ok(body),
            401 => Err(Error::Authentication {
                status,
                message: upstream_message(&body, "unauthorized"),
            }),
            _ => {
                tracing::debug!(event = "grafana.error_status", status, url = %target);
                Err(Error::Upstream {
                    status,
                    message: upstream_message(&body, "request failed"),
                })
            }
        }
    }

    fn apply_credential(&self, request: RequestBuilder, auth: AuthStyle) -> RequestBuilder {
        let request = match auth {
            AuthStyle::Grafana => request,
            AuthStyle::OnCall => request.header("X-Grafana-URL", self.config.base_url_str()),
        };
        match (self.config.credential(), auth) {
            (Credential::None, _) => request,
            (Credential::BearerToken(token) | Credential::ApiKey(token), AuthStyle::Grafana) => {
                request.bearer_auth(token)
            }
            (Credential::BearerToken(token) | Credential::ApiKey(token), AuthStyle::OnCall) => {
                request.header(reqwest::header::AUTHORIZATION, token)
            }
            (Credential::Basic { username, password }, _) => {
                request.basic_auth(username, Some(password))
            }
            (
                Credential::Oidc {
                    access_token,
                    id_token,
                },
                _,
            ) => request
                .header("X-Access-Token", access_token)
                .header("X-Grafana-Id", id_token),
        }
    }
}

/// Strip a leading `/api` so paths can be written either way.
fn relative_api_path(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::Internal("API path must not be empty".to_string()));
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return Err(Error::Internal(format!(
            "expected an API path, got a full URL: {trimmed}"
        )));
    }
    let path = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    };
    match path.strip_prefix(API_PREFIX) {
        Some("") => Ok("/".to_string()),
        Some(rest) if rest.starts_with('/') => Ok(rest.to_string()),
        _ => Ok(path),
    }
}

/// Endpoints that never succeed anonymously.
fn requires_credential(relative: &str) -> bool {
    let p = relative.to_ascii_lowercase();
    p == "/user" || p.starts_with("/user/") || p.starts_with("/plugins/")
}

pub(crate) fn parse_response_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).to_string()))
}

fn upstream_message(body: &Value, fallback: &str) -> String {
    let text = match body {
        Value::Object(map) => map
            .get("message")
            .or_else(|| map.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string()),
        Value::String(text) if !text.trim().is_empty() => text.trim().to_string(),
        Value::Null => fallback.to_string(),
        other => other.to_string(),
    };
    truncate_chars(&text, ERROR_MESSAGE_MAX_CHARS)
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}

pub(crate) fn classify_transport_error(err: &reqwest::Error, base_url: &str) -> Error {
    let mut chain = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        chain.push_str(": ");
        chain.push_str(&inner.to_string());
        source = inner.source();
    }
    let lowered = chain.to_ascii_lowercase();
    let tls = lowered.contains("certificate")
        || lowered.contains("tls")
        || lowered.contains("handshake")
        || lowered.contains("unknownissuer");
    let cause = if err.is_timeout() {
        format!("timed out: {chain}")
    } else {
        chain
    };
    Error::Connectivity {
        url: base_url.to_string(),
        cause,
        tls,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grafana_mcp_core::config::TlsOptions;
    use serde_json::json;

    fn client_for(base: &str, credential: Credential) -> GrafanaClient {
        let config = RequestConfig::new(base, credential, TlsOptions::default()).expect("config");
        let http = build_http_client(&TlsOptions::default()).expect("http client");
        GrafanaClient::new(http, Arc::new(config))
    }

    #[test]
    fn api_url_adds_prefix_once() {
        let plain = client_for("http://grafana:3000", Credential::None);
        assert_eq!(
            plain.api_url("/search").expect("url").as_str(),
            "http://grafana:3000/api/search"
        );
        assert_eq!(
            plain.api_url("/api/search").expect("url").as_str(),
            "http://grafana:3000/api/search"
        );

        let prefixed = client_for("http://grafana:3000/api/", Credential::None);
        assert_eq!(
            prefixed.api_url("/api/search").expect("url").as_str(),
            "http://grafana:3000/api/search"
        );
        assert_eq!(
            prefixed.api_url("health").expect("url").as_str(),
            "http://grafana:3000/api/health"
        );
    }

    #[test]
    fn api_url_keeps_sub_path_and_similar_prefixes() {
        let client = client_for("https://example.com/grafana", Credential::None);
        assert_eq!(
            client.api_url("/apis/folders").expect("url").as_str(),
            "https://example.com/grafana/api/apis/folders"
        );
    }

    #[test]
    fn full_urls_are_rejected_as_paths() {
        assert!(relative_api_path("https://evil.example.com/api").is_err());
        assert!(relative_api_path("   ").is_err());
    }

    #[test]
    fn non_json_and_empty_bodies_are_preserved() {
        assert_eq!(parse_response_body(b""), Value::Null);
        assert_eq!(parse_response_body(b"plain text"), json!("plain text"));
        assert_eq!(parse_response_body(br#"{"ok":true}"#), json!({"ok": true}));
    }

    #[test]
    fn upstream_message_prefers_message_field() {
        assert_eq!(
            upstream_message(&json!({"message": "Dashboard not found"}), "x"),
            "Dashboard not found"
        );
        assert_eq!(upstream_message(&Value::Null, "fallback"), "fallback");
        let long = "x".repeat(ERROR_MESSAGE_MAX_CHARS + 50);
        assert_eq!(
            upstream_message(&json!(long), "x").chars().count(),
            ERROR_MESSAGE_MAX_CHARS + 3
        );
    }

    #[tokio::test]
    async fn bearer_token_is_sent_and_json_returned() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/search")
            .match_header("authorization", "Bearer glsa_test")
            .match_query(mockito::Matcher::UrlEncoded("query".into(), "prod".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"id":1}]"#)
            .create_async()
            .await;

        let client = client_for(&server.url(), Credential::BearerToken("glsa_test".into()));
        let body = client
            .get_json("/search", &[("query".to_string(), "prod".to_string())])
            .await
            .expect("search should succeed");
        assert_eq!(body, json!([{"id": 1}]));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn oidc_pair_is_sent_as_two_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/health")
            .match_header("x-access-token", "access")
            .match_header("x-grafana-id", "id-jwt")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client = client_for(
            &server.url(),
            Credential::Oidc {
                access_token: "access".into(),
                id_token: "id-jwt".into(),
            },
        );
        client.get_json("/health", &[]).await.expect("health");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn status_401_is_authentication_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/user")
            .with_status(401)
            .with_body(r#"{"message":"invalid API key"}"#)
            .create_async()
            .await;

        let client = client_for(&server.url(), Credential::BearerToken("bad".into()));
        let err = client.get_json("/user", &[]).await.expect_err("401");
        assert_eq!(
            err,
            Error::Authentication {
                status: 401,
                message: "invalid API key".to_string()
            }
        );
    }

    #[tokio::test]
    async fn other_statuses_are_upstream_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/dashboards/uid/missing")
            .with_status(404)
            .with_body(r#"{"message":"Dashboard not found"}"#)
            .create_async()
            .await;

        let client = client_for(&server.url(), Credential::None);
        let err = client
            .get_json("/dashboards/uid/missing", &[])
            .await
            .expect_err("404");
        assert_eq!(err.upstream_status(), Some(404));
    }

    #[tokio::test]
    async fn anonymous_identity_lookup_is_a_config_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("GET", "/api/user").expect(0).create_async().await;

        let client = client_for(&server.url(), Credential::None);
        let err = client.get_json("/user", &[]).await.expect_err("anonymous");
        assert!(matches!(err, Error::Config(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_host_is_connectivity_error() {
        let client = client_for("http://127.0.0.1:9", Credential::None)
            .with_timeout(Duration::from_millis(500));
        let err = client.get_json("/health", &[]).await.expect_err("closed port");
        assert!(matches!(err, Error::Connectivity { .. }));
    }

    #[test]
    fn missing_ca_file_is_config_error() {
        let tls = TlsOptions {
            ca_file: Some("/nonexistent/grafana-ca.pem".into()),
            ..TlsOptions::default()
        };
        assert!(matches!(build_http_client(&tls), Err(Error::Config(_))));
    }
}
