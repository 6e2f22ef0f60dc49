//! Model Context Protocol runtime for Grafana.
//!
//! [`McpServer`] owns the tool registry, the layered configuration sources
//! and the detected capability set. Transports hand it decoded JSON-RPC
//! messages together with the session they arrived on and the request
//! headers (HTTP transports only); it returns the response, if any.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use futures::future::{AbortHandle, Abortable, join_all};
use grafana_mcp_core::config::{ConfigSources, RequestConfig, RequestHeaders, TlsOptions};
use grafana_mcp_core::error::{Error, Result};
use serde_json::{Map, Value, json};

pub mod args;
pub mod capabilities;
pub mod client;
pub mod dispatch;
pub mod guard;
pub mod instructions;
pub mod lifecycle;
pub mod registry;
pub mod session;
pub mod stdio;
pub mod tools;

use capabilities::{Capability, CapabilitySet};
use client::{GrafanaClient, build_http_client};
use registry::{ToolContext, ToolRegistry};
use session::{Session, request_key};

pub const SERVER_NAME: &str = "mcp-grafana";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol revisions this server speaks, oldest first.
pub const PROTOCOL_VERSIONS: [&str; 3] = ["2024-11-05", "2025-03-26", "2025-06-18"];

/// JSON-RPC error codes
pub mod rpc_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: rpc_codes::PARSE_ERROR,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: rpc_codes::INVALID_REQUEST,
            message: message.into(),
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: rpc_codes::METHOD_NOT_FOUND,
            message: format!("Method not found: {method}"),
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: rpc_codes::INVALID_PARAMS,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            code: rpc_codes::INTERNAL_ERROR,
            message: message.into(),
        }
    }
}

pub fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

pub fn error_response(id: Value, error: RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    })
}

#[derive(Clone, Debug, Default)]
pub struct ServerOptions {
    /// Text returned by `initialize`
    pub instructions: String,
    /// Expose internal error detail to callers
    pub debug: bool,
}

/// Echo the client's protocol version when supported, else the newest.
pub fn negotiate_protocol_version(requested: Option<&str>) -> &'static str {
    requested
        .and_then(|requested| {
            PROTOCOL_VERSIONS
                .iter()
                .copied()
                .find(|version| *version == requested)
        })
        .unwrap_or(PROTOCOL_VERSIONS[PROTOCOL_VERSIONS.len() - 1])
}

pub struct McpServer {
    registry: ToolRegistry,
    sources: ConfigSources,
    base_tls: TlsOptions,
    http: reqwest::Client,
    capabilities: RwLock<BTreeSet<Capability>>,
    options: ServerOptions,
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("tools", &self.registry.len())
            .field("capabilities", &self.available_capabilities())
            .finish()
    }
}

impl McpServer {
    /// Build a server over `registry`. The shared HTTP client uses the TLS
    /// options the process-wide layers resolve to; requests whose headers
    /// change nothing TLS-related reuse it.
    pub fn new(registry: ToolRegistry, sources: ConfigSources, options: ServerOptions) -> Result<Self> {
        let base = sources.resolve(&RequestHeaders::default())?;
        let base_tls = base.tls().clone();
        let http = build_http_client(&base_tls)?;
        Ok(Self {
            registry,
            sources,
            base_tls,
            http,
            capabilities: RwLock::new(BTreeSet::new()),
            options,
        })
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn available_capabilities(&self) -> BTreeSet<Capability> {
        self.capabilities
            .read()
            .map(|capabilities| capabilities.clone())
            .unwrap_or_default()
    }

    pub fn set_capabilities(&self, available: BTreeSet<Capability>) {
        if let Ok(mut capabilities) = self.capabilities.write() {
            *capabilities = available;
        }
    }

    /// Client for the process-wide configuration (no request headers).
    pub fn default_client(&self) -> Result<GrafanaClient> {
        self.client_for(&RequestHeaders::default())
    }

    pub fn client_for(&self, headers: &RequestHeaders) -> Result<GrafanaClient> {
        let config: RequestConfig = self.sources.resolve(headers)?;
        let http = if config.tls() == &self.base_tls {
            self.http.clone()
        } else {
            build_http_client(config.tls())?
        };
        Ok(GrafanaClient::new(http, Arc::new(config)))
    }

    /// Inventory the instance and replace the capability set. Tool listing
    /// only changes here, never per call.
    pub async fn refresh_capabilities(&self) -> Result<CapabilitySet> {
        let client = self.default_client()?;
        let detected = capabilities::detect(&client).await;
        self.set_capabilities(detected.available());
        Ok(detected)
    }

    /// Handle one decoded message (a request, a notification or a batch).
    /// Returns `None` when nothing should be sent back.
    pub async fn handle_message(
        &self,
        incoming: Value,
        session: &Arc<Session>,
        headers: &RequestHeaders,
    ) -> Option<Value> {
        session.touch();
        match incoming {
            Value::Array(batch) if batch.is_empty() => Some(error_response(
                Value::Null,
                RpcError::invalid_request("Batch request must not be empty"),
            )),
            Value::Array(batch) => {
                let responses: Vec<Value> = join_all(
                    batch
                        .into_iter()
                        .map(|item| self.handle_single_message(item, session, headers)),
                )
                .await
                .into_iter()
                .flatten()
                .collect();
                (!responses.is_empty()).then_some(Value::Array(responses))
            }
            single => self.handle_single_message(single, session, headers).await,
        }
    }

    async fn handle_single_message(
        &self,
        incoming: Value,
        session: &Arc<Session>,
        headers: &RequestHeaders,
    ) -> Option<Value> {
        let Some(obj) = incoming.as_object() else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Request must be a JSON object"),
            ));
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            // Notifications never get a reply, not even an error.
            let Some(id) = obj.get("id").cloned() else {
                tracing::debug!(
                    event = "rpc.invalid_notification",
                    session_id = %session.id(),
                    method = obj.get("method").and_then(serde_json::Value::as_str).unwrap_or(""),
                );
                return None;
            };
            return Some(error_response(
                id,
                RpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }

        let Some(method) = obj.get("method").and_then(Value::as_str) else {
            // A response to something we never send.
            return None;
        };

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        match obj.get("id").cloned() {
            Some(id) => {
                let result = self
                    .handle_request(&id, method, params, session, headers)
                    .await?;
                Some(match result {
                    Ok(payload) => success_response(id, payload),
                    Err(err) => error_response(id, err),
                })
            }
            None => {
                self.handle_notification(method, &params, session);
                None
            }
        }
    }

    fn handle_notification(&self, method: &str, params: &Value, session: &Session) {
        match method {
            "notifications/cancelled" => {
                let Some(request_id) = params.get("requestId") else {
                    return;
                };
                let cancelled = session.cancel_request(&request_key(request_id));
                tracing::debug!(
                    event = "rpc.cancelled",
                    session_id = %session.id(),
                    request_id = %request_id,
                    cancelled,
                );
            }
            "notifications/initialized" => {
                tracing::debug!(event = "rpc.initialized", session_id = %session.id());
            }
            other => {
                tracing::debug!(event = "rpc.notification_ignored", method = other);
            }
        }
    }

    /// Outer `None` means the request was cancelled and gets no response.
    async fn handle_request(
        &self,
        id: &Value,
        method: &str,
        params: Value,
        session: &Arc<Session>,
        headers: &RequestHeaders,
    ) -> Option<std::result::Result<Value, RpcError>> {
        let result = match method {
            "initialize" => Ok(self.initialize_payload(&params)),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.tools_list_payload()),
            "tools/call" => {
                let key = request_key(id);
                let (handle, registration) = AbortHandle::new_pair();
                let Some(in_flight) = session.track_request(&key, handle) else {
                    return Some(Err(RpcError::invalid_request(format!(
                        "Request id {id} is already in flight"
                    ))));
                };
                let outcome = Abortable::new(
                    self.handle_tools_call(params, session, headers),
                    registration,
                )
                .await;
                drop(in_flight);
                match outcome {
                    Ok(result) => result,
                    Err(_aborted) => {
                        tracing::info!(event = "tool.cancelled", session_id = %session.id(), request_id = %id);
                        return None;
                    }
                }
            }
            "resources/list" => Ok(json!({ "resources": [] })),
            "resources/templates/list" => Ok(json!({ "resourceTemplates": [] })),
            "prompts/list" => Ok(json!({ "prompts": [] })),
            _ => Err(RpcError::method_not_found(method)),
        };
        Some(result)
    }

    fn initialize_payload(&self, params: &Value) -> Value {
        let requested = params.get("protocolVersion").and_then(Value::as_str);
        json!({
            "protocolVersion": negotiate_protocol_version(requested),
            "capabilities": {
                "tools": { "listChanged": false },
                "resources": { "listChanged": false },
                "prompts": { "listChanged": false }
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": SERVER_VERSION
            },
            "instructions": self.options.instructions
        })
    }

    fn tools_list_payload(&self) -> Value {
        let available = self.available_capabilities();
        let tools: Vec<Value> = self
            .registry
            .list(&available)
            .into_iter()
            .map(|tool| tool.to_value())
            .collect();
        json!({ "tools": tools })
    }

    async fn handle_tools_call(
        &self,
        params: Value,
        session: &Arc<Session>,
        headers: &RequestHeaders,
    ) -> std::result::Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;
        let args = match params.get("arguments") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(RpcError::invalid_params(
                    "tools/call 'arguments' must be an object",
                ));
            }
        };

        let started = std::time::Instant::now();
        let outcome = match self.client_for(headers) {
            Ok(client) => {
                let ctx = ToolContext::new(client, Arc::clone(session));
                self.registry
                    .dispatch(name, &args, ctx, &self.available_capabilities())
                    .await
            }
            Err(err) => Err(err),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(envelope) => {
                tracing::info!(
                    event = "tool.completed",
                    tool = name,
                    session_id = %session.id(),
                    elapsed_ms,
                    envelope_type = envelope.kind(),
                );
                Ok(tool_result(envelope.into_value(), false))
            }
            Err(Error::ToolNotFound(unknown)) => {
                tracing::info!(event = "tool.unknown", tool = %unknown, session_id = %session.id());
                Err(RpcError::invalid_params(format!("Unknown tool: {unknown}")))
            }
            Err(err) => {
                tracing::warn!(
                    event = "tool.failed",
                    tool = name,
                    session_id = %session.id(),
                    elapsed_ms,
                    code = err.code(),
                    error = %err,
                );
                let body = serde_json::to_value(err.to_body(self.options.debug))
                    .map_err(|err| RpcError::internal(format!("cannot encode error: {err}")))?;
                Ok(tool_result(body, true))
            }
        }
    }
}

/// `tools/call` result: compact JSON text plus the same value as structured
/// content.
fn tool_result(structured: Value, is_error: bool) -> Value {
    let text = structured.to_string();
    let mut result = json!({
        "content": [{ "type": "text", "text": text }],
        "structuredContent": structured
    });
    if is_error {
        result["isError"] = Value::Bool(true);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use grafana_mcp_core::config::ConfigLayer;
    use mockito::Matcher;

    use crate::session::SessionKind;

    fn server_for(base: &str) -> McpServer {
        let cli = ConfigLayer {
            url: Some(base.to_string()),
            service_account_token: Some("glsa_test".to_string()),
            ..ConfigLayer::default()
        };
        McpServer::new(
            tools::default_registry().expect("registry"),
            ConfigSources::new(cli, ConfigLayer::default()),
            ServerOptions {
                instructions: "use the tools".to_string(),
                debug: false,
            },
        )
        .expect("server")
    }

    fn stdio_session() -> Arc<Session> {
        Arc::new(Session::new(SessionKind::Stdio))
    }

    async fn call(server: &McpServer, session: &Arc<Session>, message: Value) -> Value {
        server
            .handle_message(message, session, &RequestHeaders::default())
            .await
            .expect("response")
    }

    #[test]
    fn protocol_version_negotiation() {
        assert_eq!(negotiate_protocol_version(Some("2024-11-05")), "2024-11-05");
        assert_eq!(negotiate_protocol_version(Some("1999-01-01")), "2025-06-18");
        assert_eq!(negotiate_protocol_version(None), "2025-06-18");
    }

    #[tokio::test]
    async fn initialize_reports_server_and_instructions() {
        let server = server_for("http://localhost:3000");
        let response = call(
            &server,
            &stdio_session(),
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {"protocolVersion": "2025-03-26"}}),
        )
        .await;
        assert_eq!(response["result"]["protocolVersion"], json!("2025-03-26"));
        assert_eq!(response["result"]["serverInfo"]["name"], json!("mcp-grafana"));
        assert_eq!(response["result"]["instructions"], json!("use the tools"));
    }

    #[tokio::test]
    async fn search_end_to_end_yields_exact_envelope() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/search")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("type".into(), "dash-db".into()),
                Matcher::UrlEncoded("query".into(), "prod".into()),
            ]))
            .with_status(200)
            .with_body(r#"[{"id":1,"title":"Prod Overview"}]"#)
            .create_async()
            .await;

        let mcp = server_for(&server.url());
        let response = call(
            &mcp,
            &stdio_session(),
            json!({
                "jsonrpc": "2.0", "id": 7, "method": "tools/call",
                "params": {"name": "search", "arguments": {"query": "prod"}}
            }),
        )
        .await;

        let expected = json!({
            "type": "dashboard_search_results",
            "dashboards": [{"id": 1, "title": "Prod Overview"}],
            "total_count": 1,
            "query": "prod"
        });
        assert_eq!(response["id"], json!(7));
        assert_eq!(response["result"]["structuredContent"], expected);
        let text = response["result"]["content"][0]["text"]
            .as_str()
            .expect("text content");
        assert!(text.starts_with('{'));
        assert_eq!(serde_json::from_str::<Value>(text).expect("json"), expected);
        assert!(response["result"].get("isError").is_none());
    }

    #[tokio::test]
    async fn missing_argument_is_tool_error_without_upstream_call() {
        let mut server = mockito::Server::new_async().await;
        let untouched = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let mcp = server_for(&server.url());
        let response = call(
            &mcp,
            &stdio_session(),
            json!({
                "jsonrpc": "2.0", "id": 2, "method": "tools/call",
                "params": {"name": "get_dashboard_by_uid", "arguments": {}}
            }),
        )
        .await;
        assert_eq!(response["result"]["isError"], json!(true));
        assert_eq!(
            response["result"]["structuredContent"]["error"],
            json!("validation_failed")
        );
        assert_eq!(response["result"]["structuredContent"]["field"], json!("uid"));
        untouched.assert_async().await;
    }

    #[tokio::test]
    async fn unknown_and_gated_tools_are_invalid_params() {
        let mcp = server_for("http://localhost:3000");
        let session = stdio_session();
        for name in ["no_such_tool", "query_prometheus"] {
            let response = call(
                &mcp,
                &session,
                json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call", "params": {"name": name}}),
            )
            .await;
            assert_eq!(response["error"]["code"], json!(rpc_codes::INVALID_PARAMS), "{name}");
        }
    }

    #[tokio::test]
    async fn tools_list_follows_capabilities() {
        let mcp = server_for("http://localhost:3000");
        let session = stdio_session();
        let list = json!({"jsonrpc": "2.0", "id": 4, "method": "tools/list"});
        let names = |response: &Value| -> Vec<String> {
            response["result"]["tools"]
                .as_array()
                .expect("tools")
                .iter()
                .filter_map(|tool| tool["name"].as_str().map(str::to_string))
                .collect()
        };

        let bare = names(&call(&mcp, &session, list.clone()).await);
        assert!(!bare.iter().any(|name| name == "query_loki_logs"));

        mcp.set_capabilities(BTreeSet::from([Capability::Loki]));
        let with_loki = names(&call(&mcp, &session, list).await);
        assert!(with_loki.iter().any(|name| name == "query_loki_logs"));
        assert!(!with_loki.iter().any(|name| name == "query_prometheus"));
    }

    #[tokio::test]
    async fn batches_and_notifications() {
        let mcp = server_for("http://localhost:3000");
        let session = stdio_session();
        let response = call(
            &mcp,
            &session,
            json!([
                {"jsonrpc": "2.0", "id": "a", "method": "ping"},
                {"jsonrpc": "2.0", "method": "notifications/initialized"},
                {"jsonrpc": "2.0", "id": "b", "method": "nope"}
            ]),
        )
        .await;
        let items = response.as_array().expect("batch response");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["result"], json!({}));
        assert_eq!(items[1]["error"]["code"], json!(rpc_codes::METHOD_NOT_FOUND));

        let silent = mcp
            .handle_message(
                json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
                &session,
                &RequestHeaders::default(),
            )
            .await;
        assert!(silent.is_none());

        let empty = call(&mcp, &session, json!([])).await;
        assert_eq!(empty["error"]["code"], json!(rpc_codes::INVALID_REQUEST));
    }

    #[tokio::test]
    async fn cancelled_call_gets_no_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/search")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_chunked_body(|writer| {
                std::thread::sleep(std::time::Duration::from_millis(500));
                writer.write_all(b"[]")
            })
            .create_async()
            .await;

        let mcp = Arc::new(server_for(&server.url()));
        let session = stdio_session();
        let call = {
            let mcp = Arc::clone(&mcp);
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                mcp.handle_message(
                    json!({
                        "jsonrpc": "2.0", "id": 9, "method": "tools/call",
                        "params": {"name": "search", "arguments": {"query": "x"}}
                    }),
                    &session,
                    &RequestHeaders::default(),
                )
                .await
            })
        };

        while session.pending_requests() == 0 {
            tokio::task::yield_now().await;
        }
        mcp.handle_message(
            json!({"jsonrpc": "2.0", "method": "notifications/cancelled", "params": {"requestId": 9}}),
            &session,
            &RequestHeaders::default(),
        )
        .await;
        assert!(call.await.expect("joined").is_none());
        assert_eq!(session.pending_requests(), 0);
    }

    async fn slow_search_upstream() -> mockito::ServerGuard {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/search")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_chunked_body(|writer| {
                std::thread::sleep(std::time::Duration::from_millis(500));
                writer.write_all(b"[]")
            })
            .create_async()
            .await;
        server
    }

    fn search_call(id: Value) -> Value {
        json!({
            "jsonrpc": "2.0", "id": id, "method": "tools/call",
            "params": {"name": "search", "arguments": {"query": "x"}}
        })
    }

    #[tokio::test]
    async fn dropped_calls_release_their_cancel_handles() {
        let upstream = slow_search_upstream().await;
        let mcp = server_for(&upstream.url());
        let session = Arc::new(Session::new(SessionKind::StreamableHttp));

        for id in 0..3 {
            let abandoned = tokio::time::timeout(
                std::time::Duration::from_millis(100),
                mcp.handle_message(search_call(json!(id)), &session, &RequestHeaders::default()),
            )
            .await;
            assert!(abandoned.is_err(), "call {id} should still be running");
        }
        assert_eq!(session.pending_requests(), 0);
    }

    #[tokio::test]
    async fn duplicate_in_flight_id_is_rejected() {
        let upstream = slow_search_upstream().await;
        let mcp = Arc::new(server_for(&upstream.url()));
        let session = stdio_session();
        let first = {
            let mcp = Arc::clone(&mcp);
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                mcp.handle_message(search_call(json!(11)), &session, &RequestHeaders::default())
                    .await
            })
        };
        while session.pending_requests() == 0 {
            tokio::task::yield_now().await;
        }

        let duplicate = call(&mcp, &session, search_call(json!(11))).await;
        assert_eq!(duplicate["id"], json!(11));
        assert_eq!(duplicate["error"]["code"], json!(rpc_codes::INVALID_REQUEST));

        let cancelled = mcp
            .handle_message(
                json!({"jsonrpc": "2.0", "method": "notifications/cancelled", "params": {"requestId": 11}}),
                &session,
                &RequestHeaders::default(),
            )
            .await;
        assert!(cancelled.is_none());
        assert!(first.await.expect("joined").is_none());
        assert_eq!(session.pending_requests(), 0);
    }

    #[tokio::test]
    async fn notification_without_jsonrpc_version_gets_no_reply() {
        let mcp = server_for("http://localhost:3000");
        let session = stdio_session();
        let silent = mcp
            .handle_message(
                json!({"method": "notifications/initialized"}),
                &session,
                &RequestHeaders::default(),
            )
            .await;
        assert!(silent.is_none());

        let rejected = call(&mcp, &session, json!({"id": 4, "method": "ping"})).await;
        assert_eq!(rejected["id"], json!(4));
        assert_eq!(rejected["error"]["code"], json!(rpc_codes::INVALID_REQUEST));
    }

    #[tokio::test]
    async fn headers_fill_in_what_the_process_layers_leave_open() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/datasources/uid/abc")
            .match_header("authorization", "Bearer from-header")
            .with_status(200)
            .with_body(r#"{"uid":"abc","name":"Prom","type":"prometheus"}"#)
            .create_async()
            .await;
        let mcp = McpServer::new(
            tools::default_registry().expect("registry"),
            ConfigSources::default(),
            ServerOptions::default(),
        )
        .expect("server");
        let headers = RequestHeaders::from_pairs([
            ("X-Grafana-URL", server.url()),
            ("Authorization", "Bearer from-header".to_string()),
        ]);
        let response = mcp
            .handle_message(
                json!({
                    "jsonrpc": "2.0", "id": 1, "method": "tools/call",
                    "params": {"name": "get_datasource_by_uid", "arguments": {"uid": "abc"}}
                }),
                &stdio_session(),
                &headers,
            )
            .await
            .expect("response");
        assert!(response["result"].get("isError").is_none(), "{response}");
        assert_eq!(response["result"]["structuredContent"]["type"], json!("datasource"));
        mock.assert_async().await;
    }
}
