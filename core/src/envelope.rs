//! Response envelopes.
//!
//! Every tool result leaves the server as a single JSON object, never a bare
//! array or scalar. Some MCP clients reject top-level arrays outright, so the
//! raw Grafana payload is always wrapped:
//!
//! ```text
//! sequence  -> { "type": kind, <field>: [...], "total_count": n, ...params }
//! otherwise -> { "type": kind, "grafana_response": raw, ...params }
//! ```

use serde::Serialize;
use serde_json::{Map, Value};

pub const TYPE_KEY: &str = "type";
pub const TOTAL_COUNT_KEY: &str = "total_count";
pub const PAYLOAD_FIELD: &str = "grafana_response";

/// Static description of the envelope a tool produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnvelopeSpec {
    pub kind: &'static str,
    /// Field holding sequence payloads. Non-sequences always land under
    /// [`PAYLOAD_FIELD`].
    pub primary_field: &'static str,
}

impl EnvelopeSpec {
    pub const fn new(kind: &'static str, primary_field: &'static str) -> Self {
        Self {
            kind,
            primary_field,
        }
    }

    /// Envelope for tools that only ever return a single object.
    pub const fn object(kind: &'static str) -> Self {
        Self::new(kind, PAYLOAD_FIELD)
    }

    pub fn wrap(&self, raw: Value, params: Map<String, Value>) -> ResponseEnvelope {
        wrap(raw, params, self.kind, self.primary_field)
    }
}

/// A JSON object guaranteed to carry a `type` tag. The inner map is private
/// so nothing can turn it back into a bare array.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResponseEnvelope(Map<String, Value>);

impl ResponseEnvelope {
    pub fn kind(&self) -> &str {
        self.0
            .get(TYPE_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn total_count(&self) -> Option<u64> {
        self.0.get(TOTAL_COUNT_KEY).and_then(Value::as_u64)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn to_json_string(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }
}

impl From<ResponseEnvelope> for Value {
    fn from(envelope: ResponseEnvelope) -> Self {
        envelope.into_value()
    }
}

/// Wrap a raw upstream payload. Echoed params never overwrite the reserved
/// keys (`type`, the primary field, `total_count`, `grafana_response`).
pub fn wrap(
    raw: Value,
    params: Map<String, Value>,
    kind: &str,
    primary_field: &str,
) -> ResponseEnvelope {
    let mut body = Map::new();
    body.insert(TYPE_KEY.to_string(), Value::String(kind.to_string()));

    let reserved: [&str; 4] = [TYPE_KEY, primary_field, TOTAL_COUNT_KEY, PAYLOAD_FIELD];
    match raw {
        Value::Array(items) => {
            body.insert(TOTAL_COUNT_KEY.to_string(), Value::from(items.len()));
            body.insert(primary_field.to_string(), Value::Array(items));
        }
        other => {
            body.insert(PAYLOAD_FIELD.to_string(), other);
        }
    }

    for (key, value) in params {
        if reserved.contains(&key.as_str()) {
            continue;
        }
        body.insert(key, value);
    }

    ResponseEnvelope(body)
}
