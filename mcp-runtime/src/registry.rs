use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::BoxFuture;
use grafana_mcp_core::envelope::{EnvelopeSpec, ResponseEnvelope};
use grafana_mcp_core::error::{Error, Result};
use serde_json::{Map, Value, json};

use crate::capabilities::Capability;
use crate::client::GrafanaClient;
use crate::session::Session;

pub type ToolFuture<'a> = BoxFuture<'a, Result<ResponseEnvelope>>;
pub type ToolHandler = for<'a> fn(&'a ToolContext, &'a Map<String, Value>) -> ToolFuture<'a>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamKind {
    fn schema_type(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

impl ParamSpec {
    pub fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            description,
        }
    }

    pub fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            description,
        }
    }
}

/// Everything a tool handler may touch while it runs.
#[derive(Clone, Debug)]
pub struct ToolContext {
    client: GrafanaClient,
    session: Arc<Session>,
    envelope: EnvelopeSpec,
}

impl ToolContext {
    pub fn new(client: GrafanaClient, session: Arc<Session>) -> Self {
        Self {
            client,
            session,
            envelope: EnvelopeSpec::object("grafana_result"),
        }
    }

    fn for_tool(mut self, envelope: EnvelopeSpec) -> Self {
        self.envelope = envelope;
        self
    }

    pub fn client(&self) -> &GrafanaClient {
        &self.client
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Wrap a payload in this tool's envelope.
    pub fn respond(&self, raw: Value, params: Map<String, Value>) -> ResponseEnvelope {
        self.envelope.wrap(raw, params)
    }
}

#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
    pub capability: Option<Capability>,
    pub envelope: EnvelopeSpec,
    pub handler: ToolHandler,
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("capability", &self.capability)
            .field("envelope", &self.envelope)
            .finish()
    }
}

impl ToolDescriptor {
    pub fn new(
        name: &'static str,
        title: &'static str,
        description: &'static str,
        envelope: EnvelopeSpec,
        handler: ToolHandler,
    ) -> Self {
        Self {
            name,
            title,
            description,
            params: Vec::new(),
            capability: None,
            envelope,
            handler,
        }
    }

    pub fn with_param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = Some(capability);
        self
    }

    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.params {
            properties.insert(
                param.name.to_string(),
                json!({
                    "type": param.kind.schema_type(),
                    "description": param.description,
                }),
            );
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|param| param.required)
            .map(|param| param.name)
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "title": self.title,
            "description": self.description,
            "inputSchema": self.input_schema(),
        })
    }

    pub fn is_available(&self, available: &BTreeSet<Capability>) -> bool {
        self.capability
            .is_none_or(|capability| available.contains(&capability))
    }

    /// Check presence and JSON type of every declared argument. Runs before
    /// the handler so invalid calls never reach Grafana.
    pub fn validate(&self, args: &Map<String, Value>) -> Result<()> {
        for param in &self.params {
            match args.get(param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(Error::validation(
                        param.name,
                        format!("Missing required field '{}'", param.name),
                    ));
                }
                None | Some(Value::Null) => {}
                Some(value) if !param.kind.accepts(value) => {
                    return Err(Error::validation(
                        param.name,
                        format!(
                            "'{}' must be of type {}",
                            param.name,
                            param.kind.schema_type()
                        ),
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
    index: HashMap<&'static str, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<()> {
        if self.index.contains_key(descriptor.name) {
            return Err(Error::Internal(format!(
                "tool '{}' registered twice",
                descriptor.name
            )));
        }
        self.index.insert(descriptor.name, self.tools.len());
        self.tools.push(descriptor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&idx| &self.tools[idx])
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tools whose capability requirement is met, in registration order.
    pub fn list(&self, available: &BTreeSet<Capability>) -> Vec<&ToolDescriptor> {
        self.tools
            .iter()
            .filter(|tool| tool.is_available(available))
            .collect()
    }

    pub async fn dispatch(
        &self,
        name: &str,
        args: &Map<String, Value>,
        ctx: ToolContext,
        available: &BTreeSet<Capability>,
    ) -> Result<ResponseEnvelope> {
        let tool = self
            .get(name)
            .filter(|tool| tool.is_available(available))
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))?;
        tool.validate(args)?;
        let ctx = ctx.for_tool(tool.envelope);
        (tool.handler)(&ctx, args).await
    }
}
