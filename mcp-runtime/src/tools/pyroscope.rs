use chrono::Utc;
use grafana_mcp_core::envelope::EnvelopeSpec;
use grafana_mcp_core::error::{Error, Result};
use serde_json::{Map, Value, json};

use crate::args::{arg_optional_string, arg_optional_u64, echo, path_segment, required_string};
use crate::capabilities::Capability;
use crate::registry::{ParamKind, ParamSpec, ToolContext, ToolDescriptor, ToolFuture};
use crate::tools::time::time_window;
use crate::tools::{ensure_datasource, proxy_path};

pub const PROFILE_TYPES: EnvelopeSpec =
    EnvelopeSpec::new("pyroscope_profile_types_result", "profile_types");
pub const LABEL_NAMES: EnvelopeSpec = EnvelopeSpec::new("pyroscope_label_names_result", "labels");
pub const LABEL_VALUES: EnvelopeSpec =
    EnvelopeSpec::new("pyroscope_label_values_result", "values");
pub const PROFILE: EnvelopeSpec = EnvelopeSpec::object("pyroscope_profile");

fn base(tool: ToolDescriptor) -> ToolDescriptor {
    tool.with_capability(Capability::Pyroscope)
        .with_param(ParamSpec::required(
            "datasourceUid",
            ParamKind::String,
            "UID of the Pyroscope datasource",
        ))
        .with_param(ParamSpec::optional(
            "startRfc3339",
            ParamKind::String,
            "Start of the window (default one hour ago)",
        ))
        .with_param(ParamSpec::optional(
            "endRfc3339",
            ParamKind::String,
            "End of the window (default now)",
        ))
}

fn matchers_param() -> ParamSpec {
    ParamSpec::optional(
        "matchers",
        ParamKind::String,
        "Label matchers such as {service_name=\"api\"} (default {})",
    )
}

pub fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        base(ToolDescriptor::new(
            "list_pyroscope_profile_types",
            "List Pyroscope profile types",
            "List the profile types available in a Pyroscope datasource.",
            PROFILE_TYPES,
            list_profile_types,
        )),
        base(ToolDescriptor::new(
            "list_pyroscope_label_names",
            "List Pyroscope label names",
            "List the label names present in a Pyroscope datasource.",
            LABEL_NAMES,
            list_label_names,
        ))
        .with_param(matchers_param()),
        base(ToolDescriptor::new(
            "list_pyroscope_label_values",
            "List Pyroscope label values",
            "List the values of one label in a Pyroscope datasource.",
            LABEL_VALUES,
            list_label_values,
        ))
        .with_param(ParamSpec::required("name", ParamKind::String, "Label name"))
        .with_param(matchers_param()),
        base(ToolDescriptor::new(
            "fetch_pyroscope_profile",
            "Fetch Pyroscope profile",
            "Fetch a Pyroscope profile in DOT format for a profile type and matchers.",
            PROFILE,
            fetch_profile,
        ))
        .with_param(ParamSpec::required(
            "profileType",
            ParamKind::String,
            "Profile type ID, e.g. process_cpu:cpu:nanoseconds:cpu:nanoseconds",
        ))
        .with_param(matchers_param())
        .with_param(ParamSpec::optional(
            "maxNodeDepth",
            ParamKind::Integer,
            "Maximum nodes in the rendered graph",
        )),
    ]
}

/// Wrap bare matchers in braces; empty means all series.
fn normalize_matchers(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        None | Some("") => "{}".to_string(),
        Some(text) if text.starts_with('{') && text.ends_with('}') => text.to_string(),
        Some(text) => format!("{{{text}}}"),
    }
}

/// Millisecond window parameters under the given key names.
fn window_query(
    args: &Map<String, Value>,
    start_key: &str,
    end_key: &str,
) -> Result<Vec<(String, String)>> {
    let (start, end) = time_window(args, Utc::now())?;
    Ok(vec![
        (start_key.to_string(), start.timestamp_millis().to_string()),
        (end_key.to_string(), end.timestamp_millis().to_string()),
    ])
}

/// First list found under any of `keys`, as strings.
fn listed_strings(payload: &Value, keys: &[&str], what: &str) -> Result<Vec<Value>> {
    let Some(body) = payload.as_object() else {
        return Err(Error::ToolExecution(format!(
            "unexpected response from Pyroscope {what} API"
        )));
    };
    let items = keys
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_array))
        .map(|items| {
            items
                .iter()
                .map(|item| match item {
                    Value::String(text) => Value::String(text.clone()),
                    other => Value::String(other.to_string()),
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(items)
}

fn list_profile_types<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let uid = required_string(args, "datasourceUid")?;
        let query = window_query(args, "start", "end")?;
        let uid = ensure_datasource(ctx, &uid).await?;
        let payload = ctx
            .client()
            .get_json(&proxy_path(&uid, "/pyroscope/api/v1/profile_types"), &query)
            .await?;
        let types = listed_strings(&payload, &["profileTypes", "types"], "profile types")?;
        Ok(ctx.respond(
            Value::Array(types),
            echo([("datasourceUid", Value::String(uid))]),
        ))
    })
}

fn list_label_names<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let uid = required_string(args, "datasourceUid")?;
        let matchers = normalize_matchers(arg_optional_string(args, "matchers")?.as_deref());
        let mut query = vec![("match[]".to_string(), matchers.clone())];
        query.extend(window_query(args, "start", "end")?);
        let uid = ensure_datasource(ctx, &uid).await?;
        let payload = ctx
            .client()
            .get_json(&proxy_path(&uid, "/pyroscope/api/v1/label/names"), &query)
            .await?;
        let names = listed_strings(&payload, &["data", "names"], "label names")?;
        Ok(ctx.respond(
            Value::Array(names),
            echo([
                ("datasourceUid", Value::String(uid)),
                ("matchers", Value::String(matchers)),
            ]),
        ))
    })
}

fn list_label_values<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let uid = required_string(args, "datasourceUid")?;
        let name = required_string(args, "name")?;
        let label = path_segment("name", &name)?;
        let matchers = normalize_matchers(arg_optional_string(args, "matchers")?.as_deref());
        let mut query = vec![("match[]".to_string(), matchers.clone())];
        query.extend(window_query(args, "start", "end")?);
        let uid = ensure_datasource(ctx, &uid).await?;
        let path = proxy_path(&uid, &format!("/pyroscope/api/v1/label/{label}/values"));
        let payload = ctx.client().get_json(&path, &query).await?;
        let values = listed_strings(&payload, &["data", "values"], "label values")?;
        Ok(ctx.respond(
            Value::Array(values),
            echo([
                ("datasourceUid", Value::String(uid)),
                ("name", Value::String(name)),
                ("matchers", Value::String(matchers)),
            ]),
        ))
    })
}

fn fetch_profile<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let uid = required_string(args, "datasourceUid")?;
        let profile_type = required_string(args, "profileType")?;
        let matchers = normalize_matchers(arg_optional_string(args, "matchers")?.as_deref());
        let max_nodes = arg_optional_u64(args, "maxNodeDepth")?;

        let mut query = vec![("query".to_string(), format!("{profile_type}{matchers}"))];
        query.extend(window_query(args, "from", "until")?);
        query.push(("format".to_string(), "dot".to_string()));
        if let Some(max_nodes) = max_nodes {
            query.push(("max-nodes".to_string(), max_nodes.to_string()));
        }

        let uid = ensure_datasource(ctx, &uid).await?;
        let rendered = ctx
            .client()
            .get_json(&proxy_path(&uid, "/pyroscope/render"), &query)
            .await?;
        Ok(ctx.respond(
            rendered,
            echo([
                ("datasourceUid", Value::String(uid)),
                ("profileType", Value::String(profile_type)),
                ("matchers", Value::String(matchers)),
                ("maxNodeDepth", json!(max_nodes)),
            ]),
        ))
    })
}
