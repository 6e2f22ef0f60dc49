//! Domain tools. Each module maps a small family of Grafana endpoints onto
//! tool descriptors; the registry does validation and capability gating.

use grafana_mcp_core::error::{Error, Result};
use serde_json::Value;

use crate::args::path_segment;
use crate::registry::{ToolContext, ToolDescriptor, ToolRegistry};

pub mod admin;
pub mod alerting;
pub mod asserts;
pub mod dashboard;
pub mod datasources;
pub mod incident;
mod json_path;
pub mod labels;
pub mod loki;
pub mod navigation;
pub mod oncall;
pub mod prometheus;
pub mod pyroscope;
pub mod search;
pub mod sift;
pub mod time;

pub fn all_descriptors() -> Vec<ToolDescriptor> {
    let mut tools = Vec::new();
    tools.extend(search::descriptors());
    tools.extend(dashboard::descriptors());
    tools.extend(datasources::descriptors());
    tools.extend(admin::descriptors());
    tools.extend(alerting::descriptors());
    tools.extend(incident::descriptors());
    tools.extend(prometheus::descriptors());
    tools.extend(loki::descriptors());
    tools.extend(oncall::descriptors());
    tools.extend(pyroscope::descriptors());
    tools.extend(navigation::descriptors());
    tools.extend(asserts::descriptors());
    tools.extend(sift::descriptors());
    tools
}

pub fn default_registry() -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for descriptor in all_descriptors() {
        registry.register(descriptor)?;
    }
    Ok(registry)
}

/// Path of a datasource proxied through Grafana.
pub(crate) fn proxy_path(datasource_uid: &str, path: &str) -> String {
    format!("/datasources/proxy/uid/{datasource_uid}{path}")
}

/// Confirm the datasource exists before proxying to it, so a typo reports
/// "not found" instead of an opaque proxy error. Returns the checked UID.
pub(crate) async fn ensure_datasource(ctx: &ToolContext, uid: &str) -> Result<String> {
    let uid = path_segment("datasourceUid", uid)?;
    ctx.client()
        .get_json(&format!("/datasources/uid/{uid}"), &[])
        .await
        .map_err(|err| not_found_as(err, || format!("datasource with UID '{uid}' not found")))?;
    Ok(uid)
}

/// Replace a 404 from Grafana with a message naming what was missing.
pub(crate) fn not_found_as(err: Error, what: impl FnOnce() -> String) -> Error {
    match err {
        Error::Upstream { status: 404, .. } => Error::Upstream {
            status: 404,
            message: what(),
        },
        other => other,
    }
}

/// Prometheus-style `{"status": "success", "data": ...}` bodies.
pub(crate) fn success_data(source: &str, payload: Value) -> Result<Value> {
    match payload {
        Value::Object(mut map) if map.get("status").and_then(Value::as_str) == Some("success") => {
            Ok(map.remove("data").unwrap_or(Value::Null))
        }
        Value::Object(map) => {
            let reason = map
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unexpected status");
            Err(Error::ToolExecution(format!("{source} returned an error: {reason}")))
        }
        _ => Err(Error::ToolExecution(format!(
            "{source} returned an unexpected response"
        ))),
    }
}

/// Keep only string entries of a JSON array.
pub(crate) fn string_items(value: &Value) -> Vec<Value> {
    value
        .as_array()
        .map(|items| items.iter().filter(|item| item.is_string()).cloned().collect())
        .unwrap_or_default()
}

/// One page of `items`, 1-based.
pub(crate) fn paginate<T: Clone>(items: &[T], limit: u64, page: u64) -> Result<Vec<T>> {
    if limit == 0 {
        return Err(Error::validation("limit", "limit must be greater than zero"));
    }
    if page == 0 {
        return Err(Error::validation("page", "page must be greater than zero"));
    }
    let start = usize::try_from((page - 1).saturating_mul(limit)).unwrap_or(usize::MAX);
    if start >= items.len() {
        return Ok(Vec::new());
    }
    let end = start.saturating_add(usize::try_from(limit).unwrap_or(usize::MAX));
    Ok(items[start..end.min(items.len())].to_vec())
}
