use grafana_mcp_core::envelope::EnvelopeSpec;
use grafana_mcp_core::error::Error;
use serde_json::{Map, Value, json};

use crate::args::{arg_optional_string, arg_optional_u64, echo, path_segment, required_string};
use crate::registry::{ParamKind, ParamSpec, ToolContext, ToolDescriptor, ToolFuture};
use crate::tools::labels::{label_map, matches_all, parse_selectors};
use crate::tools::{not_found_as, paginate};

pub const ALERT_RULES: EnvelopeSpec = EnvelopeSpec::new("alert_rules_result", "alert_rules");
pub const ALERT_RULE: EnvelopeSpec = EnvelopeSpec::object("alert_rule");
pub const CONTACT_POINTS: EnvelopeSpec =
    EnvelopeSpec::new("contact_points_result", "contact_points");

const DEFAULT_LIMIT: u64 = 100;

pub fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(
            "list_alert_rules",
            "List alert rules",
            "List Grafana alert rules with optional pagination and label filtering.",
            ALERT_RULES,
            list_alert_rules,
        )
        .with_param(ParamSpec::optional(
            "limit",
            ParamKind::Integer,
            "Rules per page (default 100)",
        ))
        .with_param(ParamSpec::optional(
            "page",
            ParamKind::Integer,
            "1-based page number (default 1)",
        ))
        .with_param(ParamSpec::optional(
            "labelSelectors",
            ParamKind::Array,
            "Selectors of the form [{\"filters\": [{\"name\", \"value\", \"type\"}]}]; every \
             selector must match",
        )),
        ToolDescriptor::new(
            "get_alert_rule_by_uid",
            "Get alert rule details",
            "Retrieve the full configuration of a Grafana alert rule by UID.",
            ALERT_RULE,
            get_alert_rule_by_uid,
        )
        .with_param(ParamSpec::required("uid", ParamKind::String, "Alert rule UID")),
        ToolDescriptor::new(
            "list_contact_points",
            "List contact points",
            "List Grafana notification contact points with optional name filtering.",
            CONTACT_POINTS,
            list_contact_points,
        )
        .with_param(ParamSpec::optional(
            "limit",
            ParamKind::Integer,
            "Maximum contact points (default 100)",
        ))
        .with_param(ParamSpec::optional(
            "name",
            ParamKind::String,
            "Exact contact point name",
        )),
    ]
}

/// Rules from the Prometheus-compatible ruler endpoint, flattened across
/// groups.
fn flatten_rules(payload: &Value) -> Vec<Value> {
    payload
        .pointer("/data/groups")
        .and_then(Value::as_array)
        .map(|groups| {
            groups
                .iter()
                .filter_map(|group| group.get("rules").and_then(Value::as_array))
                .flatten()
                .filter(|rule| rule.is_object())
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

fn summarize_rule(rule: &Value) -> Value {
    let labels = rule
        .get("labels")
        .filter(|labels| labels.is_object())
        .cloned()
        .unwrap_or_else(|| json!({}));
    json!({
        "uid": rule.get("uid"),
        "title": rule.get("name"),
        "state": rule.get("state"),
        "labels": labels,
    })
}

fn list_alert_rules<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let limit = arg_optional_u64(args, "limit")?;
        let page = arg_optional_u64(args, "page")?;
        let selectors = parse_selectors("labelSelectors", args.get("labelSelectors"))?;

        let payload = ctx
            .client()
            .get_json("/prometheus/grafana/api/v1/rules", &[])
            .await?;
        if !payload.is_object() {
            return Err(Error::ToolExecution(
                "unexpected response from Grafana alerting API".to_string(),
            ));
        }
        let rules: Vec<Value> = flatten_rules(&payload)
            .into_iter()
            .filter(|rule| matches_all(&selectors, &label_map(rule.get("labels"))))
            .collect();
        let page_items = paginate(&rules, limit.unwrap_or(DEFAULT_LIMIT), page.unwrap_or(1))?;
        let summaries: Vec<Value> = page_items.iter().map(summarize_rule).collect();

        Ok(ctx.respond(
            Value::Array(summaries),
            echo([
                ("limit", json!(limit)),
                ("page", json!(page)),
                (
                    "label_selectors",
                    args.get("labelSelectors").cloned().unwrap_or(Value::Null),
                ),
            ]),
        ))
    })
}

fn get_alert_rule_by_uid<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let uid = required_string(args, "uid")?;
        let path = format!("/v1/provisioning/alert-rules/{}", path_segment("uid", &uid)?);
        let rule = ctx
            .client()
            .get_json(&path, &[])
            .await
            .map_err(|err| not_found_as(err, || format!("alert rule with UID '{uid}' not found")))?;
        Ok(ctx.respond(rule, echo([("uid", Value::String(uid))])))
    })
}

fn list_contact_points<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let limit = arg_optional_u64(args, "limit")?;
        let name = arg_optional_string(args, "name")?;
        let effective_limit = limit.unwrap_or(DEFAULT_LIMIT);
        if effective_limit == 0 {
            return Err(Error::validation("limit", "limit must be greater than zero"));
        }

        let query: Vec<(String, String)> = name
            .iter()
            .map(|name| ("name".to_string(), name.clone()))
            .collect();
        let payload = ctx
            .client()
            .get_json("/v1/provisioning/contact-points", &query)
            .await?;
        let Some(items) = payload.as_array() else {
            return Err(Error::ToolExecution(
                "unexpected response when listing contact points".to_string(),
            ));
        };
        let contacts: Vec<Value> = items
            .iter()
            .take(usize::try_from(effective_limit).unwrap_or(usize::MAX))
            .filter(|item| item.is_object())
            .map(|item| {
                json!({
                    "uid": item.get("uid"),
                    "name": item.get("name"),
                    "type": item.get("type"),
                })
            })
            .collect();

        Ok(ctx.respond(
            Value::Array(contacts),
            echo([("limit", json!(limit)), ("name", json!(name))]),
        ))
    })
}
