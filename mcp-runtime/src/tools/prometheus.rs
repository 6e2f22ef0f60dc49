//! PromQL tools. Every call goes through Grafana's datasource proxy after the
//! datasource itself has been confirmed to exist.

use chrono::Utc;
use grafana_mcp_core::envelope::EnvelopeSpec;
use grafana_mcp_core::error::{Error, Result};
use regex::Regex;
use serde_json::{Map, Value, json};

use crate::args::{
    arg_optional_string, arg_optional_u64, echo, path_segment, required_string,
};
use crate::capabilities::Capability;
use crate::registry::{ParamKind, ParamSpec, ToolContext, ToolDescriptor, ToolFuture};
use crate::tools::labels::parse_selectors;
use crate::tools::time::{parse_time_expression, unix_seconds};
use crate::tools::{ensure_datasource, paginate, proxy_path, string_items, success_data};

pub const QUERY_RESULT: EnvelopeSpec = EnvelopeSpec::new("prometheus_query_result", "results");
pub const METRIC_METADATA: EnvelopeSpec = EnvelopeSpec::object("prometheus_metric_metadata");
pub const METRIC_NAMES: EnvelopeSpec =
    EnvelopeSpec::new("prometheus_metric_names_result", "metric_names");
pub const LABEL_NAMES: EnvelopeSpec = EnvelopeSpec::new("prometheus_label_names_result", "labels");
pub const LABEL_VALUES: EnvelopeSpec =
    EnvelopeSpec::new("prometheus_label_values_result", "values");

const DEFAULT_METRIC_LIMIT: u64 = 10;

fn datasource_param() -> ParamSpec {
    ParamSpec::required(
        "datasourceUid",
        ParamKind::String,
        "UID of the Prometheus datasource",
    )
}

fn matches_param() -> ParamSpec {
    ParamSpec::optional(
        "matches",
        ParamKind::Array,
        "Series selectors [{\"filters\": [{\"name\", \"value\", \"type\"}]}]",
    )
}

fn range_params(tool: ToolDescriptor) -> ToolDescriptor {
    tool.with_param(ParamSpec::optional(
        "startRfc3339",
        ParamKind::String,
        "Start of the window (RFC 3339 or now-1h)",
    ))
    .with_param(ParamSpec::optional(
        "endRfc3339",
        ParamKind::String,
        "End of the window (RFC 3339 or now)",
    ))
}

pub fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(
            "query_prometheus",
            "Query Prometheus",
            "Execute a PromQL range or instant query against a Prometheus datasource. Range \
             queries need endTime and stepSeconds.",
            QUERY_RESULT,
            query_prometheus,
        )
        .with_capability(Capability::Prometheus)
        .with_param(datasource_param())
        .with_param(ParamSpec::required("expr", ParamKind::String, "PromQL expression"))
        .with_param(ParamSpec::required(
            "startTime",
            ParamKind::String,
            "Start (or evaluation) time: RFC 3339, now or now-<duration>",
        ))
        .with_param(ParamSpec::optional(
            "endTime",
            ParamKind::String,
            "End time for range queries",
        ))
        .with_param(ParamSpec::optional(
            "stepSeconds",
            ParamKind::Integer,
            "Resolution step for range queries",
        ))
        .with_param(ParamSpec::optional(
            "queryType",
            ParamKind::String,
            "'range' (default) or 'instant'",
        )),
        ToolDescriptor::new(
            "list_prometheus_metric_metadata",
            "List Prometheus metric metadata",
            "List metadata (type, help, unit) for metrics in a Prometheus datasource.",
            METRIC_METADATA,
            list_metric_metadata,
        )
        .with_capability(Capability::Prometheus)
        .with_param(datasource_param())
        .with_param(ParamSpec::optional("metric", ParamKind::String, "Single metric name"))
        .with_param(ParamSpec::optional(
            "limit",
            ParamKind::Integer,
            "Maximum metrics returned",
        )),
        ToolDescriptor::new(
            "list_prometheus_metric_names",
            "List Prometheus metric names",
            "List metric names in a Prometheus datasource, optionally filtered by a regex.",
            METRIC_NAMES,
            list_metric_names,
        )
        .with_capability(Capability::Prometheus)
        .with_param(datasource_param())
        .with_param(ParamSpec::optional(
            "regex",
            ParamKind::String,
            "Regex the metric name must contain a match for",
        ))
        .with_param(ParamSpec::optional(
            "limit",
            ParamKind::Integer,
            "Names per page (default 10)",
        ))
        .with_param(ParamSpec::optional(
            "page",
            ParamKind::Integer,
            "1-based page number",
        )),
        range_params(
            ToolDescriptor::new(
                "list_prometheus_label_names",
                "List Prometheus label names",
                "List label names in a Prometheus datasource.",
                LABEL_NAMES,
                list_label_names,
            )
            .with_capability(Capability::Prometheus)
            .with_param(datasource_param())
            .with_param(matches_param()),
        ),
        range_params(
            ToolDescriptor::new(
                "list_prometheus_label_values",
                "List Prometheus label values",
                "List the values of one label in a Prometheus datasource.",
                LABEL_VALUES,
                list_label_values,
            )
            .with_capability(Capability::Prometheus)
            .with_param(datasource_param())
            .with_param(ParamSpec::required("labelName", ParamKind::String, "Label name"))
            .with_param(matches_param()),
        ),
    ]
}

async fn prometheus_get(
    ctx: &ToolContext,
    uid: &str,
    path: &str,
    query: &[(String, String)],
) -> Result<Value> {
    let payload = ctx.client().get_json(&proxy_path(uid, path), query).await?;
    success_data("Prometheus", payload)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueryType {
    Range,
    Instant,
}

impl QueryType {
    fn parse(raw: Option<&str>) -> Result<Self> {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            None | Some("range") => Ok(Self::Range),
            Some("instant") => Ok(Self::Instant),
            Some(other) => Err(Error::validation(
                "queryType",
                format!("unsupported query type '{other}'; use 'range' or 'instant'"),
            )),
        }
    }
}

/// Query-string pairs for a PromQL query. Pure so range validation can be
/// tested without a server.
fn query_params(
    expr: &str,
    query_type: QueryType,
    start: &str,
    end: Option<&str>,
    step_seconds: Option<u64>,
) -> Result<(&'static str, Vec<(String, String)>)> {
    let now = Utc::now();
    let start_at = parse_time_expression("startTime", start, now)?;
    let mut params = vec![("query".to_string(), expr.to_string())];
    match query_type {
        QueryType::Range => {
            let end = end.ok_or_else(|| {
                Error::validation("endTime", "endTime must be provided for range queries")
            })?;
            let step = step_seconds.filter(|step| *step > 0).ok_or_else(|| {
                Error::validation(
                    "stepSeconds",
                    "stepSeconds must be greater than zero for range queries",
                )
            })?;
            let end_at = parse_time_expression("endTime", end, now)?;
            params.push(("start".to_string(), unix_seconds(start_at)));
            params.push(("end".to_string(), unix_seconds(end_at)));
            params.push(("step".to_string(), step.to_string()));
            Ok(("/api/v1/query_range", params))
        }
        QueryType::Instant => {
            params.push(("time".to_string(), unix_seconds(start_at)));
            Ok(("/api/v1/query", params))
        }
    }
}

fn query_prometheus<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let uid = required_string(args, "datasourceUid")?;
        let expr = required_string(args, "expr")?;
        let start = required_string(args, "startTime")?;
        let end = arg_optional_string(args, "endTime")?;
        let step = arg_optional_u64(args, "stepSeconds")?;
        let query_type = QueryType::parse(arg_optional_string(args, "queryType")?.as_deref())?;
        let (path, params) = query_params(&expr, query_type, &start, end.as_deref(), step)?;

        let uid = ensure_datasource(ctx, &uid).await?;
        let mut data = prometheus_get(ctx, &uid, path, &params).await?;
        let result_type = data.get("resultType").cloned().unwrap_or(Value::Null);
        let results = data
            .as_object_mut()
            .and_then(|data| data.remove("result"))
            .unwrap_or_else(|| json!([]));

        Ok(ctx.respond(
            results,
            echo([
                ("datasourceUid", Value::String(uid)),
                ("expr", Value::String(expr)),
                ("queryType", json!(if query_type == QueryType::Range { "range" } else { "instant" })),
                ("resultType", result_type),
            ]),
        ))
    })
}

fn list_metric_metadata<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let uid = required_string(args, "datasourceUid")?;
        let metric = arg_optional_string(args, "metric")?;
        let limit = arg_optional_u64(args, "limit")?;
        let mut params = Vec::new();
        if let Some(metric) = &metric {
            params.push(("metric".to_string(), metric.clone()));
        }
        if let Some(limit) = limit.filter(|limit| *limit > 0) {
            params.push(("limit".to_string(), limit.to_string()));
        }

        let uid = ensure_datasource(ctx, &uid).await?;
        let data = prometheus_get(ctx, &uid, "/api/v1/metadata", &params).await?;
        Ok(ctx.respond(
            data,
            echo([("datasourceUid", Value::String(uid)), ("metric", json!(metric))]),
        ))
    })
}

/// `match[]`, `start` and `end` pairs shared by the label endpoints.
fn label_query(args: &Map<String, Value>) -> Result<Vec<(String, String)>> {
    let now = Utc::now();
    let mut params: Vec<(String, String)> = parse_selectors("matches", args.get("matches"))?
        .iter()
        .map(|selector| ("match[]".to_string(), selector.to_promql()))
        .collect();
    for (field, key) in [("startRfc3339", "start"), ("endRfc3339", "end")] {
        if let Some(raw) = arg_optional_string(args, field)? {
            let at = parse_time_expression(field, &raw, now)?;
            params.push((key.to_string(), unix_seconds(at)));
        }
    }
    Ok(params)
}

async fn label_values(
    ctx: &ToolContext,
    uid: &str,
    label: &str,
    params: &[(String, String)],
) -> Result<Vec<Value>> {
    let label = path_segment("labelName", label)?;
    let path = format!("/api/v1/label/{label}/values");
    let data = prometheus_get(ctx, uid, &path, params).await?;
    Ok(string_items(&data))
}

fn list_label_names<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let uid = required_string(args, "datasourceUid")?;
        let params = label_query(args)?;
        let uid = ensure_datasource(ctx, &uid).await?;
        let data = prometheus_get(ctx, &uid, "/api/v1/labels", &params).await?;
        Ok(ctx.respond(
            Value::Array(string_items(&data)),
            echo([("datasourceUid", Value::String(uid))]),
        ))
    })
}

fn list_label_values<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let uid = required_string(args, "datasourceUid")?;
        let label = required_string(args, "labelName")?;
        let params = label_query(args)?;
        let uid = ensure_datasource(ctx, &uid).await?;
        let values = label_values(ctx, &uid, &label, &params).await?;
        Ok(ctx.respond(
            Value::Array(values),
            echo([
                ("datasourceUid", Value::String(uid)),
                ("labelName", Value::String(label)),
            ]),
        ))
    })
}

fn list_metric_names<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let uid = required_string(args, "datasourceUid")?;
        let pattern = arg_optional_string(args, "regex")?
            .map(|raw| {
                Regex::new(&raw)
                    .map_err(|err| Error::validation("regex", format!("invalid regex: {err}")))
            })
            .transpose()?;
        let limit = arg_optional_u64(args, "limit")?.unwrap_or(DEFAULT_METRIC_LIMIT);
        let page = arg_optional_u64(args, "page")?.unwrap_or(1);

        let uid = ensure_datasource(ctx, &uid).await?;
        let names: Vec<Value> = label_values(ctx, &uid, "__name__", &[])
            .await?
            .into_iter()
            .filter(|name| {
                pattern
                    .as_ref()
                    .is_none_or(|re| name.as_str().is_some_and(|n| re.is_match(n)))
            })
            .collect();
        let page_items = paginate(&names, limit, page)?;

        Ok(ctx.respond(
            Value::Array(page_items),
            echo([
                ("datasourceUid", Value::String(uid)),
                ("regex", json!(pattern.as_ref().map(Regex::as_str))),
                ("limit", json!(limit)),
                ("page", json!(page)),
            ]),
        ))
    })
}
