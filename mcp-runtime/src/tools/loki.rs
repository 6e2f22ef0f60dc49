use chrono::Utc;
use grafana_mcp_core::envelope::EnvelopeSpec;
use grafana_mcp_core::error::{Error, Result};
use serde_json::{Map, Value, json};

use crate::args::{arg_optional_string, arg_optional_u64, echo, path_segment, required_string};
use crate::capabilities::Capability;
use crate::registry::{ParamKind, ParamSpec, ToolContext, ToolDescriptor, ToolFuture};
use crate::tools::time::{time_window, unix_nanos};
use crate::tools::{ensure_datasource, proxy_path, string_items, success_data};

pub const LOG_RESULTS: EnvelopeSpec = EnvelopeSpec::new("loki_log_results", "log_entries");
pub const LABEL_NAMES: EnvelopeSpec = EnvelopeSpec::new("loki_label_names_result", "labels");
pub const LABEL_VALUES: EnvelopeSpec = EnvelopeSpec::new("loki_label_values_result", "values");
pub const STATS: EnvelopeSpec = EnvelopeSpec::object("loki_stats");

const MAX_LOG_LIMIT: u64 = 100;
const DEFAULT_LOG_LIMIT: u64 = 10;

fn base(tool: ToolDescriptor) -> ToolDescriptor {
    tool.with_capability(Capability::Loki).with_param(ParamSpec::required(
        "datasourceUid",
        ParamKind::String,
        "UID of the Loki datasource",
    ))
}

fn window(tool: ToolDescriptor) -> ToolDescriptor {
    tool.with_param(ParamSpec::optional(
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

pub fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        window(
            base(ToolDescriptor::new(
                "query_loki_logs",
                "Query Loki logs",
                "Execute a LogQL query against a Loki datasource and return matching log \
                 entries with their labels.",
                LOG_RESULTS,
                query_loki_logs,
            ))
            .with_param(ParamSpec::required("logql", ParamKind::String, "LogQL query")),
        )
        .with_param(ParamSpec::optional(
            "limit",
            ParamKind::Integer,
            "Maximum entries, 1 to 100 (default 10)",
        ))
        .with_param(ParamSpec::optional(
            "direction",
            ParamKind::String,
            "'backward' (default, newest first) or 'forward'",
        )),
        window(base(ToolDescriptor::new(
            "list_loki_label_names",
            "List Loki label names",
            "List the label keys present in a Loki datasource.",
            LABEL_NAMES,
            list_label_names,
        ))),
        window(
            base(ToolDescriptor::new(
                "list_loki_label_values",
                "List Loki label values",
                "List the values of one label in a Loki datasource.",
                LABEL_VALUES,
                list_label_values,
            ))
            .with_param(ParamSpec::required("labelName", ParamKind::String, "Label name")),
        ),
        window(
            base(ToolDescriptor::new(
                "query_loki_stats",
                "Get Loki log statistics",
                "Return stream, chunk, entry and byte counts for a LogQL selector.",
                STATS,
                query_loki_stats,
            ))
            .with_param(ParamSpec::required("logql", ParamKind::String, "LogQL selector")),
        ),
    ]
}

fn clamp_limit(requested: Option<u64>) -> u64 {
    requested.map_or(DEFAULT_LOG_LIMIT, |limit| limit.clamp(1, MAX_LOG_LIMIT))
}

/// Flatten streams into entries. Lines that parse as a JSON number become
/// `value` entries (metric queries); everything else is kept as `line`.
fn format_entries(streams: &Value) -> Vec<Value> {
    let Some(streams) = streams.as_array() else {
        return Vec::new();
    };
    let mut entries = Vec::new();
    for stream in streams.iter().filter_map(Value::as_object) {
        let labels = stream
            .get("stream")
            .filter(|labels| labels.is_object())
            .cloned()
            .unwrap_or_else(|| json!({}));
        let Some(values) = stream.get("values").and_then(Value::as_array) else {
            continue;
        };
        for pair in values.iter().filter_map(Value::as_array) {
            let [timestamp, raw, ..] = pair.as_slice() else {
                continue;
            };
            let timestamp = match timestamp {
                Value::String(ts) => ts.clone(),
                other => other.to_string(),
            };
            let parsed = raw
                .as_str()
                .and_then(|text| serde_json::from_str::<Value>(text).ok());
            let entry = match parsed.as_ref().and_then(Value::as_f64) {
                Some(number) => json!({"timestamp": timestamp, "value": number, "labels": labels}),
                None => {
                    let line = match raw {
                        Value::String(text) => text.clone(),
                        other => other.to_string(),
                    };
                    json!({"timestamp": timestamp, "line": line, "labels": labels})
                }
            };
            entries.push(entry);
        }
    }
    entries
}

fn query_loki_logs<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let uid = required_string(args, "datasourceUid")?;
        let logql = required_string(args, "logql")?;
        let limit = clamp_limit(arg_optional_u64(args, "limit")?);
        let direction = arg_optional_string(args, "direction")?
            .unwrap_or_else(|| "backward".to_string());
        if !matches!(direction.as_str(), "backward" | "forward") {
            return Err(Error::validation(
                "direction",
                "direction must be 'backward' or 'forward'",
            ));
        }
        let (start, end) = time_window(args, Utc::now())?;

        let uid = ensure_datasource(ctx, &uid).await?;
        let params = vec![
            ("query".to_string(), logql.clone()),
            ("start".to_string(), unix_nanos(start)),
            ("end".to_string(), unix_nanos(end)),
            ("limit".to_string(), limit.to_string()),
            ("direction".to_string(), direction.clone()),
        ];
        let payload = ctx
            .client()
            .get_json(&proxy_path(&uid, "/loki/api/v1/query_range"), &params)
            .await?;
        let data = success_data("Loki", payload)?;
        let entries = format_entries(data.get("result").unwrap_or(&Value::Null));

        Ok(ctx.respond(
            Value::Array(entries),
            echo([
                ("datasourceUid", Value::String(uid)),
                ("logql", Value::String(logql)),
                ("limit", json!(limit)),
                ("direction", Value::String(direction)),
            ]),
        ))
    })
}

async fn label_items(
    ctx: &ToolContext,
    uid: &str,
    path: &str,
    args: &Map<String, Value>,
) -> Result<Vec<Value>> {
    let mut params = Vec::new();
    if args.get("startRfc3339").is_some_and(|v| !v.is_null())
        || args.get("endRfc3339").is_some_and(|v| !v.is_null())
    {
        let (start, end) = time_window(args, Utc::now())?;
        params.push(("start".to_string(), unix_nanos(start)));
        params.push(("end".to_string(), unix_nanos(end)));
    }
    let payload = ctx.client().get_json(&proxy_path(uid, path), &params).await?;
    let data = success_data("Loki", payload)?;
    match data {
        Value::Null => Ok(Vec::new()),
        Value::Array(_) => Ok(string_items(&data)),
        _ => Err(Error::ToolExecution(
            "unexpected Loki label response format".to_string(),
        )),
    }
}

fn list_label_names<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let uid = required_string(args, "datasourceUid")?;
        let uid = ensure_datasource(ctx, &uid).await?;
        let labels = label_items(ctx, &uid, "/loki/api/v1/labels", args).await?;
        Ok(ctx.respond(
            Value::Array(labels),
            echo([("datasourceUid", Value::String(uid))]),
        ))
    })
}

fn list_label_values<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let uid = required_string(args, "datasourceUid")?;
        let label = required_string(args, "labelName")?;
        let path = format!("/loki/api/v1/label/{}/values", path_segment("labelName", &label)?);
        let uid = ensure_datasource(ctx, &uid).await?;
        let values = label_items(ctx, &uid, &path, args).await?;
        Ok(ctx.respond(
            Value::Array(values),
            echo([
                ("datasourceUid", Value::String(uid)),
                ("labelName", Value::String(label)),
            ]),
        ))
    })
}

fn query_loki_stats<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let uid = required_string(args, "datasourceUid")?;
        let logql = required_string(args, "logql")?;
        let (start, end) = time_window(args, Utc::now())?;
        let uid = ensure_datasource(ctx, &uid).await?;
        let params = vec![
            ("query".to_string(), logql.clone()),
            ("start".to_string(), unix_nanos(start)),
            ("end".to_string(), unix_nanos(end)),
        ];
        let stats = ctx
            .client()
            .get_json(&proxy_path(&uid, "/loki/api/v1/index/stats"), &params)
            .await?;
        if !stats.is_object() {
            return Err(Error::ToolExecution(
                "unexpected Loki stats response".to_string(),
            ));
        }
        Ok(ctx.respond(
            stats,
            echo([
                ("datasourceUid", Value::String(uid)),
                ("logql", Value::String(logql)),
            ]),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use chrono::{Duration, TimeZone};
    use mockito::Matcher;

    use crate::tools::default_registry;
    use crate::tools::test_support::context;

    #[test]
    fn limit_is_clamped() {
        assert_eq!(clamp_limit(None), 10);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(50)), 50);
        assert_eq!(clamp_limit(Some(5000)), 100);
    }

    #[test]
    fn default_window_is_last_hour() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("date");
        let (start, end) = time_window(&Map::new(), now).expect("window");
        assert_eq!(end, now);
        assert_eq!(end - start, Duration::hours(1));
    }

    #[test]
    fn entries_distinguish_lines_from_sample_values() {
        let streams = json!([
            {"stream": {"app": "api"}, "values": [["1714564800000000000", "GET /health 200"], ["1714564801000000000", "42"]]},
            {"stream": "bad", "values": [["1", "{\"level\":\"info\"}"], ["short"]]}
        ]);
        let entries = format_entries(&streams);
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[0],
            json!({"timestamp": "1714564800000000000", "line": "GET /health 200", "labels": {"app": "api"}})
        );
        assert_eq!(entries[1]["value"], json!(42.0));
        assert_eq!(entries[2]["line"], json!("{\"level\":\"info\"}"));
        assert_eq!(entries[2]["labels"], json!({}));
    }

    #[tokio::test]
    async fn query_range_sends_clamped_limit_and_direction() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/datasources/uid/logs")
            .with_status(200)
            .with_body(r#"{"uid":"logs","type":"loki"}"#)
            .create_async()
            .await;
        let query = server
            .mock("GET", "/api/datasources/proxy/uid/logs/loki/api/v1/query_range")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("query".into(), r#"{app="api"}"#.into()),
                Matcher::UrlEncoded("limit".into(), "100".into()),
                Matcher::UrlEncoded("direction".into(), "backward".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"status":"success","data":{"resultType":"streams","result":[{"stream":{"app":"api"},"values":[["1","hello"]]}]}}"#,
            )
            .create_async()
            .await;

        let registry = default_registry().expect("registry");
        let envelope = registry
            .dispatch(
                "query_loki_logs",
                &echo([
                    ("datasourceUid", json!("logs")),
                    ("logql", json!(r#"{app="api"}"#)),
                    ("limit", json!(1000)),
                ]),
                context(&server.url()),
                &BTreeSet::from([Capability::Loki]),
            )
            .await
            .expect("logs");
        assert_eq!(envelope.kind(), "loki_log_results");
        assert_eq!(envelope.total_count(), Some(1));
        assert_eq!(envelope.get("limit"), Some(&json!(100)));
        query.assert_async().await;
    }

    #[tokio::test]
    async fn label_values_without_window_send_no_time() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/datasources/uid/logs")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        server
            .mock("GET", "/api/datasources/proxy/uid/logs/loki/api/v1/label/app/values")
            .with_status(200)
            .with_body(r#"{"status":"success","data":["api","worker"]}"#)
            .create_async()
            .await;

        let registry = default_registry().expect("registry");
        let envelope = registry
            .dispatch(
                "list_loki_label_values",
                &echo([("datasourceUid", json!("logs")), ("labelName", json!("app"))]),
                context(&server.url()),
                &BTreeSet::from([Capability::Loki]),
            )
            .await
            .expect("values");
        assert_eq!(envelope.get("values"), Some(&json!(["api", "worker"])));
        assert_eq!(envelope.kind(), "loki_label_values_result");
    }
}
