//! Sift investigations. Reads go straight to the investigation API; the
//! `find_*` tools start a single-check investigation and wait for its
//! analysis.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use grafana_mcp_core::envelope::{EnvelopeSpec, ResponseEnvelope};
use grafana_mcp_core::error::{Error, Result};
use serde_json::{Map, Value, json};
use tokio::time::Instant;

use crate::args::{
    arg_optional_object, arg_optional_string, arg_optional_u64, echo, path_segment,
    required_string,
};
use crate::capabilities::{Capability, SIFT_PLUGIN_ID};
use crate::registry::{ParamKind, ParamSpec, ToolContext, ToolDescriptor, ToolFuture};
use crate::tools::time::parse_time_expression;

pub const INVESTIGATIONS: EnvelopeSpec =
    EnvelopeSpec::new("sift_investigations", "investigations");
pub const INVESTIGATION: EnvelopeSpec = EnvelopeSpec::object("sift_investigation");
pub const ANALYSIS: EnvelopeSpec = EnvelopeSpec::object("sift_analysis");

const DEFAULT_LIMIT: u64 = 10;
const DEFAULT_WINDOW_MINUTES: i64 = 30;

const ERROR_PATTERN_LOGS: &str = "ErrorPatternLogs";
const SLOW_REQUESTS: &str = "SlowRequests";

/// How a check waits for its investigation to finish.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Polling {
    pub interval: Duration,
    pub timeout: Duration,
}

const DEFAULT_POLLING: Polling = Polling {
    interval: Duration::from_secs(5),
    timeout: Duration::from_secs(300),
};

fn investigation_id_param() -> ParamSpec {
    ParamSpec::required("investigationId", ParamKind::String, "Investigation ID")
}

fn check_params(descriptor: ToolDescriptor) -> ToolDescriptor {
    descriptor
        .with_capability(Capability::Sift)
        .with_param(ParamSpec::required(
            "name",
            ParamKind::String,
            "Name for the investigation",
        ))
        .with_param(ParamSpec::required(
            "labels",
            ParamKind::Object,
            "Label matchers scoping the check, e.g. {\"service\": \"checkout\"}",
        ))
        .with_param(ParamSpec::optional(
            "startRfc3339",
            ParamKind::String,
            "Start of the window (default 30 minutes before end)",
        ))
        .with_param(ParamSpec::optional(
            "endRfc3339",
            ParamKind::String,
            "End of the window (default now)",
        ))
}

pub fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(
            "list_sift_investigations",
            "List Sift investigations",
            "List recent Sift investigations.",
            INVESTIGATIONS,
            list_sift_investigations,
        )
        .with_capability(Capability::Sift)
        .with_param(ParamSpec::optional(
            "limit",
            ParamKind::Integer,
            "Maximum investigations (default 10)",
        )),
        ToolDescriptor::new(
            "get_sift_investigation",
            "Get Sift investigation",
            "Retrieve a Sift investigation, including its status and request, by ID.",
            INVESTIGATION,
            get_sift_investigation,
        )
        .with_capability(Capability::Sift)
        .with_param(investigation_id_param()),
        ToolDescriptor::new(
            "get_sift_analysis",
            "Get Sift analysis",
            "Retrieve one analysis result from a Sift investigation.",
            ANALYSIS,
            get_sift_analysis,
        )
        .with_capability(Capability::Sift)
        .with_param(investigation_id_param())
        .with_param(ParamSpec::required(
            "analysisId",
            ParamKind::String,
            "Analysis ID",
        )),
        check_params(ToolDescriptor::new(
            "find_error_pattern_logs",
            "Find error pattern logs",
            "Run Sift's ErrorPatternLogs check over Loki logs matching the labels and return \
             the elevated error patterns it found. Waits for the investigation to finish.",
            ANALYSIS,
            find_error_pattern_logs,
        )),
        check_params(ToolDescriptor::new(
            "find_slow_requests",
            "Find slow requests",
            "Run Sift's SlowRequests check over Tempo traces matching the labels and return \
             the slow operations it found. Waits for the investigation to finish.",
            ANALYSIS,
            find_slow_requests,
        )),
    ]
}

fn sift_path(path: &str) -> String {
    format!("/plugins/{SIFT_PLUGIN_ID}/resources/sift/api/v1{path}")
}

/// Sift wraps results as `{"status": ..., "data": ...}`.
fn sift_data(payload: Value) -> Result<Value> {
    match payload {
        Value::Object(mut body) => Ok(match body.remove("data") {
            Some(data) if !data.is_null() => data,
            _ => Value::Object(body),
        }),
        _ => Err(Error::ToolExecution(
            "unexpected response from Sift API".to_string(),
        )),
    }
}

fn object_items(data: Value) -> Vec<Value> {
    match data {
        Value::Array(items) => items.into_iter().filter(Value::is_object).collect(),
        _ => Vec::new(),
    }
}

async fn fetch_investigation(ctx: &ToolContext, id: &str) -> Result<Value> {
    let path = sift_path(&format!("/investigations/{id}"));
    sift_data(ctx.client().get_json(&path, &[]).await?)
}

async fn fetch_analyses(ctx: &ToolContext, id: &str) -> Result<Vec<Value>> {
    let path = sift_path(&format!("/investigations/{id}/analyses"));
    Ok(object_items(sift_data(ctx.client().get_json(&path, &[]).await?)?))
}

fn list_sift_investigations<'a>(
    ctx: &'a ToolContext,
    args: &'a Map<String, Value>,
) -> ToolFuture<'a> {
    Box::pin(async move {
        let limit = arg_optional_u64(args, "limit")?
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_LIMIT);
        let payload = ctx
            .client()
            .get_json(
                &sift_path("/investigations"),
                &[("limit".to_string(), limit.to_string())],
            )
            .await?;
        let investigations = object_items(sift_data(payload)?);
        Ok(ctx.respond(
            Value::Array(investigations),
            echo([("limit", json!(limit))]),
        ))
    })
}

fn get_sift_investigation<'a>(
    ctx: &'a ToolContext,
    args: &'a Map<String, Value>,
) -> ToolFuture<'a> {
    Box::pin(async move {
        let id = path_segment("investigationId", &required_string(args, "investigationId")?)?;
        let investigation = fetch_investigation(ctx, &id).await?;
        Ok(ctx.respond(investigation, echo([("investigationId", Value::String(id))])))
    })
}

fn get_sift_analysis<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let id = path_segment("investigationId", &required_string(args, "investigationId")?)?;
        let analysis_id = required_string(args, "analysisId")?;
        let analysis = fetch_analyses(ctx, &id)
            .await?
            .into_iter()
            .find(|analysis| id_matches(analysis.get("id"), &analysis_id))
            .ok_or_else(|| {
                Error::ToolExecution(format!(
                    "analysis '{analysis_id}' not found in investigation '{id}'"
                ))
            })?;
        Ok(ctx.respond(
            analysis,
            echo([
                ("investigationId", Value::String(id)),
                ("analysisId", Value::String(analysis_id)),
            ]),
        ))
    })
}

/// IDs may come back as strings or numbers.
fn id_matches(value: Option<&Value>, wanted: &str) -> bool {
    match value {
        Some(Value::String(id)) => id == wanted,
        Some(Value::Number(id)) => id.to_string() == wanted,
        _ => false,
    }
}

/// A single-check investigation request.
#[derive(Debug)]
pub(crate) struct CheckRequest {
    name: String,
    labels: Map<String, Value>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl CheckRequest {
    fn from_args(args: &Map<String, Value>, now: DateTime<Utc>) -> Result<Self> {
        let name = required_string(args, "name")?;
        let labels = arg_optional_object(args, "labels")?
            .cloned()
            .ok_or_else(|| Error::validation("labels", "Missing required field 'labels'"))?;
        if let Some((key, _)) = labels.iter().find(|(_, value)| !value.is_string()) {
            return Err(Error::validation(
                "labels",
                format!("label '{key}' must have a string value"),
            ));
        }

        let end = match arg_optional_string(args, "endRfc3339")? {
            Some(raw) => parse_time_expression("endRfc3339", &raw, now)?,
            None => now,
        };
        let start = match arg_optional_string(args, "startRfc3339")? {
            Some(raw) => parse_time_expression("startRfc3339", &raw, now)?,
            None => end - chrono::Duration::minutes(DEFAULT_WINDOW_MINUTES),
        };
        if start >= end {
            return Err(Error::validation(
                "startRfc3339",
                "start time must be before end time",
            ));
        }
        Ok(Self {
            name,
            labels,
            start,
            end,
        })
    }

    fn body(&self, check: &str, grafana_url: &str) -> Value {
        json!({
            "name": self.name,
            "status": "pending",
            "grafanaUrl": grafana_url,
            "requestData": {
                "labels": self.labels,
                "start": self.start.to_rfc3339_opts(SecondsFormat::Secs, true),
                "end": self.end.to_rfc3339_opts(SecondsFormat::Secs, true),
                "checks": [check],
            },
        })
    }
}

async fn wait_for_completion(ctx: &ToolContext, id: &str, polling: Polling) -> Result<()> {
    let deadline = Instant::now() + polling.timeout;
    loop {
        let investigation = fetch_investigation(ctx, id).await?;
        let status = investigation
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_ascii_lowercase();
        match status.as_str() {
            "finished" => return Ok(()),
            "failed" => {
                return Err(Error::ToolExecution(format!(
                    "Sift investigation '{id}' failed"
                )));
            }
            _ => {}
        }
        if Instant::now() + polling.interval > deadline {
            return Err(Error::ToolExecution(format!(
                "timed out waiting for Sift investigation '{id}' to finish"
            )));
        }
        tracing::debug!(event = "sift.poll", investigation_id = id, status = %status);
        tokio::time::sleep(polling.interval).await;
    }
}

pub(crate) async fn run_check(
    ctx: &ToolContext,
    check: &str,
    request: &CheckRequest,
    polling: Polling,
) -> Result<Value> {
    let body = request.body(check, ctx.client().config().base_url_str());
    let created = sift_data(
        ctx.client()
            .post_json(&sift_path("/investigations"), &body)
            .await?,
    )?;
    let id = match created.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => {
            return Err(Error::ToolExecution(
                "Sift did not return an investigation ID".to_string(),
            ));
        }
    };
    let id = path_segment("investigationId", &id)?;
    tracing::info!(event = "sift.investigation_started", investigation_id = %id, check);

    wait_for_completion(ctx, &id, polling).await?;
    fetch_analyses(ctx, &id)
        .await?
        .into_iter()
        .find(|analysis| analysis.get("name").and_then(Value::as_str) == Some(check))
        .ok_or_else(|| {
            Error::ToolExecution(format!(
                "analysis '{check}' not found in investigation '{id}'"
            ))
        })
}

async fn respond_with_check(
    ctx: &ToolContext,
    args: &Map<String, Value>,
    check: &str,
) -> Result<ResponseEnvelope> {
    let request = CheckRequest::from_args(args, Utc::now())?;
    let analysis = run_check(ctx, check, &request, DEFAULT_POLLING).await?;
    Ok(ctx.respond(
        analysis,
        echo([
            ("name", Value::String(request.name.clone())),
            ("labels", Value::Object(request.labels.clone())),
        ]),
    ))
}

fn find_error_pattern_logs<'a>(
    ctx: &'a ToolContext,
    args: &'a Map<String, Value>,
) -> ToolFuture<'a> {
    Box::pin(respond_with_check(ctx, args, ERROR_PATTERN_LOGS))
}

fn find_slow_requests<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(respond_with_check(ctx, args, SLOW_REQUESTS))
}
