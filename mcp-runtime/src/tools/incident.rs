use grafana_mcp_core::envelope::EnvelopeSpec;
use grafana_mcp_core::error::{Error, Result};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value, json};

use crate::args::{arg_bool, arg_optional_string, arg_optional_u64, echo, required_string};
use crate::tools::time::parse_time_expression;
use crate::capabilities::{Capability, IRM_PLUGIN_ID};
use crate::registry::{ParamKind, ParamSpec, ToolContext, ToolDescriptor, ToolFuture};
use crate::tools::not_found_as;

pub const INCIDENTS: EnvelopeSpec = EnvelopeSpec::new("incidents_result", "incidents");
pub const INCIDENT: EnvelopeSpec = EnvelopeSpec::object("incident");
pub const INCIDENT_ACTIVITY: EnvelopeSpec = EnvelopeSpec::object("incident_activity");

const DEFAULT_LIMIT: u64 = 10;

pub fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(
            "list_incidents",
            "List incidents",
            "List Grafana incidents, newest first, with optional status filtering and drill \
             inclusion.",
            INCIDENTS,
            list_incidents,
        )
        .with_capability(Capability::Incident)
        .with_param(ParamSpec::optional(
            "limit",
            ParamKind::Integer,
            "Maximum incidents (default 10)",
        ))
        .with_param(ParamSpec::optional(
            "drill",
            ParamKind::Boolean,
            "Include drill incidents",
        ))
        .with_param(ParamSpec::optional(
            "status",
            ParamKind::String,
            "Incident status such as 'active' or 'resolved'",
        )),
        ToolDescriptor::new(
            "get_incident",
            "Get incident details",
            "Retrieve the full details of a Grafana incident by ID.",
            INCIDENT,
            get_incident,
        )
        .with_capability(Capability::Incident)
        .with_param(ParamSpec::required(
            "incidentId",
            ParamKind::String,
            "Incident ID",
        )),
        ToolDescriptor::new(
            "create_incident",
            "Create incident",
            "Declare a new Grafana incident. Set isDrill for exercises.",
            INCIDENT,
            create_incident,
        )
        .with_capability(Capability::Incident)
        .with_param(ParamSpec::required("title", ParamKind::String, "Incident title"))
        .with_param(ParamSpec::required(
            "severity",
            ParamKind::String,
            "Severity label, e.g. 'critical' or 'minor'",
        ))
        .with_param(ParamSpec::required(
            "roomPrefix",
            ParamKind::String,
            "Prefix for the incident's chat room name",
        ))
        .with_param(ParamSpec::optional(
            "isDrill",
            ParamKind::Boolean,
            "Mark the incident as a drill",
        ))
        .with_param(ParamSpec::optional(
            "status",
            ParamKind::String,
            "Initial status such as 'active'",
        ))
        .with_param(ParamSpec::optional(
            "attachCaption",
            ParamKind::String,
            "Caption for an attached link",
        ))
        .with_param(ParamSpec::optional(
            "attachUrl",
            ParamKind::String,
            "URL to attach to the incident",
        ))
        .with_param(ParamSpec::optional(
            "labels",
            ParamKind::Array,
            "Label objects such as {\"key\": \"team\", \"label\": \"db\"}",
        )),
        ToolDescriptor::new(
            "add_activity_to_incident",
            "Add activity to incident",
            "Add a note to an incident's activity timeline.",
            INCIDENT_ACTIVITY,
            add_activity_to_incident,
        )
        .with_capability(Capability::Incident)
        .with_param(ParamSpec::required(
            "incidentId",
            ParamKind::String,
            "Incident ID",
        ))
        .with_param(ParamSpec::required("body", ParamKind::String, "Note text"))
        .with_param(ParamSpec::optional(
            "eventTime",
            ParamKind::String,
            "When the noted event happened (RFC 3339 or now-<n><unit>); defaults to now",
        )),
    ]
}

/// The incident backend is an RPC-style plugin resource API.
async fn incident_rpc(ctx: &ToolContext, method: &str, payload: Value) -> Result<Value> {
    let path = format!("/plugins/{IRM_PLUGIN_ID}/resources/api/v1/{method}");
    let response = ctx.client().post_json(&path, &payload).await?;
    if !response.is_object() {
        return Err(Error::ToolExecution(format!(
            "unexpected response from incident API for {method}"
        )));
    }
    Ok(response)
}

fn query_string(include_drill: bool, status: Option<&str>) -> String {
    let mut parts = Vec::new();
    if !include_drill {
        parts.push("isdrill:false".to_string());
    }
    if let Some(status) = status {
        parts.push(format!("status:{status}"));
    }
    parts.join(" ")
}

fn list_incidents<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let limit = arg_optional_u64(args, "limit")?
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_LIMIT);
        let drill = arg_bool(args, "drill", false)?;
        let status = arg_optional_string(args, "status")?;

        let payload = json!({
            "query": {
                "limit": limit,
                "orderDirection": "DESC",
                "queryString": query_string(drill, status.as_deref()),
            }
        });
        let mut response =
            incident_rpc(ctx, "IncidentsService.QueryIncidentPreviews", payload).await?;
        let incidents = response
            .as_object_mut()
            .and_then(|body| body.remove("incidentPreviews"))
            .filter(Value::is_array)
            .unwrap_or_else(|| json!([]));

        Ok(ctx.respond(
            incidents,
            echo([
                ("limit", json!(limit)),
                ("drill", json!(drill)),
                ("status", json!(status)),
            ]),
        ))
    })
}

fn get_incident<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let id = required_string(args, "incidentId")?;
        let incident = incident_rpc(ctx, "IncidentsService.GetIncident", json!({"incidentID": id}))
            .await
            .map_err(|err| not_found_as(err, || format!("incident with ID '{id}' not found")))?;
        Ok(ctx.respond(
            unwrap_field(incident, "incident"),
            echo([("incidentId", Value::String(id))]),
        ))
    })
}

/// RPC responses nest the interesting object under a single key.
fn unwrap_field(response: Value, key: &str) -> Value {
    match response {
        Value::Object(mut body) if body.get(key).is_some_and(Value::is_object) => {
            body.remove(key).unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn create_incident<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let title = required_string(args, "title")?;
        let severity = required_string(args, "severity")?;
        let room_prefix = required_string(args, "roomPrefix")?;
        let is_drill = arg_bool(args, "isDrill", false)?;
        let labels = match args.get("labels") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) if items.iter().all(Value::is_object) => items.clone(),
            Some(_) => {
                return Err(Error::validation(
                    "labels",
                    "'labels' must be an array of label objects",
                ));
            }
        };

        let payload = json!({
            "title": title,
            "severity": severity,
            "roomPrefix": room_prefix,
            "isDrill": is_drill,
            "status": arg_optional_string(args, "status")?,
            "attachCaption": arg_optional_string(args, "attachCaption")?,
            "attachUrl": arg_optional_string(args, "attachUrl")?,
            "labels": labels,
        });
        let response = incident_rpc(ctx, "IncidentsService.CreateIncident", payload).await?;
        let incident = unwrap_field(response, "incident");
        tracing::info!(
            event = "incident.created",
            incident_id = incident.get("incidentID").and_then(serde_json::Value::as_str),
            is_drill
        );
        Ok(ctx.respond(incident, echo([("isDrill", json!(is_drill))])))
    })
}

fn add_activity_to_incident<'a>(
    ctx: &'a ToolContext,
    args: &'a Map<String, Value>,
) -> ToolFuture<'a> {
    Box::pin(async move {
        let id = required_string(args, "incidentId")?;
        let body = required_string(args, "body")?;
        let now = Utc::now();
        let event_time = match arg_optional_string(args, "eventTime")? {
            Some(raw) => parse_time_expression("eventTime", &raw, now)?,
            None => now,
        };

        let payload = json!({
            "incidentID": id,
            "activityKind": "userNote",
            "body": body,
            "eventTime": event_time.to_rfc3339_opts(SecondsFormat::Millis, true),
        });
        let response = incident_rpc(ctx, "ActivityService.AddActivity", payload)
            .await
            .map_err(|err| not_found_as(err, || format!("incident with ID '{id}' not found")))?;
        Ok(ctx.respond(
            unwrap_field(response, "activityItem"),
            echo([("incidentId", Value::String(id))]),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use chrono::{DateTime, TimeZone};
    use mockito::Matcher;

    use crate::tools::default_registry;
    use crate::tools::test_support::context;

    #[test]
    fn query_string_composition() {
        assert_eq!(query_string(false, None), "isdrill:false");
        assert_eq!(query_string(false, Some("active")), "isdrill:false status:active");
        assert_eq!(query_string(true, None), "");
    }

    #[tokio::test]
    async fn list_posts_preview_query_and_wraps_previews() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock(
                "POST",
                "/api/plugins/grafana-irm-app/resources/api/v1/IncidentsService.QueryIncidentPreviews",
            )
            .match_body(Matcher::Json(json!({
                "query": {"limit": 5, "orderDirection": "DESC", "queryString": "isdrill:false status:active"}
            })))
            .with_status(200)
            .with_body(r#"{"incidentPreviews":[{"incidentID":"1","title":"DB down"}],"cursor":{}}"#)
            .create_async()
            .await;

        let registry = default_registry().expect("registry");
        let envelope = registry
            .dispatch(
                "list_incidents",
                &echo([("limit", json!(5)), ("status", json!("active"))]),
                context(&server.url()),
                &BTreeSet::from([Capability::Incident]),
            )
            .await
            .expect("incidents");
        assert_eq!(envelope.kind(), "incidents_result");
        assert_eq!(envelope.total_count(), Some(1));
        assert_eq!(envelope.get("status"), Some(&json!("active")));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn get_incident_unwraps_incident_object() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "POST",
                "/api/plugins/grafana-irm-app/resources/api/v1/IncidentsService.GetIncident",
            )
            .match_body(Matcher::Json(json!({"incidentID": "42"})))
            .with_status(200)
            .with_body(r#"{"incident":{"incidentID":"42","status":"active"}}"#)
            .create_async()
            .await;

        let registry = default_registry().expect("registry");
        let envelope = registry
            .dispatch(
                "get_incident",
                &echo([("incidentId", json!("42"))]),
                context(&server.url()),
                &BTreeSet::from([Capability::Incident]),
            )
            .await
            .expect("incident");
        assert_eq!(
            envelope.get("grafana_response"),
            Some(&json!({"incidentID": "42", "status": "active"}))
        );
        assert_eq!(envelope.get("incidentId"), Some(&json!("42")));
    }

    #[tokio::test]
    async fn create_sends_defaults_and_unwraps_incident() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock(
                "POST",
                "/api/plugins/grafana-irm-app/resources/api/v1/IncidentsService.CreateIncident",
            )
            .match_body(Matcher::Json(json!({
                "title": "DB down",
                "severity": "critical",
                "roomPrefix": "inc",
                "isDrill": false,
                "status": "active",
                "attachCaption": null,
                "attachUrl": null,
                "labels": [{"key": "team", "label": "db"}]
            })))
            .with_status(200)
            .with_body(r#"{"incident":{"incidentID":"7","title":"DB down"}}"#)
            .expect(1)
            .create_async()
            .await;

        let registry = default_registry().expect("registry");
        let envelope = registry
            .dispatch(
                "create_incident",
                &echo([
                    ("title", json!("DB down")),
                    ("severity", json!("critical")),
                    ("roomPrefix", json!("inc")),
                    ("status", json!("active")),
                    ("labels", json!([{"key": "team", "label": "db"}])),
                ]),
                context(&server.url()),
                &BTreeSet::from([Capability::Incident]),
            )
            .await
            .expect("created");
        assert_eq!(envelope.kind(), "incident");
        assert_eq!(
            envelope.get("grafana_response"),
            Some(&json!({"incidentID": "7", "title": "DB down"}))
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn create_rejects_scalar_labels_before_calling_grafana() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock(
                "POST",
                "/api/plugins/grafana-irm-app/resources/api/v1/IncidentsService.CreateIncident",
            )
            .expect(0)
            .create_async()
            .await;

        let registry = default_registry().expect("registry");
        let err = registry
            .dispatch(
                "create_incident",
                &echo([
                    ("title", json!("DB down")),
                    ("severity", json!("critical")),
                    ("roomPrefix", json!("inc")),
                    ("labels", json!(["team:db"])),
                ]),
                context(&server.url()),
                &BTreeSet::from([Capability::Incident]),
            )
            .await
            .expect_err("bad labels");
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "labels"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn activity_is_posted_as_a_user_note() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock(
                "POST",
                "/api/plugins/grafana-irm-app/resources/api/v1/ActivityService.AddActivity",
            )
            .match_body(Matcher::Json(json!({
                "incidentID": "7",
                "activityKind": "userNote",
                "body": "Failover started",
                "eventTime": "2024-05-01T10:00:00.000Z"
            })))
            .with_status(200)
            .with_body(r#"{"activityItem":{"activityItemID":"a1","body":"Failover started"}}"#)
            .expect(1)
            .create_async()
            .await;

        let registry = default_registry().expect("registry");
        let envelope = registry
            .dispatch(
                "add_activity_to_incident",
                &echo([
                    ("incidentId", json!("7")),
                    ("body", json!("Failover started")),
                    ("eventTime", json!("2024-05-01T10:00:00Z")),
                ]),
                context(&server.url()),
                &BTreeSet::from([Capability::Incident]),
            )
            .await
            .expect("activity");
        assert_eq!(envelope.kind(), "incident_activity");
        assert_eq!(envelope.get("incidentId"), Some(&json!("7")));
        assert_eq!(
            envelope.get("grafana_response").map(|item| &item["activityItemID"]),
            Some(&json!("a1"))
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn activity_defaults_event_time_to_now() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "POST",
                "/api/plugins/grafana-irm-app/resources/api/v1/ActivityService.AddActivity",
            )
            .with_status(200)
            .with_body_from_request(|request| {
                let body: Value = serde_json::from_slice(request.body().expect("body"))
                    .expect("json body");
                json!({"activityItem": {"eventTime": body["eventTime"]}})
                    .to_string()
                    .into()
            })
            .create_async()
            .await;

        let before = Utc::now();
        let registry = default_registry().expect("registry");
        let envelope = registry
            .dispatch(
                "add_activity_to_incident",
                &echo([("incidentId", json!("7")), ("body", json!("note"))]),
                context(&server.url()),
                &BTreeSet::from([Capability::Incident]),
            )
            .await
            .expect("activity");
        let sent = envelope
            .get("grafana_response")
            .and_then(|item| item["eventTime"].as_str())
            .expect("event time");
        let sent = DateTime::parse_from_rfc3339(sent).expect("rfc3339");
        let floor = Utc
            .timestamp_millis_opt(before.timestamp_millis())
            .single()
            .expect("millis");
        assert!(sent.with_timezone(&Utc) >= floor);
    }
}
