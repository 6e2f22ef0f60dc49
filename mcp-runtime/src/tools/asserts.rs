use chrono::{DateTime, Utc};
use grafana_mcp_core::envelope::EnvelopeSpec;
use grafana_mcp_core::error::{Error, Result};
use serde_json::{Map, Value, json};

use crate::args::{arg_optional_string, echo, required_string};
use crate::capabilities::{ASSERTS_PLUGIN_ID, Capability};
use crate::registry::{ParamKind, ParamSpec, ToolContext, ToolDescriptor, ToolFuture};
use crate::tools::time::parse_time_expression;

pub const ASSERTIONS: EnvelopeSpec = EnvelopeSpec::object("assertions_summary");

const ALERT_CATEGORIES: [&str; 5] = ["saturation", "amend", "anomaly", "failure", "error"];

pub fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(
            "get_assertions",
            "Get assertions summary",
            "Summarize the Grafana Asserts assertions raised for one entity (service, node, \
             pod...) over a time range.",
            ASSERTIONS,
            get_assertions,
        )
        .with_capability(Capability::Asserts)
        .with_param(ParamSpec::required(
            "startTime",
            ParamKind::String,
            "Start of the range: RFC 3339, now-<n><unit>, or epoch milliseconds",
        ))
        .with_param(ParamSpec::required(
            "endTime",
            ParamKind::String,
            "End of the range: RFC 3339, now-<n><unit>, or epoch milliseconds",
        ))
        .with_param(ParamSpec::required(
            "entityType",
            ParamKind::String,
            "Entity type such as 'Service' or 'Node'",
        ))
        .with_param(ParamSpec::required(
            "entityName",
            ParamKind::String,
            "Entity name",
        ))
        .with_param(ParamSpec::optional("env", ParamKind::String, "Environment scope"))
        .with_param(ParamSpec::optional("site", ParamKind::String, "Site scope"))
        .with_param(ParamSpec::optional(
            "namespace",
            ParamKind::String,
            "Namespace scope",
        )),
    ]
}

/// Epoch milliseconds from a digit string or a time expression.
fn epoch_millis(field: &str, raw: &str, now: DateTime<Utc>) -> Result<i64> {
    let raw = raw.trim();
    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw
            .parse()
            .map_err(|_| Error::validation(field, format!("'{raw}' is out of range")));
    }
    Ok(parse_time_expression(field, raw, now)?.timestamp_millis())
}

fn assertions_request(args: &Map<String, Value>, now: DateTime<Utc>) -> Result<Value> {
    let start = epoch_millis("startTime", &required_string(args, "startTime")?, now)?;
    let end = epoch_millis("endTime", &required_string(args, "endTime")?, now)?;
    if start >= end {
        return Err(Error::validation(
            "startTime",
            "start time must be before end time",
        ));
    }

    let mut scope = Map::new();
    for key in ["env", "site", "namespace"] {
        if let Some(value) = arg_optional_string(args, key)? {
            scope.insert(key.to_string(), Value::String(value));
        }
    }

    Ok(json!({
        "startTime": start,
        "endTime": end,
        "entityKeys": [{
            "name": required_string(args, "entityName")?,
            "type": required_string(args, "entityType")?,
            "scope": scope,
        }],
        "suggestionSrcEntities": [],
        "alertCategories": ALERT_CATEGORIES,
    }))
}

fn get_assertions<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let request = assertions_request(args, Utc::now())?;
        let path = format!(
            "/plugins/{ASSERTS_PLUGIN_ID}/resources/asserts/api-server/v1/assertions/llm-summary"
        );
        let summary = ctx.client().post_json(&path, &request).await?;
        let entity = &request["entityKeys"][0];
        Ok(ctx.respond(
            summary,
            echo([
                ("entityType", entity["type"].clone()),
                ("entityName", entity["name"].clone()),
                ("startTime", request["startTime"].clone()),
                ("endTime", request["endTime"].clone()),
            ]),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use chrono::TimeZone;
    use mockito::Matcher;

    use crate::tools::default_registry;
    use crate::tools::test_support::context;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("valid date")
    }

    #[test]
    fn request_scopes_only_given_keys() {
        let args = echo([
            ("startTime", json!("now-1h")),
            ("endTime", json!("1714564800000")),
            ("entityType", json!("Service")),
            ("entityName", json!("checkout")),
            ("namespace", json!("shop")),
            ("site", json!("  ")),
        ]);
        let request = assertions_request(&args, fixed_now()).expect("request");
        assert_eq!(request["startTime"], json!(1_714_561_200_000_i64));
        assert_eq!(request["endTime"], json!(1_714_564_800_000_i64));
        assert_eq!(
            request["entityKeys"],
            json!([{"name": "checkout", "type": "Service", "scope": {"namespace": "shop"}}])
        );
        assert_eq!(request["alertCategories"].as_array().map(Vec::len), Some(5));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let args = echo([
            ("startTime", json!("now")),
            ("endTime", json!("now-1h")),
            ("entityType", json!("Service")),
            ("entityName", json!("checkout")),
        ]);
        let err = assertions_request(&args, fixed_now()).expect_err("inverted");
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "startTime"));
    }

    #[tokio::test]
    async fn summary_text_is_returned_in_the_envelope() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock(
                "POST",
                "/api/plugins/grafana-asserts-app/resources/asserts/api-server/v1/assertions/llm-summary",
            )
            .match_body(Matcher::PartialJson(json!({
                "startTime": 1_714_550_400_000_i64,
                "endTime": 1_714_564_800_000_i64,
                "entityKeys": [{"name": "checkout", "type": "Service", "scope": {"env": "prod"}}]
            })))
            .with_status(200)
            .with_body("checkout had 2 latency assertions")
            .expect(1)
            .create_async()
            .await;

        let registry = default_registry().expect("registry");
        let envelope = registry
            .dispatch(
                "get_assertions",
                &echo([
                    ("startTime", json!("2024-05-01T08:00:00Z")),
                    ("endTime", json!("2024-05-01T12:00:00Z")),
                    ("entityType", json!("Service")),
                    ("entityName", json!("checkout")),
                    ("env", json!("prod")),
                ]),
                context(&server.url()),
                &BTreeSet::from([Capability::Asserts]),
            )
            .await
            .expect("assertions");
        assert_eq!(envelope.kind(), "assertions_summary");
        assert_eq!(
            envelope.get("grafana_response"),
            Some(&json!("checkout had 2 latency assertions"))
        );
        assert_eq!(envelope.get("entityName"), Some(&json!("checkout")));
        mock.assert_async().await;
    }
}
