use grafana_mcp_core::envelope::EnvelopeSpec;
use grafana_mcp_core::error::Error;
use serde_json::{Map, Value, json};

use crate::args::{arg_optional_string, echo, path_segment, required_string};
use crate::registry::{ParamKind, ParamSpec, ToolContext, ToolDescriptor, ToolFuture};
use crate::tools::not_found_as;

pub const DATASOURCES: EnvelopeSpec = EnvelopeSpec::new("datasources_result", "datasources");
pub const DATASOURCE: EnvelopeSpec = EnvelopeSpec::object("datasource");

pub fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(
            "list_datasources",
            "List datasources",
            "List Grafana datasources, optionally filtered by a substring of the datasource type \
             such as 'prometheus' or 'loki'.",
            DATASOURCES,
            list_datasources,
        )
        .with_param(ParamSpec::optional(
            "datasourceType",
            ParamKind::String,
            "Substring of the datasource type to keep",
        )),
        ToolDescriptor::new(
            "get_datasource_by_uid",
            "Get datasource by UID",
            "Retrieve full metadata for a datasource by its UID.",
            DATASOURCE,
            get_datasource_by_uid,
        )
        .with_param(ParamSpec::required("uid", ParamKind::String, "Datasource UID")),
        ToolDescriptor::new(
            "get_datasource_by_name",
            "Get datasource by name",
            "Retrieve full metadata for a datasource by its configured name.",
            DATASOURCE,
            get_datasource_by_name,
        )
        .with_param(ParamSpec::required("name", ParamKind::String, "Datasource name")),
    ]
}

fn summarize(datasource: &Value) -> Value {
    json!({
        "id": datasource.get("id"),
        "uid": datasource.get("uid"),
        "name": datasource.get("name"),
        "type": datasource.get("type"),
        "isDefault": datasource.get("isDefault"),
    })
}

fn filter_by_type(datasources: &[Value], wanted: Option<&str>) -> Vec<Value> {
    let wanted = wanted.map(str::to_ascii_lowercase);
    datasources
        .iter()
        .filter(|ds| match &wanted {
            None => true,
            Some(needle) => ds
                .get("type")
                .and_then(Value::as_str)
                .is_some_and(|ty| ty.to_ascii_lowercase().contains(needle.as_str())),
        })
        .map(summarize)
        .collect()
}

fn list_datasources<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let wanted = arg_optional_string(args, "datasourceType")?;
        let raw = ctx.client().get_json("/datasources", &[]).await?;
        let Some(all) = raw.as_array() else {
            return Err(Error::ToolExecution(
                "unexpected response format from Grafana while listing datasources".to_string(),
            ));
        };
        let datasources = filter_by_type(all, wanted.as_deref());
        Ok(ctx.respond(
            Value::Array(datasources),
            echo([("datasourceType", json!(wanted))]),
        ))
    })
}

fn get_datasource_by_uid<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let uid = required_string(args, "uid")?;
        let path = format!("/datasources/uid/{}", path_segment("uid", &uid)?);
        let raw = ctx
            .client()
            .get_json(&path, &[])
            .await
            .map_err(|err| not_found_as(err, || format!("datasource with UID '{uid}' not found")))?;
        Ok(ctx.respond(raw, echo([("uid", Value::String(uid))])))
    })
}

fn get_datasource_by_name<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let name = required_string(args, "name")?;
        let path = format!("/datasources/name/{}", path_segment("name", &name)?);
        let raw = ctx.client().get_json(&path, &[]).await.map_err(|err| {
            not_found_as(err, || format!("datasource with name '{name}' not found"))
        })?;
        Ok(ctx.respond(raw, echo([("name", Value::String(name))])))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use crate::tools::default_registry;
    use crate::tools::test_support::context;

    #[test]
    fn type_filter_is_case_insensitive_substring() {
        let all = vec![
            json!({"id": 1, "uid": "p", "name": "Prom", "type": "prometheus", "isDefault": true, "url": "x"}),
            json!({"id": 2, "uid": "l", "name": "Logs", "type": "loki"}),
        ];
        let kept = filter_by_type(&all, Some("PROM"));
        assert_eq!(kept.len(), 1);
        assert_eq!(
            kept[0],
            json!({"id": 1, "uid": "p", "name": "Prom", "type": "prometheus", "isDefault": true})
        );
        assert_eq!(filter_by_type(&all, None).len(), 2);
    }

    #[tokio::test]
    async fn list_envelope_counts_filtered_items() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/datasources")
            .with_status(200)
            .with_body(r#"[{"uid":"p","type":"prometheus"},{"uid":"l","type":"loki"}]"#)
            .create_async()
            .await;

        let registry = default_registry().expect("registry");
        let envelope = registry
            .dispatch(
                "list_datasources",
                &echo([("datasourceType", json!("loki"))]),
                context(&server.url()),
                &BTreeSet::new(),
            )
            .await
            .expect("list");
        assert_eq!(envelope.kind(), "datasources_result");
        assert_eq!(envelope.total_count(), Some(1));
        assert_eq!(envelope.get("datasourceType"), Some(&json!("loki")));
    }

    #[tokio::test]
    async fn missing_datasource_names_the_uid() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/datasources/uid/gone")
            .with_status(404)
            .with_body(r#"{"message":"Data source not found"}"#)
            .create_async()
            .await;

        let registry = default_registry().expect("registry");
        let err = registry
            .dispatch(
                "get_datasource_by_uid",
                &echo([("uid", json!("gone"))]),
                context(&server.url()),
                &BTreeSet::new(),
            )
            .await
            .expect_err("404");
        assert_eq!(
            err,
            Error::Upstream {
                status: 404,
                message: "datasource with UID 'gone' not found".to_string()
            }
        );
    }
}
