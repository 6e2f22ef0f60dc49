use grafana_mcp_core::envelope::EnvelopeSpec;
use grafana_mcp_core::error::{Error, Result};
use serde_json::{Map, Value, json};

use crate::args::{
    arg_bool, arg_optional_object, arg_optional_string, arg_optional_u64, echo, path_segment,
    required_string,
};
use crate::registry::{ParamKind, ParamSpec, ToolContext, ToolDescriptor, ToolFuture};
use crate::tools::json_path::{self, Edit};

pub const DASHBOARD: EnvelopeSpec = EnvelopeSpec::object("dashboard");
pub const DASHBOARD_SUMMARY: EnvelopeSpec = EnvelopeSpec::object("dashboard_summary");
pub const PANEL_QUERIES: EnvelopeSpec =
    EnvelopeSpec::new("dashboard_panel_queries", "panel_queries");
pub const DASHBOARD_PROPERTY: EnvelopeSpec = EnvelopeSpec::object("dashboard_property");
pub const DASHBOARD_UPDATE: EnvelopeSpec = EnvelopeSpec::object("dashboard_update");

fn uid_param() -> ParamSpec {
    ParamSpec::required("uid", ParamKind::String, "Dashboard UID")
}

fn force_refresh_param() -> ParamSpec {
    ParamSpec::optional(
        "forceRefresh",
        ParamKind::Boolean,
        "Bypass the per-session dashboard cache",
    )
}

pub fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(
            "get_dashboard_by_uid",
            "Get dashboard details",
            "Retrieve the complete dashboard payload, including metadata and panels, for a \
             dashboard UID.",
            DASHBOARD,
            get_dashboard_by_uid,
        )
        .with_param(uid_param())
        .with_param(force_refresh_param()),
        ToolDescriptor::new(
            "get_dashboard_summary",
            "Get dashboard summary",
            "Return a compact summary of a dashboard: panels, variables, time range and metadata.",
            DASHBOARD_SUMMARY,
            get_dashboard_summary,
        )
        .with_param(uid_param())
        .with_param(force_refresh_param()),
        ToolDescriptor::new(
            "get_dashboard_panel_queries",
            "Get dashboard panel queries",
            "List the PromQL/LogQL expression of every panel target with the panel title and \
             datasource.",
            PANEL_QUERIES,
            get_dashboard_panel_queries,
        )
        .with_param(uid_param())
        .with_param(force_refresh_param()),
        ToolDescriptor::new(
            "get_dashboard_property",
            "Get dashboard property",
            "Read part of a dashboard model with a JSONPath such as 'panels[0].title' or \
             'panels[*].datasource'. Cheaper than fetching the whole dashboard.",
            DASHBOARD_PROPERTY,
            get_dashboard_property,
        )
        .with_param(uid_param())
        .with_param(ParamSpec::required(
            "jsonPath",
            ParamKind::String,
            "JSONPath into the dashboard model, e.g. '$.panels[*].title'",
        ))
        .with_param(force_refresh_param()),
        ToolDescriptor::new(
            "update_dashboard",
            "Create or update dashboard",
            "Create or replace a dashboard from its full JSON model, or patch an existing \
             dashboard by UID with a list of {op, path, value} operations (op is 'replace', \
             'add' or 'remove'; 'panels/-' appends).",
            DASHBOARD_UPDATE,
            update_dashboard,
        )
        .with_param(ParamSpec::optional(
            "dashboard",
            ParamKind::Object,
            "Full dashboard JSON model",
        ))
        .with_param(ParamSpec::optional(
            "uid",
            ParamKind::String,
            "UID of the dashboard to patch",
        ))
        .with_param(ParamSpec::optional(
            "operations",
            ParamKind::Array,
            "Patch operations applied in order to the dashboard named by uid",
        ))
        .with_param(ParamSpec::optional(
            "folderUid",
            ParamKind::String,
            "Folder to save into; a patch keeps the current folder by default",
        ))
        .with_param(ParamSpec::optional(
            "message",
            ParamKind::String,
            "Version history message",
        ))
        .with_param(ParamSpec::optional(
            "overwrite",
            ParamKind::Boolean,
            "Overwrite a dashboard with the same UID or title (full JSON only)",
        ))
        .with_param(ParamSpec::optional(
            "userId",
            ParamKind::Integer,
            "User ID recorded against the new version",
        )),
    ]
}

/// Fetch a dashboard through the session cache. `force` skips the cache
/// lookup but still refreshes the cached copy.
pub(crate) async fn load_dashboard(ctx: &ToolContext, uid: &str, force: bool) -> Result<Value> {
    if !force && let Some(cached) = ctx.session().cached_dashboard(uid) {
        tracing::debug!(event = "dashboard.cache_hit", uid, session_id = %ctx.session().id());
        return Ok(cached);
    }
    let path = format!("/dashboards/uid/{}", path_segment("uid", uid)?);
    let dashboard = ctx.client().get_json(&path, &[]).await?;
    if !dashboard.is_object() {
        return Err(Error::ToolExecution(
            "unexpected Grafana response when fetching dashboard".to_string(),
        ));
    }
    ctx.session().cache_dashboard(uid, dashboard.clone());
    Ok(dashboard)
}

fn dashboard_model(payload: &Value) -> Result<&Map<String, Value>> {
    payload
        .get("dashboard")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            Error::ToolExecution("dashboard payload does not contain a JSON object".to_string())
        })
}

fn get_dashboard_by_uid<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let uid = required_string(args, "uid")?;
        let force = arg_bool(args, "forceRefresh", false)?;
        let dashboard = load_dashboard(ctx, &uid, force).await?;
        Ok(ctx.respond(dashboard, echo([("uid", Value::String(uid))])))
    })
}

fn get_dashboard_summary<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let uid = required_string(args, "uid")?;
        let force = arg_bool(args, "forceRefresh", false)?;
        let payload = load_dashboard(ctx, &uid, force).await?;
        let summary = summarize(&uid, dashboard_model(&payload)?, payload.get("meta"));
        Ok(ctx.respond(summary, echo([("uid", Value::String(uid))])))
    })
}

fn get_dashboard_panel_queries<'a>(
    ctx: &'a ToolContext,
    args: &'a Map<String, Value>,
) -> ToolFuture<'a> {
    Box::pin(async move {
        let uid = required_string(args, "uid")?;
        let force = arg_bool(args, "forceRefresh", false)?;
        let payload = load_dashboard(ctx, &uid, force).await?;
        let queries = panel_queries(dashboard_model(&payload)?)?;
        Ok(ctx.respond(Value::Array(queries), echo([("uid", Value::String(uid))])))
    })
}

fn get_dashboard_property<'a>(
    ctx: &'a ToolContext,
    args: &'a Map<String, Value>,
) -> ToolFuture<'a> {
    Box::pin(async move {
        let uid = required_string(args, "uid")?;
        let path = required_string(args, "jsonPath")?;
        let force = arg_bool(args, "forceRefresh", false)?;
        let segments = json_path::parse("jsonPath", &path)?;
        let payload = load_dashboard(ctx, &uid, force).await?;
        let model = payload.get("dashboard").filter(|model| model.is_object()).ok_or_else(|| {
            Error::ToolExecution("dashboard payload does not contain a JSON object".to_string())
        })?;
        let value = json_path::evaluate("jsonPath", model, &segments)?;
        Ok(ctx.respond(
            value,
            echo([("uid", Value::String(uid)), ("jsonPath", Value::String(path))]),
        ))
    })
}

/// Fields shared by both save modes.
struct SaveOptions {
    folder_uid: Option<String>,
    message: Option<String>,
    user_id: Option<u64>,
}

async fn save_dashboard(
    ctx: &ToolContext,
    dashboard: &Value,
    options: &SaveOptions,
    overwrite: bool,
) -> Result<Value> {
    let mut body = Map::new();
    body.insert("dashboard".into(), dashboard.clone());
    body.insert("overwrite".into(), json!(overwrite));
    if let Some(folder_uid) = &options.folder_uid {
        body.insert("folderUid".into(), json!(folder_uid));
    }
    if let Some(message) = &options.message {
        body.insert("message".into(), json!(message));
    }
    if let Some(user_id) = options.user_id {
        body.insert("userId".into(), json!(user_id));
    }
    ctx.client()
        .post_json("/dashboards/db", &Value::Object(body))
        .await
}

/// Apply `{op, path, value}` operations to a copy of the model.
fn apply_operations(model: &mut Map<String, Value>, operations: &[Value]) -> Result<()> {
    for (index, operation) in operations.iter().enumerate() {
        let op = operation.get("op").and_then(Value::as_str).unwrap_or_default();
        let path = operation.get("path").and_then(Value::as_str).unwrap_or_default();
        if op.is_empty() || path.is_empty() {
            return Err(Error::validation(
                "operations",
                format!("operation {index} is missing op or path"),
            ));
        }
        let edit = match op {
            "replace" | "add" => Edit::Set(operation.get("value").cloned().unwrap_or(Value::Null)),
            "remove" => Edit::Remove,
            other => {
                return Err(Error::validation(
                    "operations",
                    format!("unsupported patch operation '{other}' at index {index}"),
                ));
            }
        };
        let segments = json_path::parse("operations", path)?;
        json_path::apply("operations", model, &segments, edit).map_err(|err| match err {
            Error::Validation { field, message } => Error::Validation {
                field,
                message: format!("operation {index} ({op} {path}): {message}"),
            },
            other => other,
        })?;
    }
    Ok(())
}

async fn patch_dashboard(
    ctx: &ToolContext,
    uid: &str,
    operations: &[Value],
    mut options: SaveOptions,
) -> Result<Value> {
    let source = load_dashboard(ctx, uid, false).await?;
    let mut model = dashboard_model(&source)?.clone();
    apply_operations(&mut model, operations)?;

    let meta = source.get("meta").cloned().unwrap_or(Value::Null);
    if options.folder_uid.is_none() {
        options.folder_uid = meta
            .get("folderUid")
            .and_then(Value::as_str)
            .map(str::to_string);
    }
    let model = Value::Object(model);
    let result = save_dashboard(ctx, &model, &options, true).await?;
    ctx.session()
        .cache_dashboard(uid, json!({"dashboard": model, "meta": meta}));
    Ok(result)
}

fn update_dashboard<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let options = SaveOptions {
            folder_uid: arg_optional_string(args, "folderUid")?,
            message: arg_optional_string(args, "message")?,
            user_id: arg_optional_u64(args, "userId")?,
        };
        let overwrite = arg_bool(args, "overwrite", false)?;
        let uid = arg_optional_string(args, "uid")?;
        let operations = match args.get("operations") {
            None | Some(Value::Null) => &[][..],
            Some(Value::Array(items)) => items.as_slice(),
            Some(_) => {
                return Err(Error::validation("operations", "'operations' must be an array"));
            }
        };
        let dashboard = arg_optional_object(args, "dashboard")?;

        let (result, uid) = match (uid, dashboard) {
            (Some(uid), _) if !operations.is_empty() => {
                let uid = path_segment("uid", &uid)?;
                tracing::info!(event = "dashboard.patch", uid = %uid, operations = operations.len());
                (patch_dashboard(ctx, &uid, operations, options).await?, Some(uid))
            }
            (_, Some(dashboard)) => {
                let model = Value::Object(dashboard.clone());
                let result = save_dashboard(ctx, &model, &options, overwrite).await?;
                let uid = dashboard
                    .get("uid")
                    .and_then(Value::as_str)
                    .filter(|uid| !uid.is_empty())
                    .map(str::to_string);
                if let Some(uid) = &uid {
                    ctx.session().cache_dashboard(uid, json!({"dashboard": model}));
                }
                tracing::info!(event = "dashboard.save", uid = uid.as_deref(), overwrite);
                (result, uid)
            }
            _ => {
                return Err(Error::validation(
                    "dashboard",
                    "provide either the dashboard JSON or a uid with operations",
                ));
            }
        };
        Ok(ctx.respond(result, echo([("uid", json!(uid))])))
    })
}

fn str_field<'a>(object: &'a Map<String, Value>, key: &str) -> &'a str {
    object.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn array_field<'a>(object: &'a Map<String, Value>, key: &str) -> &'a [Value] {
    object
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Insert `key` only when the string is non-empty.
fn insert_present(target: &mut Map<String, Value>, key: &str, value: &str) {
    if !value.is_empty() {
        target.insert(key.to_string(), Value::String(value.to_string()));
    }
}

fn summarize(uid: &str, dashboard: &Map<String, Value>, meta: Option<&Value>) -> Value {
    let mut summary = Map::new();
    summary.insert("uid".into(), json!(uid));
    summary.insert("title".into(), json!(str_field(dashboard, "title")));
    insert_present(&mut summary, "description", str_field(dashboard, "description"));

    let tags: Vec<&str> = array_field(dashboard, "tags")
        .iter()
        .filter_map(Value::as_str)
        .collect();
    if !tags.is_empty() {
        summary.insert("tags".into(), json!(tags));
    }
    insert_present(&mut summary, "refresh", str_field(dashboard, "refresh"));

    let panels = array_field(dashboard, "panels");
    summary.insert("panelCount".into(), json!(panels.len()));
    let panel_summaries: Vec<Value> = panels
        .iter()
        .filter_map(Value::as_object)
        .map(summarize_panel)
        .collect();
    summary.insert("panels".into(), Value::Array(panel_summaries));

    let time = dashboard.get("time").and_then(Value::as_object);
    summary.insert(
        "timeRange".into(),
        json!({
            "from": time.map(|t| str_field(t, "from")).unwrap_or_default(),
            "to": time.map(|t| str_field(t, "to")).unwrap_or_default(),
        }),
    );

    let variables: Vec<Value> = dashboard
        .get("templating")
        .and_then(Value::as_object)
        .map(|templating| array_field(templating, "list"))
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_object)
        .map(|variable| {
            let mut out = Map::new();
            out.insert("name".into(), json!(str_field(variable, "name")));
            out.insert("type".into(), json!(str_field(variable, "type")));
            insert_present(&mut out, "label", str_field(variable, "label"));
            Value::Object(out)
        })
        .collect();
    if !variables.is_empty() {
        summary.insert("variables".into(), Value::Array(variables));
    }

    if let Some(meta) = meta.filter(|m| m.as_object().is_some_and(|m| !m.is_empty())) {
        summary.insert("meta".into(), meta.clone());
    }
    Value::Object(summary)
}

fn summarize_panel(panel: &Map<String, Value>) -> Value {
    let id = panel
        .get("id")
        .and_then(|id| id.as_i64().or_else(|| id.as_f64().map(|f| f as i64)))
        .unwrap_or(0);
    let mut out = Map::new();
    out.insert("id".into(), json!(id));
    out.insert("title".into(), json!(str_field(panel, "title")));
    out.insert("type".into(), json!(str_field(panel, "type")));
    out.insert("queryCount".into(), json!(array_field(panel, "targets").len()));
    insert_present(&mut out, "description", str_field(panel, "description"));
    Value::Object(out)
}

fn panel_queries(dashboard: &Map<String, Value>) -> Result<Vec<Value>> {
    let panels = dashboard
        .get("panels")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::ToolExecution("dashboard does not contain a panels array".into()))?;

    let mut queries = Vec::new();
    for panel in panels.iter().filter_map(Value::as_object) {
        let mut datasource = Map::new();
        if let Some(source) = panel.get("datasource").and_then(Value::as_object) {
            for key in ["uid", "type"] {
                if let Some(value) = source.get(key) {
                    datasource.insert(key.to_string(), value.clone());
                }
            }
        }
        let title = panel.get("title").cloned().unwrap_or_else(|| json!(""));
        for target in array_field(panel, "targets").iter().filter_map(Value::as_object) {
            let expr = str_field(target, "expr");
            if !expr.is_empty() {
                queries.push(json!({
                    "title": title,
                    "query": expr,
                    "datasource": datasource,
                }));
            }
        }
    }
    Ok(queries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use mockito::Matcher;

    use crate::session::{Session, SessionKind};
    use crate::tools::default_registry;
    use crate::tools::test_support::{context, context_with_session};

    fn sample() -> Value {
        json!({
            "dashboard": {
                "uid": "ops",
                "title": "Ops",
                "tags": ["prod", 3],
                "refresh": "30s",
                "time": {"from": "now-6h", "to": "now"},
                "panels": [
                    {
                        "id": 2,
                        "title": "CPU",
                        "type": "timeseries",
                        "datasource": {"uid": "prom", "type": "prometheus"},
                        "targets": [{"expr": "rate(cpu[5m])"}, {"expr": ""}]
                    },
                    {"id": 3, "title": "Text", "type": "text"}
                ],
                "templating": {"list": [{"name": "env", "type": "custom", "label": "Env"}]}
            },
            "meta": {"folderUid": "f1"}
        })
    }

    #[test]
    fn summary_shape() {
        let payload = sample();
        let summary = summarize("ops", dashboard_model(&payload).expect("model"), payload.get("meta"));
        assert_eq!(summary["panelCount"], json!(2));
        assert_eq!(summary["tags"], json!(["prod"]));
        assert_eq!(summary["timeRange"], json!({"from": "now-6h", "to": "now"}));
        assert_eq!(summary["panels"][0]["queryCount"], json!(2));
        assert_eq!(summary["variables"][0]["label"], json!("Env"));
        assert_eq!(summary["meta"]["folderUid"], json!("f1"));
        assert!(summary.get("description").is_none());
    }

    #[test]
    fn panel_queries_skip_empty_expressions() {
        let payload = sample();
        let queries = panel_queries(dashboard_model(&payload).expect("model")).expect("queries");
        assert_eq!(
            queries,
            vec![json!({
                "title": "CPU",
                "query": "rate(cpu[5m])",
                "datasource": {"uid": "prom", "type": "prometheus"}
            })]
        );
    }

    #[tokio::test]
    async fn second_read_is_served_from_session_cache() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/dashboards/uid/ops")
            .with_status(200)
            .with_body(sample().to_string())
            .expect(1)
            .create_async()
            .await;

        let registry = default_registry().expect("registry");
        let session = Arc::new(Session::new(SessionKind::StreamableHttp));
        let args = echo([("uid", json!("ops"))]);
        for tool in ["get_dashboard_by_uid", "get_dashboard_summary", "get_dashboard_panel_queries"] {
            registry
                .dispatch(
                    tool,
                    &args,
                    context_with_session(&server.url(), Arc::clone(&session)),
                    &BTreeSet::new(),
                )
                .await
                .expect(tool);
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn cache_is_not_shared_between_sessions() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/dashboards/uid/ops")
            .with_status(200)
            .with_body(sample().to_string())
            .expect(2)
            .create_async()
            .await;

        let registry = default_registry().expect("registry");
        let args = echo([("uid", json!("ops"))]);
        for _ in 0..2 {
            let session = Arc::new(Session::new(SessionKind::Sse));
            registry
                .dispatch(
                    "get_dashboard_summary",
                    &args,
                    context_with_session(&server.url(), session),
                    &BTreeSet::new(),
                )
                .await
                .expect("summary");
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn force_refresh_bypasses_cache() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/dashboards/uid/ops")
            .with_status(200)
            .with_body(sample().to_string())
            .expect(2)
            .create_async()
            .await;

        let registry = default_registry().expect("registry");
        let session = Arc::new(Session::new(SessionKind::Stdio));
        for force in [false, true] {
            registry
                .dispatch(
                    "get_dashboard_by_uid",
                    &echo([("uid", json!("ops")), ("forceRefresh", json!(force))]),
                    context_with_session(&server.url(), Arc::clone(&session)),
                    &BTreeSet::new(),
                )
                .await
                .expect("dashboard");
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn property_reads_from_cached_dashboard() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/dashboards/uid/ops")
            .with_status(200)
            .with_body(sample().to_string())
            .expect(1)
            .create_async()
            .await;

        let registry = default_registry().expect("registry");
        let session = Arc::new(Session::new(SessionKind::Stdio));
        let mut titles = Vec::new();
        for path in ["$.panels[*].title", "panels[0].datasource.uid"] {
            let envelope = registry
                .dispatch(
                    "get_dashboard_property",
                    &echo([("uid", json!("ops")), ("jsonPath", json!(path))]),
                    context_with_session(&server.url(), Arc::clone(&session)),
                    &BTreeSet::new(),
                )
                .await
                .expect("property");
            assert_eq!(envelope.kind(), "dashboard_property");
            assert_eq!(envelope.get("jsonPath"), Some(&json!(path)));
            titles.push(envelope.get("grafana_response").cloned());
        }
        assert_eq!(titles[0], Some(json!(["CPU", "Text"])));
        assert_eq!(titles[1], Some(json!("prom")));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn property_with_missing_field_is_a_validation_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/dashboards/uid/ops")
            .with_status(200)
            .with_body(sample().to_string())
            .create_async()
            .await;

        let registry = default_registry().expect("registry");
        let err = registry
            .dispatch(
                "get_dashboard_property",
                &echo([("uid", json!("ops")), ("jsonPath", json!("annotations.list"))]),
                context(&server.url()),
                &BTreeSet::new(),
            )
            .await
            .expect_err("missing field");
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "jsonPath"));
    }

    #[tokio::test]
    async fn patch_saves_into_the_current_folder_and_refreshes_cache() {
        let mut server = mockito::Server::new_async().await;
        let read = server
            .mock("GET", "/api/dashboards/uid/ops")
            .with_status(200)
            .with_body(sample().to_string())
            .expect(1)
            .create_async()
            .await;
        let save = server
            .mock("POST", "/api/dashboards/db")
            .match_body(Matcher::PartialJson(json!({
                "dashboard": {"uid": "ops", "title": "Ops v2", "panels": [{"id": 2}, {"id": 3}, {"id": 9}]},
                "overwrite": true,
                "folderUid": "f1",
                "message": "rename"
            })))
            .with_status(200)
            .with_body(r#"{"status":"success","uid":"ops","version":2}"#)
            .expect(1)
            .create_async()
            .await;

        let registry = default_registry().expect("registry");
        let session = Arc::new(Session::new(SessionKind::StreamableHttp));
        let envelope = registry
            .dispatch(
                "update_dashboard",
                &echo([
                    ("uid", json!("ops")),
                    ("message", json!("rename")),
                    (
                        "operations",
                        json!([
                            {"op": "replace", "path": "$.title", "value": "Ops v2"},
                            {"op": "add", "path": "panels/-", "value": {"id": 9}},
                            {"op": "remove", "path": "panels[0].targets"}
                        ]),
                    ),
                ]),
                context_with_session(&server.url(), Arc::clone(&session)),
                &BTreeSet::new(),
            )
            .await
            .expect("patched");
        assert_eq!(envelope.kind(), "dashboard_update");
        assert_eq!(envelope.get("grafana_response").map(|r| &r["version"]), Some(&json!(2)));

        let cached = session.cached_dashboard("ops").expect("cached");
        assert_eq!(cached["dashboard"]["title"], json!("Ops v2"));
        assert!(cached["dashboard"]["panels"][0].get("targets").is_none());
        read.assert_async().await;
        save.assert_async().await;
    }

    #[tokio::test]
    async fn failed_patch_never_saves() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/dashboards/uid/ops")
            .with_status(200)
            .with_body(sample().to_string())
            .create_async()
            .await;
        let save = server
            .mock("POST", "/api/dashboards/db")
            .expect(0)
            .create_async()
            .await;

        let registry = default_registry().expect("registry");
        let err = registry
            .dispatch(
                "update_dashboard",
                &echo([
                    ("uid", json!("ops")),
                    ("operations", json!([{"op": "move", "path": "title"}])),
                ]),
                context(&server.url()),
                &BTreeSet::new(),
            )
            .await
            .expect_err("unsupported op");
        assert!(matches!(err, Error::Validation { ref message, .. } if message.contains("'move'")));
        save.assert_async().await;
    }

    #[tokio::test]
    async fn full_json_is_posted_as_given() {
        let mut server = mockito::Server::new_async().await;
        let save = server
            .mock("POST", "/api/dashboards/db")
            .match_body(Matcher::Json(json!({
                "dashboard": {"uid": "new", "title": "New"},
                "overwrite": false,
                "folderUid": "team"
            })))
            .with_status(200)
            .with_body(r#"{"status":"success","uid":"new"}"#)
            .create_async()
            .await;

        let registry = default_registry().expect("registry");
        let session = Arc::new(Session::new(SessionKind::Sse));
        let envelope = registry
            .dispatch(
                "update_dashboard",
                &echo([
                    ("dashboard", json!({"uid": "new", "title": "New"})),
                    ("folderUid", json!("team")),
                ]),
                context_with_session(&server.url(), Arc::clone(&session)),
                &BTreeSet::new(),
            )
            .await
            .expect("saved");
        assert_eq!(envelope.get("uid"), Some(&json!("new")));
        assert!(session.cached_dashboard("new").is_some());
        save.assert_async().await;
    }

    #[tokio::test]
    async fn update_without_dashboard_or_operations_is_rejected() {
        let server = mockito::Server::new_async().await;
        let registry = default_registry().expect("registry");
        let err = registry
            .dispatch(
                "update_dashboard",
                &echo([("uid", json!("ops"))]),
                context(&server.url()),
                &BTreeSet::new(),
            )
            .await
            .expect_err("nothing to save");
        assert!(matches!(err, Error::Validation { .. }));
    }
}
