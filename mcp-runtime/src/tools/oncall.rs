use grafana_mcp_core::envelope::EnvelopeSpec;
use grafana_mcp_core::error::{Error, Result};
use reqwest::Method;
use serde_json::{Map, Value, json};
use url::Url;

use crate::args::{arg_optional_string, arg_optional_u64, echo, path_segment, required_string};
use crate::capabilities::{Capability, IRM_PLUGIN_ID};
use crate::client::AuthStyle;
use crate::registry::{ParamKind, ParamSpec, ToolContext, ToolDescriptor, ToolFuture};
use crate::tools::not_found_as;

pub const SCHEDULES: EnvelopeSpec = EnvelopeSpec::new("oncall_schedules_result", "schedules");
pub const SHIFT: EnvelopeSpec = EnvelopeSpec::object("oncall_shift");
pub const CURRENT_USERS: EnvelopeSpec = EnvelopeSpec::object("oncall_current_users");
pub const TEAMS: EnvelopeSpec = EnvelopeSpec::new("oncall_teams_result", "teams");
pub const USERS: EnvelopeSpec = EnvelopeSpec::new("oncall_users_result", "users");

pub fn descriptors() -> Vec<ToolDescriptor> {
    let page = || ParamSpec::optional("page", ParamKind::Integer, "Page number");
    vec![
        ToolDescriptor::new(
            "list_oncall_schedules",
            "List OnCall schedules",
            "List Grafana OnCall schedules, optionally filtered by team, or fetch one schedule \
             by ID.",
            SCHEDULES,
            list_oncall_schedules,
        )
        .with_capability(Capability::OnCall)
        .with_param(ParamSpec::optional(
            "scheduleId",
            ParamKind::String,
            "Return only this schedule",
        ))
        .with_param(ParamSpec::optional(
            "teamId",
            ParamKind::String,
            "Only schedules owned by this team",
        ))
        .with_param(page()),
        ToolDescriptor::new(
            "get_oncall_shift",
            "Get OnCall shift",
            "Retrieve details for a specific OnCall shift by ID.",
            SHIFT,
            get_oncall_shift,
        )
        .with_capability(Capability::OnCall)
        .with_param(ParamSpec::required("shiftId", ParamKind::String, "Shift ID")),
        ToolDescriptor::new(
            "get_current_oncall_users",
            "Get current OnCall users",
            "Return the users currently on call for a schedule.",
            CURRENT_USERS,
            get_current_oncall_users,
        )
        .with_capability(Capability::OnCall)
        .with_param(ParamSpec::required(
            "scheduleId",
            ParamKind::String,
            "Schedule ID",
        )),
        ToolDescriptor::new(
            "list_oncall_teams",
            "List OnCall teams",
            "List teams configured in Grafana OnCall.",
            TEAMS,
            list_oncall_teams,
        )
        .with_capability(Capability::OnCall)
        .with_param(page()),
        ToolDescriptor::new(
            "list_oncall_users",
            "List OnCall users",
            "List Grafana OnCall users, filter by username, or fetch one user by ID.",
            USERS,
            list_oncall_users,
        )
        .with_capability(Capability::OnCall)
        .with_param(ParamSpec::optional(
            "userId",
            ParamKind::String,
            "Return only this user",
        ))
        .with_param(ParamSpec::optional(
            "username",
            ParamKind::String,
            "Exact username",
        ))
        .with_param(page()),
    ]
}

/// Normalize the plugin's configured OnCall URL to `<url>/api/v1/`.
fn normalize_api_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim().trim_end_matches('/');
    let base = if trimmed.ends_with("/api/v1") {
        format!("{trimmed}/")
    } else {
        format!("{trimmed}/api/v1/")
    };
    Url::parse(&base).map_err(|err| Error::config(format!("invalid OnCall API URL {base}: {err}")))
}

/// OnCall runs as a separate service; the IRM plugin settings say where.
async fn oncall_api_url(ctx: &ToolContext) -> Result<Url> {
    let settings = ctx
        .client()
        .get_json(&format!("/plugins/{IRM_PLUGIN_ID}/settings"), &[])
        .await?;
    let raw = settings
        .pointer("/jsonData/onCallApiUrl")
        .and_then(Value::as_str)
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| {
            Error::config("OnCall API URL is not configured in the IRM plugin settings")
        })?;
    normalize_api_url(raw)
}

async fn oncall_get(
    ctx: &ToolContext,
    base: &Url,
    path: &str,
    query: &[(String, String)],
) -> Result<Value> {
    let url = base
        .join(path)
        .map_err(|err| Error::Internal(format!("invalid OnCall path {path}: {err}")))?;
    ctx.client()
        .send_url_request(Method::GET, url, query, None, AuthStyle::OnCall)
        .await
}

/// Items of a paginated OnCall list body.
fn results(payload: Value) -> Result<Vec<Value>> {
    match payload {
        Value::Object(mut body) => match body.remove("results") {
            Some(Value::Array(items)) => Ok(items),
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(_) => Err(Error::ToolExecution(
                "unexpected OnCall list response".to_string(),
            )),
        },
        Value::Array(items) => Ok(items),
        _ => Err(Error::ToolExecution(
            "unexpected OnCall list response".to_string(),
        )),
    }
}

fn page_query(page: Option<u64>) -> Vec<(String, String)> {
    page.map(|page| vec![("page".to_string(), page.to_string())])
        .unwrap_or_default()
}

fn summarize_schedule(schedule: &Value) -> Value {
    let shifts: Vec<Value> = schedule
        .get("shifts")
        .and_then(Value::as_array)
        .map(|shifts| {
            shifts
                .iter()
                .map(|shift| match shift {
                    Value::String(id) => Value::String(id.clone()),
                    other => Value::String(other.to_string()),
                })
                .collect()
        })
        .unwrap_or_default();
    json!({
        "id": schedule.get("id"),
        "name": schedule.get("name"),
        "teamId": schedule.get("team_id"),
        "timezone": schedule.get("time_zone"),
        "shifts": shifts,
    })
}

fn list_oncall_schedules<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let schedule_id = arg_optional_string(args, "scheduleId")?;
        let team_id = arg_optional_string(args, "teamId")?;
        let page = arg_optional_u64(args, "page")?;
        let base = oncall_api_url(ctx).await?;

        let schedules = match &schedule_id {
            Some(id) => {
                let path = format!("schedules/{}/", path_segment("scheduleId", id)?);
                let schedule = oncall_get(ctx, &base, &path, &[]).await.map_err(|err| {
                    not_found_as(err, || format!("OnCall schedule '{id}' not found"))
                })?;
                vec![summarize_schedule(&schedule)]
            }
            None => {
                let mut query = page_query(page);
                if let Some(team) = &team_id {
                    query.push(("team_id".to_string(), team.clone()));
                }
                results(oncall_get(ctx, &base, "schedules/", &query).await?)?
                    .iter()
                    .map(summarize_schedule)
                    .collect()
            }
        };

        Ok(ctx.respond(
            Value::Array(schedules),
            echo([
                ("schedule_id", json!(schedule_id)),
                ("team_id", json!(team_id)),
                ("page", json!(page)),
            ]),
        ))
    })
}

fn get_oncall_shift<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let shift_id = required_string(args, "shiftId")?;
        let base = oncall_api_url(ctx).await?;
        let path = format!("on_call_shifts/{}/", path_segment("shiftId", &shift_id)?);
        let shift = oncall_get(ctx, &base, &path, &[])
            .await
            .map_err(|err| not_found_as(err, || format!("OnCall shift '{shift_id}' not found")))?;
        Ok(ctx.respond(shift, echo([("shiftId", Value::String(shift_id))])))
    })
}

fn get_current_oncall_users<'a>(
    ctx: &'a ToolContext,
    args: &'a Map<String, Value>,
) -> ToolFuture<'a> {
    Box::pin(async move {
        let schedule_id = required_string(args, "scheduleId")?;
        let base = oncall_api_url(ctx).await?;
        let path = format!("schedules/{}/", path_segment("scheduleId", &schedule_id)?);
        let schedule = oncall_get(ctx, &base, &path, &[]).await.map_err(|err| {
            not_found_as(err, || format!("OnCall schedule '{schedule_id}' not found"))
        })?;

        let on_call: Vec<String> = schedule
            .get("on_call_now")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let mut users = Vec::with_capacity(on_call.len());
        for user_id in &on_call {
            let path = format!("users/{}/", path_segment("userId", user_id)?);
            match oncall_get(ctx, &base, &path, &[]).await {
                Ok(user) => users.push(user),
                Err(err) => {
                    tracing::warn!(
                        event = "oncall.user_lookup_failed",
                        user_id = %user_id,
                        error = %err,
                    );
                }
            }
        }

        Ok(ctx.respond(
            json!({
                "scheduleId": schedule_id,
                "scheduleName": schedule.get("name"),
                "users": users,
            }),
            Map::new(),
        ))
    })
}

fn list_oncall_teams<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let page = arg_optional_u64(args, "page")?;
        let base = oncall_api_url(ctx).await?;
        let teams = results(oncall_get(ctx, &base, "teams/", &page_query(page)).await?)?;
        Ok(ctx.respond(Value::Array(teams), echo([("page", json!(page))])))
    })
}

fn list_oncall_users<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let user_id = arg_optional_string(args, "userId")?;
        let username = arg_optional_string(args, "username")?;
        let page = arg_optional_u64(args, "page")?;
        let base = oncall_api_url(ctx).await?;

        if let Some(id) = user_id {
            let path = format!("users/{}/", path_segment("userId", &id)?);
            let user = oncall_get(ctx, &base, &path, &[])
                .await
                .map_err(|err| not_found_as(err, || format!("OnCall user '{id}' not found")))?;
            return Ok(ctx.respond(json!([user]), echo([("user_id", Value::String(id))])));
        }

        let mut query = page_query(page);
        if let Some(name) = &username {
            query.push(("username".to_string(), name.clone()));
        }
        let users = results(oncall_get(ctx, &base, "users/", &query).await?)?;
        Ok(ctx.respond(
            Value::Array(users),
            echo([("username", json!(username)), ("page", json!(page))]),
        ))
    })
}
