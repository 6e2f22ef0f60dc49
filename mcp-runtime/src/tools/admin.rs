use grafana_mcp_core::envelope::EnvelopeSpec;
use serde_json::{Map, Value, json};

use crate::args::{arg_optional_string, echo};
use crate::registry::{ParamKind, ParamSpec, ToolContext, ToolDescriptor, ToolFuture};

pub const TEAMS: EnvelopeSpec = EnvelopeSpec::new("teams_search_result", "teams");
pub const ORG_USERS: EnvelopeSpec = EnvelopeSpec::new("org_users_result", "users");

pub fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(
            "list_teams",
            "List teams",
            "Search Grafana teams by name. Returns the matching teams with the query and total \
             count.",
            TEAMS,
            list_teams,
        )
        .with_param(ParamSpec::optional(
            "query",
            ParamKind::String,
            "Team name filter",
        )),
        ToolDescriptor::new(
            "list_users_by_org",
            "List users by organization",
            "Return all users of the current Grafana organization with their email, role and \
             status.",
            ORG_USERS,
            list_users_by_org,
        ),
    ]
}

fn list_teams<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let query = arg_optional_string(args, "query")?;
        let params: Vec<(String, String)> = query
            .iter()
            .map(|q| ("query".to_string(), q.clone()))
            .collect();
        let raw = ctx.client().get_json("/teams/search", &params).await?;
        let teams = match raw {
            Value::Object(mut body) => body.remove("teams").filter(Value::is_array),
            list @ Value::Array(_) => Some(list),
            _ => None,
        }
        .unwrap_or_else(|| json!([]));
        Ok(ctx.respond(teams, echo([("query", json!(query))])))
    })
}

fn list_users_by_org<'a>(ctx: &'a ToolContext, _args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let raw = ctx.client().get_json("/org/users", &[]).await?;
        let users = if raw.is_array() { raw } else { json!([]) };
        Ok(ctx.respond(users, Map::new()))
    })
}
