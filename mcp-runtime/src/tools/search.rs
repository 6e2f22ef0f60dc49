//! `search` / `fetch`: the two single-parameter entry points MCP connector
//! clients expect, plus the richer `search_dashboards` alias.

use grafana_mcp_core::envelope::EnvelopeSpec;
use grafana_mcp_core::error::{Error, Result};
use serde_json::{Map, Value, json};
use url::Url;

use crate::args::{arg_optional_string, arg_string, echo, path_segment, required_string};
use crate::registry::{ParamKind, ParamSpec, ToolContext, ToolDescriptor, ToolFuture};

pub const SEARCH_RESULTS: EnvelopeSpec = EnvelopeSpec::new("dashboard_search_results", "dashboards");
pub const FETCHED_DASHBOARD: EnvelopeSpec = EnvelopeSpec::object("dashboard");

pub fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(
            "search",
            "Search Grafana",
            "General purpose search used by MCP connector clients. Returns matching dashboard \
             metadata with a total count and the query that produced it.",
            SEARCH_RESULTS,
            search,
        )
        .with_param(ParamSpec::required(
            "query",
            ParamKind::String,
            "Free-text query; empty matches every dashboard",
        )),
        ToolDescriptor::new(
            "search_dashboards",
            "Search dashboards",
            "Search Grafana dashboards by a query string. Returns matching dashboards, the total \
             count and the query.",
            SEARCH_RESULTS,
            search,
        )
        .with_param(ParamSpec::required(
            "query",
            ParamKind::String,
            "Free-text query; empty matches every dashboard",
        )),
        ToolDescriptor::new(
            "fetch",
            "Fetch Grafana resource",
            "Retrieve a Grafana resource using an identifier returned by search. Supports \
             dashboards by UID, numeric ID or dashboard URL.",
            FETCHED_DASHBOARD,
            fetch,
        )
        .with_param(ParamSpec::required(
            "id",
            ParamKind::String,
            "Dashboard UID, numeric ID or URL",
        ))
        .with_param(ParamSpec::optional("uid", ParamKind::String, "Explicit dashboard UID"))
        .with_param(ParamSpec::optional("url", ParamKind::String, "Dashboard URL"))
        .with_param(ParamSpec::optional(
            "type",
            ParamKind::String,
            "Resource type; only dashboards (dash-db) are supported",
        )),
    ]
}

fn search<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let query = arg_string(args, "query", "")?;
        let mut params = vec![("type".to_string(), "dash-db".to_string())];
        if !query.is_empty() {
            params.push(("query".to_string(), query.clone()));
        }
        let raw = ctx.client().get_json("/search", &params).await?;
        let dashboards = if raw.is_array() { raw } else { json!([]) };
        Ok(ctx.respond(dashboards, echo([("query", Value::String(query))])))
    })
}

#[derive(Debug, PartialEq, Eq)]
enum DashboardLookup {
    Uid(String),
    NumericId(String),
}

impl DashboardLookup {
    fn path(&self) -> String {
        match self {
            Self::Uid(uid) => format!("/dashboards/uid/{uid}"),
            Self::NumericId(id) => format!("/dashboards/id/{id}"),
        }
    }
}

/// `/d/<uid>/...`, `/d-solo/<uid>/...`, `.../dashboards/uid/<uid>` or
/// `.../dashboards/id/<n>`. Relative paths are accepted.
fn lookup_from_url(raw: &str) -> Option<DashboardLookup> {
    let path = match Url::parse(raw) {
        Ok(url) => url.path().to_string(),
        Err(_) => raw.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    if let [first, uid, ..] = segments.as_slice()
        && matches!(*first, "d" | "d-solo")
    {
        return Some(DashboardLookup::Uid((*uid).to_string()));
    }
    segments.windows(3).find_map(|window| match window {
        ["dashboards", "uid", uid] => Some(DashboardLookup::Uid((*uid).to_string())),
        ["dashboards", "id", id] if id.chars().all(|c| c.is_ascii_digit()) => {
            Some(DashboardLookup::NumericId((*id).to_string()))
        }
        _ => None,
    })
}

fn resolve_lookup(
    id: &str,
    uid: Option<String>,
    url: Option<String>,
) -> Result<DashboardLookup> {
    if let Some(uid) = uid {
        return Ok(DashboardLookup::Uid(path_segment("uid", &uid)?));
    }
    if let Some(lookup) = url.as_deref().and_then(lookup_from_url) {
        return validated(lookup);
    }
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
        return Ok(DashboardLookup::NumericId(id.to_string()));
    }
    if id.contains('/') {
        return lookup_from_url(id).map(validated).unwrap_or_else(|| {
            Err(Error::validation(
                "id",
                "could not find a dashboard UID or ID in the given URL",
            ))
        });
    }
    Ok(DashboardLookup::Uid(path_segment("id", id)?))
}

fn validated(lookup: DashboardLookup) -> Result<DashboardLookup> {
    match lookup {
        DashboardLookup::Uid(uid) => Ok(DashboardLookup::Uid(path_segment("id", &uid)?)),
        numeric => Ok(numeric),
    }
}

fn fetch<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let id = required_string(args, "id")?;
        let kind = arg_optional_string(args, "type")?
            .unwrap_or_else(|| "dash-db".to_string())
            .to_ascii_lowercase();
        if !matches!(kind.as_str(), "dash-db" | "dashboard" | "dashboards") {
            return Err(Error::validation(
                "type",
                format!("unsupported resource type '{kind}' for fetch"),
            ));
        }

        let lookup = resolve_lookup(
            &id,
            arg_optional_string(args, "uid")?,
            arg_optional_string(args, "url")?,
        )?;
        tracing::debug!(event = "tool.fetch", lookup = ?lookup);
        let raw = ctx.client().get_json(&lookup.path(), &[]).await?;
        if let (DashboardLookup::Uid(uid), Value::Object(_)) = (&lookup, &raw) {
            ctx.session().cache_dashboard(uid, raw.clone());
        }
        Ok(ctx.respond(raw, echo([("id", Value::String(id))])))
    })
}
