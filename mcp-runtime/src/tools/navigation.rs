use grafana_mcp_core::envelope::EnvelopeSpec;
use grafana_mcp_core::error::{Error, Result};
use serde_json::{Map, Value, json};
use url::form_urlencoded;

use crate::args::{
    arg_optional_object, arg_optional_string, arg_optional_u64, echo, path_segment,
    required_string,
};
use crate::registry::{ParamKind, ParamSpec, ToolContext, ToolDescriptor, ToolFuture};

pub const DEEPLINK: EnvelopeSpec = EnvelopeSpec::object("deeplink");

pub fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(
            "generate_deeplink",
            "Generate navigation deeplink",
            "Generate a Grafana URL for a dashboard, a single panel or the Explore view, with an \
             optional time range and extra query parameters.",
            DEEPLINK,
            generate_deeplink,
        )
        .with_param(ParamSpec::required(
            "resourceType",
            ParamKind::String,
            "One of 'dashboard', 'panel' or 'explore'",
        ))
        .with_param(ParamSpec::optional(
            "dashboardUid",
            ParamKind::String,
            "Dashboard UID (dashboard and panel links)",
        ))
        .with_param(ParamSpec::optional(
            "datasourceUid",
            ParamKind::String,
            "Datasource UID (explore links)",
        ))
        .with_param(ParamSpec::optional(
            "panelId",
            ParamKind::Integer,
            "Panel ID (panel links)",
        ))
        .with_param(ParamSpec::optional(
            "timeRange",
            ParamKind::Object,
            "{\"from\": \"now-1h\", \"to\": \"now\"}",
        ))
        .with_param(ParamSpec::optional(
            "queryParams",
            ParamKind::Object,
            "Extra query parameters appended to the link",
        )),
    ]
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Resource {
    Dashboard,
    Panel,
    Explore,
}

impl Resource {
    fn parse(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "dashboard" => Ok(Self::Dashboard),
            "panel" => Ok(Self::Panel),
            "explore" => Ok(Self::Explore),
            _ => Err(Error::validation(
                "resourceType",
                "unsupported resource type; expected dashboard, panel or explore",
            )),
        }
    }
}

fn append_query(link: &mut String, pairs: &[(String, String)]) {
    if pairs.is_empty() {
        return;
    }
    let encoded = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    link.push(if link.contains('?') { '&' } else { '?' });
    link.push_str(&encoded);
}

fn query_pairs(
    object: Option<&Map<String, Value>>,
    keys: Option<&[&str]>,
) -> Vec<(String, String)> {
    let Some(object) = object else {
        return Vec::new();
    };
    object
        .iter()
        .filter(|(key, _)| keys.is_none_or(|keys| keys.contains(&key.as_str())))
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(text) if text.trim().is_empty() => None,
            Value::String(text) => Some((key.clone(), text.clone())),
            other => Some((key.clone(), other.to_string())),
        })
        .collect()
}

/// Build the link against `base_url`; pure so it can be tested directly.
fn build_deeplink(base_url: &str, args: &Map<String, Value>) -> Result<String> {
    let base = base_url.trim_end_matches('/');
    let resource = Resource::parse(&required_string(args, "resourceType")?)?;
    let dashboard_uid = arg_optional_string(args, "dashboardUid")?;
    let datasource_uid = arg_optional_string(args, "datasourceUid")?;
    let panel_id = arg_optional_u64(args, "panelId")?;

    let mut link = match (resource, dashboard_uid, panel_id) {
        (Resource::Dashboard, Some(uid), _) => {
            format!("{base}/d/{}", path_segment("dashboardUid", &uid)?)
        }
        (Resource::Dashboard, None, _) => {
            return Err(Error::validation(
                "dashboardUid",
                "dashboardUid is required for dashboard links",
            ));
        }
        (Resource::Panel, Some(uid), Some(panel)) => {
            format!("{base}/d/{}?viewPanel={panel}", path_segment("dashboardUid", &uid)?)
        }
        (Resource::Panel, None, _) => {
            return Err(Error::validation(
                "dashboardUid",
                "dashboardUid and panelId are required for panel links",
            ));
        }
        (Resource::Panel, Some(_), None) => {
            return Err(Error::validation(
                "panelId",
                "dashboardUid and panelId are required for panel links",
            ));
        }
        (Resource::Explore, _, _) => {
            let uid = datasource_uid.ok_or_else(|| {
                Error::validation("datasourceUid", "datasourceUid is required for Explore links")
            })?;
            let left = json!({"datasource": uid}).to_string();
            let mut link = format!("{base}/explore");
            append_query(&mut link, &[("left".to_string(), left)]);
            link
        }
    };

    let time_range = arg_optional_object(args, "timeRange")?;
    append_query(&mut link, &query_pairs(time_range, Some(&["from", "to"])));
    let extra = arg_optional_object(args, "queryParams")?;
    append_query(&mut link, &query_pairs(extra, None));
    Ok(link)
}

fn generate_deeplink<'a>(ctx: &'a ToolContext, args: &'a Map<String, Value>) -> ToolFuture<'a> {
    Box::pin(async move {
        let link = build_deeplink(ctx.client().config().base_url_str(), args)?;
        Ok(ctx.respond(
            Value::String(link),
            echo([(
                "resourceType",
                args.get("resourceType").cloned().unwrap_or(Value::Null),
            )]),
        ))
    })
}
