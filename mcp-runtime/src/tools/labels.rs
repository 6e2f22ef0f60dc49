//! Prometheus-style label matchers shared by the alerting and Prometheus
//! tools. Arguments arrive as `[{"filters": [{"name", "value", "type"}]}]`.

use std::collections::HashMap;

use grafana_mcp_core::error::{Error, Result};
use regex::Regex;
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchOp {
    Equal,
    NotEqual,
    Regex,
    NotRegex,
}

impl MatchOp {
    fn parse(field: &str, raw: &str) -> Result<Self> {
        match raw {
            "" | "=" => Ok(Self::Equal),
            "!=" => Ok(Self::NotEqual),
            "=~" => Ok(Self::Regex),
            "!~" => Ok(Self::NotRegex),
            other => Err(Error::validation(
                field,
                format!("unsupported matcher type '{other}'"),
            )),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Regex => "=~",
            Self::NotRegex => "!~",
        }
    }
}

#[derive(Clone, Debug)]
pub struct LabelMatcher {
    pub name: String,
    pub value: String,
    pub op: MatchOp,
    pattern: Option<Regex>,
}

impl LabelMatcher {
    pub fn new(field: &str, name: &str, value: &str, op: MatchOp) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::validation(field, "label matcher is missing 'name'"));
        }
        let pattern = match op {
            MatchOp::Regex | MatchOp::NotRegex => Some(Regex::new(value).map_err(|err| {
                Error::validation(field, format!("invalid regular expression '{value}': {err}"))
            })?),
            MatchOp::Equal | MatchOp::NotEqual => None,
        };
        Ok(Self {
            name: name.to_string(),
            value: value.to_string(),
            op,
            pattern,
        })
    }

    /// Regex matchers search anywhere in the value; an absent label only
    /// satisfies `!=` and `!~`.
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        let actual = labels.get(&self.name);
        match (self.op, &self.pattern) {
            (MatchOp::Equal, _) => actual == Some(&self.value),
            (MatchOp::NotEqual, _) => actual != Some(&self.value),
            (MatchOp::Regex, Some(pattern)) => actual.is_some_and(|v| pattern.is_match(v)),
            (MatchOp::NotRegex, Some(pattern)) => actual.is_none_or(|v| !pattern.is_match(v)),
            (MatchOp::Regex | MatchOp::NotRegex, None) => false,
        }
    }

    fn to_promql(&self) -> String {
        let escaped = self.value.replace('\\', "\\\\").replace('"', "\\\"");
        format!("{}{}\"{}\"", self.name, self.op.as_str(), escaped)
    }
}

/// A conjunction of matchers.
#[derive(Clone, Debug)]
pub struct Selector {
    pub filters: Vec<LabelMatcher>,
}

impl Selector {
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        self.filters.iter().all(|matcher| matcher.matches(labels))
    }

    pub fn to_promql(&self) -> String {
        let inner: Vec<String> = self.filters.iter().map(LabelMatcher::to_promql).collect();
        format!("{{{}}}", inner.join(", "))
    }
}

pub fn matches_all(selectors: &[Selector], labels: &HashMap<String, String>) -> bool {
    selectors.iter().all(|selector| selector.matches(labels))
}

/// Parse the selector argument. Selectors without filters are dropped.
pub fn parse_selectors(field: &str, raw: Option<&Value>) -> Result<Vec<Selector>> {
    let entries = match raw {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(entries)) => entries,
        Some(_) => return Err(Error::validation(field, format!("'{field}' must be an array"))),
    };

    let mut selectors = Vec::new();
    for entry in entries {
        let Some(entry) = entry.as_object() else {
            return Err(Error::validation(field, "label selector entries must be objects"));
        };
        let filters: &[Value] = match entry.get("filters") {
            None | Some(Value::Null) => &[],
            Some(Value::Array(filters)) => filters.as_slice(),
            Some(_) => {
                return Err(Error::validation(field, "label selector 'filters' must be an array"));
            }
        };
        let mut matchers = Vec::with_capacity(filters.len());
        for filter in filters {
            matchers.push(parse_matcher(field, filter)?);
        }
        if !matchers.is_empty() {
            selectors.push(Selector { filters: matchers });
        }
    }
    Ok(selectors)
}

fn parse_matcher(field: &str, raw: &Value) -> Result<LabelMatcher> {
    let Some(filter) = raw.as_object() else {
        return Err(Error::validation(field, "label matcher entries must be objects"));
    };
    let name = filter.get("name").and_then(Value::as_str).unwrap_or_default();
    let Some(value) = filter.get("value").and_then(Value::as_str) else {
        return Err(Error::validation(field, "label matcher 'value' must be a string"));
    };
    let op = match filter.get("type") {
        None | Some(Value::Null) => MatchOp::Equal,
        Some(Value::String(op)) => MatchOp::parse(field, op)?,
        Some(_) => return Err(Error::validation(field, "label matcher 'type' must be a string")),
    };
    LabelMatcher::new(field, name, value, op)
}

/// Flatten a JSON label object to strings, ignoring non-string values.
pub fn label_map(labels: Option<&Value>) -> HashMap<String, String> {
    labels
        .and_then(Value::as_object)
        .map(|object| {
            object
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}
