//! Dotted paths into dashboard JSON: `panels[0].title`, `panels[*].type`,
//! and `panels/-` to append to an array. A leading `$.` is optional.

use std::sync::LazyLock;

use grafana_mcp_core::error::{Error, Result};
use regex::Regex;
use serde_json::{Map, Value};

static SEGMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([^.\[\]/]+)(?:\[(\d+|\*)\])?(/-)?").expect("valid JSONPath segment regex")
});

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Index {
    None,
    At(usize),
    All,
    Append,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Segment {
    key: String,
    index: Index,
}

/// Parse a path, reporting problems against `field`.
pub(crate) fn parse(field: &str, path: &str) -> Result<Vec<Segment>> {
    let path = path.strip_prefix("$.").unwrap_or(path).trim_start_matches('.');
    let mut segments = Vec::new();
    for captures in SEGMENT_RE.captures_iter(path) {
        let Some(key) = captures.get(1) else { continue };
        let append = captures.get(3).is_some();
        let index = match (captures.get(2).map(|m| m.as_str()), append) {
            (None, false) => Index::None,
            (None, true) => Index::Append,
            (Some("*"), false) => Index::All,
            (Some(raw), false) => Index::At(raw.parse().map_err(|_| {
                Error::validation(field, format!("invalid array index '{raw}' in '{path}'"))
            })?),
            (Some(_), true) => {
                return Err(Error::validation(
                    field,
                    "append syntax cannot follow an array index",
                ));
            }
        };
        segments.push(Segment {
            key: key.as_str().to_string(),
            index,
        });
    }
    if segments.is_empty() {
        return Err(Error::validation(field, "JSONPath cannot be empty"));
    }
    Ok(segments)
}

fn array_at<'a>(field: &str, object: &'a Map<String, Value>, key: &str) -> Result<&'a Vec<Value>> {
    object
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| Error::validation(field, format!("field '{key}' is not an array")))
}

fn out_of_bounds(field: &str, key: &str, index: usize, len: usize) -> Error {
    Error::validation(
        field,
        format!("index {index} out of bounds for array '{key}' (length {len})"),
    )
}

/// Read the value(s) a path selects. A wildcard fans out, so several
/// matches come back as an array and none as an empty array.
pub(crate) fn evaluate(field: &str, data: &Value, segments: &[Segment]) -> Result<Value> {
    let mut current = vec![data];
    for (position, segment) in segments.iter().enumerate() {
        let mut next = Vec::new();
        for value in current {
            let object = value.as_object().ok_or_else(|| {
                Error::validation(
                    field,
                    format!(
                        "segment '{}' at position {position} cannot be applied to a non-object",
                        segment.key
                    ),
                )
            })?;
            if !object.contains_key(&segment.key) {
                return Err(Error::validation(
                    field,
                    format!("field '{}' not found", segment.key),
                ));
            }
            match segment.index {
                Index::None => next.extend(object.get(&segment.key)),
                Index::Append => {
                    return Err(Error::validation(
                        field,
                        "append syntax cannot be used when reading",
                    ));
                }
                Index::All => next.extend(array_at(field, object, &segment.key)?),
                Index::At(index) => {
                    let items = array_at(field, object, &segment.key)?;
                    let item = items
                        .get(index)
                        .ok_or_else(|| out_of_bounds(field, &segment.key, index, items.len()))?;
                    next.push(item);
                }
            }
        }
        current = next;
    }
    Ok(match current.as_slice() {
        [] => Value::Array(Vec::new()),
        [single] => (*single).clone(),
        many => Value::Array(many.iter().map(|value| (*value).clone()).collect()),
    })
}

pub(crate) enum Edit {
    Set(Value),
    Remove,
}

fn descend<'a>(
    field: &str,
    object: &'a mut Map<String, Value>,
    segment: &Segment,
) -> Result<&'a mut Map<String, Value>> {
    let key = &segment.key;
    let target = match segment.index {
        Index::None => object.get_mut(key),
        Index::At(index) => {
            let items = object
                .get_mut(key)
                .and_then(Value::as_array_mut)
                .ok_or_else(|| Error::validation(field, format!("field '{key}' is not an array")))?;
            let len = items.len();
            Some(
                items
                    .get_mut(index)
                    .ok_or_else(|| out_of_bounds(field, key, index, len))?,
            )
        }
        Index::All => {
            return Err(Error::validation(
                field,
                "wildcards are not supported when modifying",
            ));
        }
        Index::Append => {
            return Err(Error::validation(
                field,
                "append syntax is only allowed on the last segment",
            ));
        }
    };
    target
        .and_then(Value::as_object_mut)
        .ok_or_else(|| Error::validation(field, format!("field '{key}' is not an object")))
}

/// Set or remove the value at a path. Intermediate segments must already
/// exist and be objects.
pub(crate) fn apply(
    field: &str,
    data: &mut Map<String, Value>,
    segments: &[Segment],
    edit: Edit,
) -> Result<()> {
    let Some((last, parents)) = segments.split_last() else {
        return Err(Error::validation(field, "JSONPath cannot be empty"));
    };
    let mut current = data;
    for segment in parents {
        current = descend(field, current, segment)?;
    }

    let key = &last.key;
    match (last.index, edit) {
        (Index::None, Edit::Set(value)) => {
            current.insert(key.clone(), value);
        }
        (Index::None, Edit::Remove) => {
            current.remove(key);
        }
        (Index::All, _) => {
            return Err(Error::validation(
                field,
                "wildcards are not supported when modifying",
            ));
        }
        (Index::Append | Index::At(_), Edit::Remove) => {
            return Err(Error::validation(
                field,
                "removing individual array elements is not supported",
            ));
        }
        (Index::Append, Edit::Set(value)) => {
            current
                .get_mut(key)
                .and_then(Value::as_array_mut)
                .ok_or_else(|| Error::validation(field, format!("field '{key}' is not an array")))?
                .push(value);
        }
        (Index::At(index), Edit::Set(value)) => {
            let items = current
                .get_mut(key)
                .and_then(Value::as_array_mut)
                .ok_or_else(|| Error::validation(field, format!("field '{key}' is not an array")))?;
            let len = items.len();
            let slot = items
                .get_mut(index)
                .ok_or_else(|| out_of_bounds(field, key, index, len))?;
            *slot = value;
        }
    }
    Ok(())
}
