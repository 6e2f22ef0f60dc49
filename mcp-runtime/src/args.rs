use grafana_mcp_core::error::{Error, Result};
use serde_json::{Map, Value};

pub fn arg_bool(args: &Map<String, Value>, key: &str, default: bool) -> Result<bool> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(v)) => Ok(*v),
        Some(_) => Err(Error::validation(key, format!("'{key}' must be a boolean"))),
    }
}

pub fn arg_string(args: &Map<String, Value>, key: &str, default: &str) -> Result<String> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default.to_string()),
        Some(Value::String(v)) => Ok(v.trim().to_string()),
        Some(_) => Err(Error::validation(key, format!("'{key}' must be a string"))),
    }
}

pub fn required_string(args: &Map<String, Value>, key: &str) -> Result<String> {
    let value = args
        .get(key)
        .ok_or_else(|| Error::validation(key, format!("Missing required field '{key}'")))?;
    match value {
        Value::String(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        Value::String(_) => Err(Error::validation(key, format!("'{key}' must not be empty"))),
        _ => Err(Error::validation(key, format!("'{key}' must be a string"))),
    }
}

pub fn arg_optional_string(args: &Map<String, Value>, key: &str) -> Result<Option<String>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(v)) if v.trim().is_empty() => Ok(None),
        Some(Value::String(v)) => Ok(Some(v.trim().to_string())),
        Some(_) => Err(Error::validation(key, format!("'{key}' must be a string"))),
    }
}

pub fn arg_optional_u64(args: &Map<String, Value>, key: &str) -> Result<Option<u64>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| Error::validation(key, format!("'{key}' must be an unsigned integer")))
            .map(Some),
        Some(_) => Err(Error::validation(
            key,
            format!("'{key}' must be an unsigned integer"),
        )),
    }
}

pub fn arg_optional_object<'a>(
    args: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(Error::validation(key, format!("'{key}' must be an object"))),
    }
}

/// Validate a value that is interpolated into an upstream URL path.
pub fn path_segment(field: &str, value: &str) -> Result<String> {
    if value.contains(['/', '?', '#', '\\']) || value == ".." || value == "." {
        return Err(Error::validation(
            field,
            format!("'{field}' must not contain path separators"),
        ));
    }
    Ok(value.to_string())
}

/// Build the map of parameters echoed into a response envelope.
pub fn echo<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}
