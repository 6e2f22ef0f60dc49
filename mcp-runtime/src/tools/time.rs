use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use grafana_mcp_core::error::{Error, Result};
use regex::Regex;
use serde_json::{Map, Value};

use crate::args::arg_optional_string;

static RELATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^now(?:\s*([+-])\s*(\d+)(ms|s|m|h|d|w))?$").expect("valid relative time regex")
});

/// Parse `now`, `now-<n><unit>`, `now+<n><unit>` or an RFC 3339 timestamp.
pub fn parse_time_expression(field: &str, expr: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Err(Error::validation(field, format!("'{field}' must not be empty")));
    }

    if let Some(captures) = RELATIVE_RE.captures(trimmed) {
        let (Some(sign), Some(amount), Some(unit)) =
            (captures.get(1), captures.get(2), captures.get(3))
        else {
            return Ok(now);
        };
        let amount: i64 = amount
            .as_str()
            .parse()
            .map_err(|_| Error::validation(field, format!("'{expr}' has an invalid amount")))?;
        let offset = match unit.as_str() {
            "ms" => Duration::try_milliseconds(amount),
            "s" => Duration::try_seconds(amount),
            "m" => Duration::try_minutes(amount),
            "h" => Duration::try_hours(amount),
            "d" => Duration::try_days(amount),
            _ => Duration::try_weeks(amount),
        };
        let shifted = offset.and_then(|offset| {
            if sign.as_str() == "-" {
                now.checked_sub_signed(offset)
            } else {
                now.checked_add_signed(offset)
            }
        });
        return shifted
            .ok_or_else(|| Error::validation(field, format!("'{expr}' is out of range")));
    }

    DateTime::parse_from_rfc3339(trimmed)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| {
            Error::validation(
                field,
                format!("'{expr}' is neither a relative time (now-1h) nor RFC 3339"),
            )
        })
}

/// Unix seconds with fractional part, as Prometheus expects.
pub fn unix_seconds(at: DateTime<Utc>) -> String {
    let millis = at.timestamp_millis();
    format!("{}.{:03}", millis.div_euclid(1000), millis.rem_euclid(1000))
}

/// Unix nanoseconds, as Loki expects.
pub fn unix_nanos(at: DateTime<Utc>) -> String {
    at.timestamp_nanos_opt()
        .map(|nanos| nanos.to_string())
        .unwrap_or_else(|| format!("{}000000", at.timestamp_millis()))
}

/// Resolve the optional `startRfc3339`/`endRfc3339` window. A missing end
/// is `now`; a missing start is one hour before the end.
pub fn time_window(
    args: &Map<String, Value>,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let end = match arg_optional_string(args, "endRfc3339")? {
        Some(raw) => parse_time_expression("endRfc3339", &raw, now)?,
        None => now,
    };
    let start = match arg_optional_string(args, "startRfc3339")? {
        Some(raw) => parse_time_expression("startRfc3339", &raw, now)?,
        None => end - Duration::hours(1),
    };
    if start >= end {
        return Err(Error::validation(
            "startRfc3339",
            "start time must be before end time",
        ));
    }
    Ok((start, end))
}
