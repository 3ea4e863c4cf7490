use crate::config::IdStrategy;
use crate::error::{CampusError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;

/// Current time as an ISO-8601 string with millisecond precision (`2026-01-31T09:15:00.000Z`).
pub fn now_iso() -> String {
    to_iso(Utc::now())
}

pub fn to_iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp or a user-supplied date bound.
/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SS` (taken as UTC) and bare `YYYY-MM-DD` (UTC midnight).
pub fn parse_timestamp(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
    }
    None
}

/// Parse an optional user-supplied range bound; a blank bound is no bound.
pub fn parse_bound(name: &str, value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => parse_timestamp(v)
            .map(Some)
            .ok_or_else(|| CampusError::Validation(format!("Invalid {name} '{v}'"))),
    }
}

/// Parse a timestamp held in a cell. Numbers are epoch milliseconds.
pub fn cell_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

/// Textual rendering of a cell, used for loose comparisons and diff output.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 {
                    return format!("{}", f as i64);
                }
            }
            n.to_string()
        }
        other => other.to_string(),
    }
}

/// Text of a record field; an absent field reads as `""`.
pub fn field_text(record: &serde_json::Map<String, Value>, key: &str) -> String {
    record.get(key).map(cell_text).unwrap_or_default()
}

/// Loose equality: a cell matches a value when both render to the same text.
pub fn loose_eq(cell: &Value, value: &Value) -> bool {
    cell == value || cell_text(cell) == cell_text(value)
}

/// Truthiness of a cell: `""`, `null`, `false`, `0` and `"false"` are falsy.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(Value::String(s)) => !s.is_empty() && !s.eq_ignore_ascii_case("false"),
        Some(_) => true,
    }
}

/// A field counts as missing when absent, null or an empty string.
pub fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

/// Numeric value of a cell (`parseFloat`-style); non-numeric cells yield `None`.
pub fn cell_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(_) | Value::Null => None,
        _ => None,
    }
}

/// Round to one decimal place, the precision stats are reported with.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Generate an identifier carrying a table-specific prefix (`USR`, `ADM`, ...).
pub fn generate_id(prefix: &str, strategy: IdStrategy) -> String {
    match strategy {
        IdStrategy::Timestamp => {
            let millis = Utc::now().timestamp_millis();
            let suffix = uuid::Uuid::new_v4().as_u128() % 1000;
            format!("{prefix}{millis}{suffix}")
        }
        IdStrategy::Ulid => format!("{prefix}{}", ulid::Ulid::new()),
        IdStrategy::Uuid => format!("{prefix}{}", uuid::Uuid::new_v4().simple()),
        IdStrategy::Nanoid => format!("{prefix}{}", nanoid::nanoid!()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_now_iso_shape() {
        let ts = now_iso();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2026-01-31T09:15:00.000Z".len());
        assert!(parse_timestamp(&ts).is_some());
    }

    #[test]
    fn test_parse_timestamp_forms() {
        let day = parse_timestamp("2024-03-01").unwrap();
        assert_eq!(to_iso(day), "2024-03-01T00:00:00.000Z");
        assert!(parse_timestamp("2024-03-01T10:00:00").is_some());
        assert!(parse_timestamp("2024-03-01T10:00:00+05:30").is_some());
        assert!(parse_timestamp("not a date").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(None));
        assert!(!is_truthy(Some(&json!(""))));
        assert!(!is_truthy(Some(&json!(false))));
        assert!(!is_truthy(Some(&json!("FALSE"))));
        assert!(!is_truthy(Some(&json!(0))));
        assert!(is_truthy(Some(&json!(true))));
        assert!(is_truthy(Some(&json!("TRUE"))));
        assert!(is_truthy(Some(&json!(1))));
    }

    #[test]
    fn test_loose_eq() {
        assert!(loose_eq(&json!(1), &json!("1")));
        assert!(loose_eq(&json!(2.0), &json!("2")));
        assert!(loose_eq(&json!("x"), &json!("x")));
        assert!(!loose_eq(&json!("x"), &json!("y")));
        assert!(!loose_eq(&json!(""), &json!(0)));
    }

    #[test]
    fn test_cell_number() {
        assert_eq!(cell_number(Some(&json!("12.5"))), Some(12.5));
        assert_eq!(cell_number(Some(&json!(7))), Some(7.0));
        assert_eq!(cell_number(Some(&json!(""))), None);
        assert_eq!(cell_number(None), None);
    }

    #[test]
    fn test_generate_id_keeps_prefix() {
        for strategy in [
            IdStrategy::Timestamp,
            IdStrategy::Ulid,
            IdStrategy::Uuid,
            IdStrategy::Nanoid,
        ] {
            let a = generate_id("USR", strategy);
            assert!(a.starts_with("USR"));
            assert!(a.len() > 3);
        }
        assert_ne!(
            generate_id("X", IdStrategy::Ulid),
            generate_id("X", IdStrategy::Ulid)
        );
    }
}
