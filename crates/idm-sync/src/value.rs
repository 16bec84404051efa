//! Conversions between mapped JSON values and typed entity fields.

use chrono::{DateTime, NaiveDate};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::types::EntityField;

/// Single string form of a value. Empty strings and null read as `None`.
pub fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => items.iter().find_map(as_string),
        Value::Object(_) => Some(value.to_string()),
    }
}

/// All string forms of a single or multi-valued value.
pub fn as_strings(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(as_string).collect(),
        other => as_string(other).into_iter().collect(),
    }
}

/// Parse a date from `YYYY-MM-DD` or an RFC 3339 timestamp.
pub fn as_date(field: EntityField, value: &Value) -> SyncResult<Option<NaiveDate>> {
    let Some(text) = as_string(value) else {
        return Ok(None);
    };
    if let Ok(date) = NaiveDate::parse_from_str(&text, "%Y-%m-%d") {
        return Ok(Some(date));
    }
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| Some(dt.date_naive()))
        .map_err(|_| SyncError::mapping(field.as_str(), format!("'{text}' is not a date")))
}

/// Parse a boolean from a bool, `"true"`/`"false"` or `0`/`1`.
pub fn as_bool(field: EntityField, value: &Value) -> SyncResult<Option<bool>> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        Value::Number(n) => Ok(Some(n.as_i64().unwrap_or_default() != 0)),
        other => match as_string(other).as_deref().map(str::to_lowercase).as_deref() {
            None => Ok(None),
            Some("true") | Some("1") | Some("yes") => Ok(Some(true)),
            Some("false") | Some("0") | Some("no") => Ok(Some(false)),
            Some(text) => Err(SyncError::mapping(
                field.as_str(),
                format!("'{text}' is not a boolean"),
            )),
        },
    }
}

/// Interpret a reference value as a UUID when it is one.
pub fn as_uuid(text: &str) -> Option<Uuid> {
    Uuid::parse_str(text.trim()).ok()
}

/// JSON form of an optional string.
pub fn from_string(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |s| Value::String(s.to_string()))
}

/// JSON form of an optional date.
pub fn from_date(value: Option<NaiveDate>) -> Value {
    value.map_or(Value::Null, |d| Value::String(d.format("%Y-%m-%d").to_string()))
}

/// JSON form of an optional UUID.
pub fn from_uuid(value: Option<Uuid>) -> Value {
    value.map_or(Value::Null, |u| Value::String(u.to_string()))
}

/// Value equality used by the differential diff.
///
/// Null, empty string and empty array are equal; a one-element array equals
/// its element; multi-valued values compare as sets of strings.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    let mut l = as_strings(left);
    let mut r = as_strings(right);
    if l.len() <= 1 && r.len() <= 1 {
        return l == r;
    }
    l.sort();
    r.sort();
    l == r
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_as_string_variants() {
        assert_eq!(as_string(&json!("a")), Some("a".to_string()));
        assert_eq!(as_string(&json!("")), None);
        assert_eq!(as_string(&json!(3)), Some("3".to_string()));
        assert_eq!(as_string(&json!(["x", "y"])), Some("x".to_string()));
        assert_eq!(as_string(&json!(null)), None);
    }

    #[test]
    fn test_as_date_formats() {
        let date = as_date(EntityField::ValidFrom, &json!("2024-02-29")).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 2, 29));

        let date = as_date(EntityField::ValidFrom, &json!("2024-03-01T10:00:00+00:00")).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 3, 1));

        assert!(as_date(EntityField::ValidFrom, &json!(null)).unwrap().is_none());
        assert!(as_date(EntityField::ValidFrom, &json!("yesterday")).is_err());
    }

    #[test]
    fn test_as_bool() {
        assert_eq!(as_bool(EntityField::Main, &json!("TRUE")).unwrap(), Some(true));
        assert_eq!(as_bool(EntityField::Main, &json!(0)).unwrap(), Some(false));
        assert!(as_bool(EntityField::Main, &json!("maybe")).is_err());
    }

    #[test]
    fn test_values_equal_normalizes() {
        assert!(values_equal(&json!(null), &json!("")));
        assert!(values_equal(&json!(["a"]), &json!("a")));
        assert!(values_equal(&json!(["b", "a"]), &json!(["a", "b"])));
        assert!(!values_equal(&json!("a"), &json!("b")));
        assert!(values_equal(&json!(5), &json!("5")));
    }
}
