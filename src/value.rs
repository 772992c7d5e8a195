//! JSON value helpers shared by scripts, fetch injection and hints.
//!
//! - get_path / get_field_value: read nested fields by dotted path
//! - set_path: write nested fields, creating intermediate objects
//! - values_equal / compare_values: numeric-aware comparison
//! - to_bool: truthiness used by predicates and template conditions

use std::cmp::Ordering;

use regex::Regex;
use serde_json::{Map, Value};

/// A result row: an ordered mapping from column name to value.
pub type Row = Map<String, Value>;

/// Borrow a nested value by dot-separated path (e.g. `"address.city"`).
///
/// Numeric segments index into arrays. Returns `None` when any segment is missing.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Read a nested field from a row.
pub fn get_row_path<'a>(row: &'a Row, path: &str) -> Option<&'a Value> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let value = row.get(head)?;
    match rest {
        Some(rest) => get_path(value, rest),
        None => Some(value),
    }
}

/// Extract a nested field value, or `Value::Null` when absent.
#[inline]
pub fn get_field_value(value: &Value, field_path: &str) -> Value {
    get_path(value, field_path).cloned().unwrap_or(Value::Null)
}

/// Write `value` into `row` at a dotted path, creating (or replacing non-object)
/// intermediate entries with empty objects.
pub fn set_path(row: &mut Row, path: &str, value: Value) {
    let mut parts = path.split('.').peekable();
    let mut current = row;
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            current.insert(part.to_string(), value);
            return;
        }
        let slot = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(map) = slot else {
            return;
        };
        current = map;
    }
}

/// Compare two JSON values for equality.
///
/// Numbers are compared by their f64 representation so `1` equals `1.0`.
#[inline]
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

/// Equality that treats an array on the left as a set of candidates.
pub fn value_matches(candidates: &Value, needle: &Value) -> bool {
    match candidates {
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        other => values_equal(other, needle),
    }
}

/// Create a serde_json::Number from an f64 value.
#[inline]
pub fn number_from_f64(n: f64) -> serde_json::Number {
    serde_json::Number::from_f64(n).unwrap_or_else(|| serde_json::Number::from(0))
}

/// Convert a JSON value to a boolean.
pub fn to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Order two JSON values. Mismatched types compare as equal.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            let a_f64 = a.as_f64().unwrap_or(0.0);
            let b_f64 = b.as_f64().unwrap_or(0.0);
            a_f64.partial_cmp(&b_f64).unwrap_or(Ordering::Equal)
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

/// Render a value as statement text: strings without quotes, null as empty.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Compile a regex with a pattern length limit.
pub fn safe_regex(pattern: &str) -> Result<Regex, regex::Error> {
    if pattern.len() > 1000 {
        return Err(regex::Error::Syntax(
            "Pattern too long (max 1000 chars)".to_string(),
        ));
    }
    Regex::new(pattern)
}

/// Push `value` into `out` unless `distinct` is set and an equal value is present.
pub fn push_unique(out: &mut Vec<Value>, value: Value, distinct: bool) {
    if distinct && out.iter().any(|v| values_equal(v, &value)) {
        return;
    }
    out.push(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_path_nested_and_indexed() {
        let doc = json!({"a": {"b": [10, {"c": "x"}]}});
        assert_eq!(get_path(&doc, "a.b.0"), Some(&json!(10)));
        assert_eq!(get_path(&doc, "a.b.1.c"), Some(&json!("x")));
        assert_eq!(get_path(&doc, "a.missing"), None);
        assert_eq!(get_field_value(&doc, "a.b.9"), Value::Null);
    }

    #[test]
    fn test_set_path_creates_intermediate_objects() {
        let mut row = Row::new();
        row.insert("owner".to_string(), json!(5));
        set_path(&mut row, "owner.profile.name", json!("ann"));
        set_path(&mut row, "tags", json!(["a"]));
        assert_eq!(
            Value::Object(row),
            json!({"owner": {"profile": {"name": "ann"}}, "tags": ["a"]})
        );
    }

    #[test]
    fn test_numeric_equality() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(!values_equal(&json!(1), &json!("1")));
        assert!(value_matches(&json!([1, 2, 3]), &json!(2)));
        assert!(!value_matches(&json!([1, 2, 3]), &json!(4)));
    }

    #[test]
    fn test_push_unique() {
        let mut out = Vec::new();
        push_unique(&mut out, json!(1), true);
        push_unique(&mut out, json!(1.0), true);
        push_unique(&mut out, json!(2), true);
        push_unique(&mut out, json!(2), false);
        assert_eq!(out, vec![json!(1), json!(2), json!(2)]);
    }

    #[test]
    fn test_truthiness() {
        assert!(!to_bool(&Value::Null));
        assert!(!to_bool(&json!("")));
        assert!(to_bool(&json!([0])));
        assert!(!to_bool(&json!(0)));
    }
}
