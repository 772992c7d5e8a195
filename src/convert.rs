//! Parameter conversion.
//!
//! A query declares the expected type of each criteria field. Before a script
//! is evaluated the raw criteria are coerced to those types; arrays convert
//! element-wise so a `integer` field also accepts a list of integers.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QueryError, QueryResult};
use crate::value::number_from_f64;

/// Target type of a criteria field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Decimal,
    Boolean,
    Date,
    DateTime,
    Json,
}

impl FromStr for ParamType {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" | "str" | "text" => Ok(ParamType::String),
            "integer" | "int" | "long" => Ok(ParamType::Integer),
            "decimal" | "double" | "float" | "number" => Ok(ParamType::Decimal),
            "boolean" | "bool" => Ok(ParamType::Boolean),
            "date" => Ok(ParamType::Date),
            "datetime" | "instant" | "timestamp" => Ok(ParamType::DateTime),
            "json" | "any" => Ok(ParamType::Json),
            other => Err(QueryError::Conversion(format!(
                "Unknown parameter type '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Decimal => "decimal",
            ParamType::Boolean => "boolean",
            ParamType::Date => "date",
            ParamType::DateTime => "datetime",
            ParamType::Json => "json",
        };
        f.write_str(name)
    }
}

/// Apply a conversion schema to the criteria object.
///
/// Fields without a schema entry pass through untouched; non-object criteria
/// are returned as-is.
pub fn convert_criteria(schema: &BTreeMap<String, ParamType>, criteria: Value) -> QueryResult<Value> {
    if schema.is_empty() {
        return Ok(criteria);
    }
    match criteria {
        Value::Object(mut map) => {
            for (name, ty) in schema {
                if let Some(slot) = map.get_mut(name) {
                    let raw = std::mem::take(slot);
                    *slot = convert_value(&raw, *ty).map_err(|e| {
                        QueryError::Conversion(format!("parameter '{}': {}", name, e))
                    })?;
                }
            }
            Ok(Value::Object(map))
        }
        other => Ok(other),
    }
}

/// Convert a single value (element-wise for arrays). Nulls are preserved.
pub fn convert_value(value: &Value, ty: ParamType) -> Result<Value, String> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Array(items) if ty != ParamType::Json => items
            .iter()
            .map(|item| convert_value(item, ty))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        _ => convert_scalar(value, ty),
    }
}

fn convert_scalar(value: &Value, ty: ParamType) -> Result<Value, String> {
    match ty {
        ParamType::Json => Ok(value.clone()),
        ParamType::String => Ok(match value {
            Value::String(s) => Value::String(s.clone()),
            other => Value::String(other.to_string()),
        }),
        ParamType::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 => Ok(Value::from(f as i64)),
                _ => Err(format!("{} is not an integer", n)),
            },
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("'{}' is not an integer", s)),
            Value::Bool(b) => Ok(Value::from(i64::from(*b))),
            other => Err(format!("cannot convert {} to integer", other)),
        },
        ParamType::Decimal => match value {
            Value::Number(n) => Ok(Value::Number(number_from_f64(n.as_f64().unwrap_or(0.0)))),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(|f| Value::Number(number_from_f64(f)))
                .map_err(|_| format!("'{}' is not a decimal", s)),
            other => Err(format!("cannot convert {} to decimal", other)),
        },
        ParamType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::Bool(n.as_f64().unwrap_or(0.0) != 0.0)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "y" | "on" => Ok(Value::Bool(true)),
                "false" | "0" | "no" | "n" | "off" => Ok(Value::Bool(false)),
                _ => Err(format!("'{}' is not a boolean", s)),
            },
            other => Err(format!("cannot convert {} to boolean", other)),
        },
        ParamType::Date => to_date(value).map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
        ParamType::DateTime => to_datetime(value)
            .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true))),
    }
}

fn to_date(value: &Value) -> Result<NaiveDate, String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .or_else(|_| to_datetime(value).map(|dt| dt.date_naive()))
                .map_err(|_| format!("'{}' is not a date", s))
        }
        Value::Number(_) => to_datetime(value).map(|dt| dt.date_naive()),
        other => Err(format!("cannot convert {} to date", other)),
    }
}

fn to_datetime(value: &Value) -> Result<DateTime<Utc>, String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Ok(Utc.from_utc_datetime(&naive));
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive))
                .ok_or_else(|| format!("'{}' is not a datetime", s))
        }
        // Epoch milliseconds
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
            .ok_or_else(|| format!("{} is not a valid timestamp", n)),
        other => Err(format!("cannot convert {} to datetime", other)),
    }
}
