//! Column values and per-field conversion rules
//!
//! Source documents arrive as JSON (MongoDB extended JSON for the wrapped
//! types). Each defined field carries a [`Conversion`] derived from its
//! declared sink column type that turns the document value into a
//! [`ColumnValue`] the sink can bind as a statement parameter.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A value bound to one sink column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(Value),
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Text payload, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer payload, if this is an integer value.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl std::fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(n) => write!(f, "{}", n),
            Self::Float(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "{}", s),
            Self::Json(v) => write!(f, "{}", v),
        }
    }
}

/// Conversion rule applied to a source value before it is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conversion {
    Integer,
    Float,
    Boolean,
    DateTime,
    Date,
    Json,
    Text,
}

impl Conversion {
    /// Derive the conversion from a declared column type such as
    /// `VARCHAR(255)`, `BIGINT`, `TINYINT(1)` or the shorthand `number`.
    pub fn for_column_type(column_type: &str) -> Self {
        let lowered = column_type.trim().to_ascii_lowercase();
        let base = lowered
            .split(|c: char| c == '(' || c.is_whitespace())
            .next()
            .unwrap_or_default();

        match base {
            "bool" | "boolean" => Self::Boolean,
            "tinyint" if lowered.starts_with("tinyint(1)") => Self::Boolean,
            "int" | "integer" | "tinyint" | "smallint" | "mediumint" | "bigint" | "number" => {
                Self::Integer
            }
            "float" | "double" | "real" | "decimal" | "numeric" => Self::Float,
            "datetime" | "timestamp" => Self::DateTime,
            "date" => Self::Date,
            "json" => Self::Json,
            _ => Self::Text,
        }
    }

    /// Whether values of this conversion are numbers in the sink.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }

    /// Convert a (possibly missing) document value.
    ///
    /// Missing and `null` values become [`ColumnValue::Null`]. Values that do
    /// not fit the target type are passed through as text and left for the
    /// sink to coerce or reject.
    pub fn convert(&self, value: Option<&Value>) -> ColumnValue {
        let value = match value {
            None | Some(Value::Null) => return ColumnValue::Null,
            Some(v) => normalize(v),
        };

        match self {
            Self::Integer => match &value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
                    .map(ColumnValue::Int)
                    .unwrap_or(ColumnValue::Null),
                Value::Bool(b) => ColumnValue::Int(i64::from(*b)),
                Value::String(s) => s
                    .parse::<i64>()
                    .map(ColumnValue::Int)
                    .unwrap_or_else(|_| ColumnValue::Text(s.clone())),
                other => ColumnValue::Text(other.to_string()),
            },
            Self::Float => match &value {
                Value::Number(n) => n
                    .as_f64()
                    .map(ColumnValue::Float)
                    .unwrap_or(ColumnValue::Null),
                Value::Bool(b) => ColumnValue::Float(if *b { 1.0 } else { 0.0 }),
                Value::String(s) => s
                    .parse::<f64>()
                    .map(ColumnValue::Float)
                    .unwrap_or_else(|_| ColumnValue::Text(s.clone())),
                other => ColumnValue::Text(other.to_string()),
            },
            Self::Boolean => match &value {
                Value::Bool(b) => ColumnValue::Bool(*b),
                Value::Number(n) => ColumnValue::Bool(n.as_f64().is_some_and(|f| f != 0.0)),
                Value::String(s) => ColumnValue::Bool(matches!(
                    s.to_ascii_lowercase().as_str(),
                    "true" | "1" | "yes"
                )),
                other => ColumnValue::Text(other.to_string()),
            },
            Self::DateTime => match &value {
                Value::String(s) => ColumnValue::Text(
                    parse_datetime(s)
                        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
                        .unwrap_or_else(|| s.clone()),
                ),
                Value::Number(n) => n
                    .as_i64()
                    .and_then(DateTime::<Utc>::from_timestamp_millis)
                    .map(|dt| ColumnValue::Text(dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string()))
                    .unwrap_or(ColumnValue::Null),
                other => ColumnValue::Text(other.to_string()),
            },
            Self::Date => match &value {
                Value::String(s) => ColumnValue::Text(
                    parse_datetime(s)
                        .map(|dt| dt.format("%Y-%m-%d").to_string())
                        .unwrap_or_else(|| s.clone()),
                ),
                Value::Number(n) => n
                    .as_i64()
                    .and_then(DateTime::<Utc>::from_timestamp_millis)
                    .map(|dt| ColumnValue::Text(dt.format("%Y-%m-%d").to_string()))
                    .unwrap_or(ColumnValue::Null),
                other => ColumnValue::Text(other.to_string()),
            },
            Self::Json => ColumnValue::Json(value),
            Self::Text => match value {
                Value::String(s) => ColumnValue::Text(s),
                Value::Number(n) => ColumnValue::Text(n.to_string()),
                Value::Bool(b) => ColumnValue::Text(b.to_string()),
                other => ColumnValue::Text(other.to_string()),
            },
        }
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Unwrap MongoDB extended JSON wrappers into plain JSON values.
///
/// Nested documents and arrays are normalized recursively so JSON columns
/// receive plain values as well.
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(unwrapped) = map.iter().next().and_then(|(k, v)| unwrap_wrapper(k, v))
                {
                    return unwrapped;
                }
            }
            Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), normalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        other => other.clone(),
    }
}

fn unwrap_wrapper(key: &str, inner: &Value) -> Option<Value> {
    match (key, inner) {
        ("$oid", Value::String(s)) => Some(Value::String(s.clone())),
        ("$numberInt" | "$numberLong", Value::String(s)) => Some(
            s.parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(s.clone())),
        ),
        ("$numberDouble" | "$numberDecimal", Value::String(s)) => Some(
            s.parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(s.clone())),
        ),
        ("$date", inner) => Some(date_value(inner)),
        _ => None,
    }
}

fn date_value(inner: &Value) -> Value {
    let millis = match inner {
        Value::String(s) => return Value::String(s.clone()),
        Value::Number(n) => n.as_i64(),
        Value::Object(map) => map
            .get("$numberLong")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<i64>().ok()),
        _ => None,
    };

    millis
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)))
        .unwrap_or(Value::Null)
}
