//! Cell values and semantic column types

use base64::Engine;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Semantic type of a column, independent of any database dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    /// true/false
    Boolean,
    /// 32-bit signed integer
    Integer,
    /// 64-bit signed integer
    BigInt,
    /// Double precision floating point
    Double,
    /// Free text (default)
    #[default]
    Text,
    /// Calendar date without time
    Date,
    /// Point in time (UTC)
    Timestamp,
    /// UUID / entity identifier
    Guid,
    /// Raw bytes
    Binary,
}

impl std::str::FromStr for SemanticType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "boolean" | "bool" => Ok(SemanticType::Boolean),
            "integer" | "int" => Ok(SemanticType::Integer),
            "bigint" | "long" => Ok(SemanticType::BigInt),
            "double" | "float" | "real" => Ok(SemanticType::Double),
            "text" | "varchar" | "string" => Ok(SemanticType::Text),
            "date" => Ok(SemanticType::Date),
            "timestamp" | "datetime" => Ok(SemanticType::Timestamp),
            "guid" | "uuid" | "entityid" => Ok(SemanticType::Guid),
            "binary" | "blob" => Ok(SemanticType::Binary),
            _ => Err(format!("Unknown semantic type: {}", s)),
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SemanticType::Boolean => "Boolean",
            SemanticType::Integer => "Integer",
            SemanticType::BigInt => "BigInt",
            SemanticType::Double => "Double",
            SemanticType::Text => "Text",
            SemanticType::Date => "Date",
            SemanticType::Timestamp => "Timestamp",
            SemanticType::Guid => "Guid",
            SemanticType::Binary => "Binary",
        };
        f.write_str(name)
    }
}

/// A value flagged with a missing-value indicator.
///
/// Produced by missing-value-aware conversion: either the raw value itself was
/// an indicator token (`value` is [`Value::Null`]) or an explicit indicator was
/// supplied alongside a real value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingValue {
    /// Underlying value, usually `Null`
    pub value: Box<Value>,
    /// Indicator token, e.g. `Q` or `N`
    pub indicator: String,
}

impl MissingValue {
    /// Create a new flagged value
    pub fn new(value: Value, indicator: impl Into<String>) -> Self {
        Self {
            value: Box::new(value),
            indicator: indicator.into(),
        }
    }
}

/// A single cell value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    /// SQL NULL
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// Any integer
    Int(i64),
    /// Floating point
    Float(f64),
    /// Text
    Text(String),
    /// Calendar date
    Date(NaiveDate),
    /// UTC timestamp
    Timestamp(DateTime<Utc>),
    /// UUID
    Guid(Uuid),
    /// Raw bytes
    Binary(Vec<u8>),
    /// Value paired with a missing-value indicator
    Missing(MissingValue),
}

impl Value {
    /// Shorthand for a text value
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Check if this is SQL NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null, or text that is empty after trimming
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Borrow the text content, if this is a text value
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content, if this is an integer value
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Name of the value's runtime kind, used in conversion messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Boolean",
            Value::Int(_) => "Integer",
            Value::Float(_) => "Double",
            Value::Text(_) => "String",
            Value::Date(_) => "Date",
            Value::Timestamp(_) => "Timestamp",
            Value::Guid(_) => "Guid",
            Value::Binary(_) => "Binary",
            Value::Missing(_) => "MissingValue",
        }
    }

    /// Split a flagged value into its value and indicator parts
    pub fn split_missing(&self) -> (&Value, Option<&str>) {
        match self {
            Value::Missing(mv) => (mv.value.as_ref(), Some(mv.indicator.as_str())),
            other => (other, None),
        }
    }

    /// Convert to a JSON value for diagnostic output
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            Value::Timestamp(ts) => serde_json::Value::String(ts.to_rfc3339()),
            Value::Guid(id) => serde_json::Value::String(id.to_string()),
            Value::Binary(bytes) => serde_json::Value::String(
                base64::engine::general_purpose::STANDARD.encode(bytes),
            ),
            Value::Missing(mv) => serde_json::json!({
                "value": mv.value.to_json(),
                "indicator": mv.indicator,
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Timestamp(ts) => f.write_str(&ts.to_rfc3339()),
            Value::Guid(id) => write!(f, "{}", id),
            Value::Binary(bytes) => {
                f.write_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            Value::Missing(mv) => f.write_str(&mv.indicator),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Uuid> for Value {
    fn from(id: Uuid) -> Self {
        Value::Guid(id)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::Timestamp(ts)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
