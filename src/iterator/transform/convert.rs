//! Type coercion, missing-value handling and dictionary remapping

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::iterator::ProcessingContext;
use crate::models::{MissingValue, SemanticType, Value};

/// Timestamp layouts accepted from text, tried in order
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

/// Date layouts accepted from text, tried in order
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d-%b-%Y"];

/// Recoverable failure to produce a column value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// The value cannot be represented as the target type
    #[error("Could not convert value '{value}' ({kind}) to {target}")]
    InvalidValue {
        value: String,
        kind: &'static str,
        target: SemanticType,
    },

    /// The value is outside the target type's range
    #[error("Value '{value}' is out of range for {target}")]
    OutOfRange { value: String, target: SemanticType },

    /// An explicit missing-value indicator is not in the accepted list
    #[error("Value is not a valid missing value indicator: {0}")]
    InvalidIndicator(String),

    /// A strict remap found no dictionary entry
    #[error("Value '{0}' was not found in the lookup dictionary")]
    NotInDictionary(String),
}

impl ConversionError {
    fn invalid(value: &Value, target: SemanticType) -> Self {
        ConversionError::InvalidValue {
            value: value.to_string(),
            kind: value.kind(),
            target,
        }
    }
}

/// Convert `value` to `target`.
///
/// Null and blank text become `Null`; flagged missing values keep their
/// indicator and have their inner value converted.
pub fn convert(value: &Value, target: SemanticType) -> Result<Value, ConversionError> {
    if value.is_blank() {
        return Ok(Value::Null);
    }
    if let Value::Missing(mv) = value {
        let inner = convert(&mv.value, target)?;
        return Ok(Value::Missing(MissingValue::new(inner, mv.indicator.clone())));
    }

    match target {
        SemanticType::Text => Ok(match value {
            Value::Text(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }),
        SemanticType::Integer => {
            let i = to_i64(value, target)?;
            if i32::try_from(i).is_err() {
                return Err(ConversionError::OutOfRange {
                    value: value.to_string(),
                    target,
                });
            }
            Ok(Value::Int(i))
        }
        SemanticType::BigInt => to_i64(value, target).map(Value::Int),
        SemanticType::Double => match value {
            Value::Float(f) => Ok(Value::Float(*f)),
            Value::Int(i) => Ok(Value::Float(*i as f64)),
            Value::Text(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| ConversionError::invalid(value, target)),
            _ => Err(ConversionError::invalid(value, target)),
        },
        SemanticType::Boolean => match value {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::Int(0) => Ok(Value::Bool(false)),
            Value::Int(1) => Ok(Value::Bool(true)),
            Value::Text(s) => parse_bool(s)
                .map(Value::Bool)
                .ok_or_else(|| ConversionError::invalid(value, target)),
            _ => Err(ConversionError::invalid(value, target)),
        },
        SemanticType::Date => match value {
            Value::Date(d) => Ok(Value::Date(*d)),
            Value::Timestamp(ts) => Ok(Value::Date(ts.date_naive())),
            Value::Text(s) => parse_date(s.trim())
                .map(Value::Date)
                .ok_or_else(|| ConversionError::invalid(value, target)),
            _ => Err(ConversionError::invalid(value, target)),
        },
        SemanticType::Timestamp => match value {
            Value::Timestamp(ts) => Ok(Value::Timestamp(*ts)),
            Value::Date(d) => Ok(Value::Timestamp(midnight(*d))),
            Value::Text(s) => parse_timestamp(s.trim())
                .map(Value::Timestamp)
                .ok_or_else(|| ConversionError::invalid(value, target)),
            _ => Err(ConversionError::invalid(value, target)),
        },
        SemanticType::Guid => match value {
            Value::Guid(id) => Ok(Value::Guid(*id)),
            Value::Text(s) => Uuid::parse_str(s.trim())
                .map(Value::Guid)
                .map_err(|_| ConversionError::invalid(value, target)),
            _ => Err(ConversionError::invalid(value, target)),
        },
        SemanticType::Binary => match value {
            Value::Binary(bytes) => Ok(Value::Binary(bytes.clone())),
            Value::Text(s) => Ok(Value::Binary(s.as_bytes().to_vec())),
            _ => Err(ConversionError::invalid(value, target)),
        },
    }
}

/// Missing-value-aware conversion.
///
/// - A blank raw value with no indicator is `Null`.
/// - An explicit indicator must be accepted by the context; the raw value is
///   converted and flagged with it.
/// - Without an explicit indicator, a raw text value equal to an accepted
///   indicator becomes a flagged `Null`.
/// - Anything else is converted normally.
pub fn convert_missing_value(
    raw: &Value,
    indicator: Option<&Value>,
    target: SemanticType,
    context: &ProcessingContext,
) -> Result<Value, ConversionError> {
    let explicit = indicator
        .filter(|i| !i.is_blank())
        .map(|i| i.to_string().trim().to_string());

    if let Some(token) = explicit {
        if !context.is_missing_value_indicator(&token) {
            return Err(ConversionError::InvalidIndicator(token));
        }
        let value = convert(raw, target)?;
        return Ok(Value::Missing(MissingValue::new(value, token)));
    }

    if raw.is_blank() {
        return Ok(Value::Null);
    }
    if let Value::Text(s) = raw
        && context.is_missing_value_indicator(s)
    {
        return Ok(Value::Missing(MissingValue::new(Value::Null, s.trim())));
    }
    convert(raw, target)
}

/// Look `value` up in `dictionary`.
///
/// Keys are the text form of the value. A missing key is an error when
/// `strict`, otherwise the value passes through unchanged.
pub fn remap(
    value: &Value,
    dictionary: &HashMap<String, Value>,
    strict: bool,
) -> Result<Value, ConversionError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let key = value.to_string();
    match dictionary.get(&key) {
        Some(mapped) => Ok(mapped.clone()),
        None if strict => Err(ConversionError::NotInDictionary(key)),
        None => Ok(value.clone()),
    }
}

/// -2^63 and 2^63; every whole float in `[MIN, MAX)` fits an i64
const I64_FLOAT_MIN: f64 = -9_223_372_036_854_775_808.0;
const I64_FLOAT_MAX: f64 = 9_223_372_036_854_775_808.0;

fn float_to_i64(f: f64, value: &Value, target: SemanticType) -> Result<i64, ConversionError> {
    if (I64_FLOAT_MIN..I64_FLOAT_MAX).contains(&f) {
        Ok(f as i64)
    } else {
        Err(ConversionError::OutOfRange {
            value: value.to_string(),
            target,
        })
    }
}

fn to_i64(value: &Value, target: SemanticType) -> Result<i64, ConversionError> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Float(f) if f.fract() == 0.0 && f.is_finite() => float_to_i64(*f, value, target),
        Value::Text(s) => {
            let trimmed = s.trim();
            trimmed.parse::<i64>().or_else(|_| {
                // accept "12.0" style integers exported by spreadsheets
                match trimmed.parse::<f64>() {
                    Ok(f) if f.fract() == 0.0 && f.is_finite() => float_to_i64(f, value, target),
                    _ => Err(ConversionError::invalid(value, target)),
                }
            })
        }
        _ => Err(ConversionError::invalid(value, target)),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "on" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(s, format).ok())
        .or_else(|| parse_timestamp(s).map(|ts| ts.date_naive()))
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(s, format).ok())
                .map(midnight)
        })
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}
