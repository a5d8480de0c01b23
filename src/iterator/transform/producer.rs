//! Per-column value producers

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use uuid::Uuid;

use super::convert::{self, ConversionError};
use crate::iterator::{LoadError, ProcessingContext, RowCursor};
use crate::models::{SemanticType, Value};

/// Failure of a producer for one row
#[derive(Debug)]
pub enum ProduceError {
    /// Recoverable: recorded as a field error, the column becomes `Null`
    Conversion(ConversionError),
    /// Fatal: aborts the run
    Fatal(LoadError),
}

impl From<ConversionError> for ProduceError {
    fn from(error: ConversionError) -> Self {
        ProduceError::Conversion(error)
    }
}

impl From<LoadError> for ProduceError {
    fn from(error: LoadError) -> Self {
        ProduceError::Fatal(error)
    }
}

/// What a producer can see while computing its column
pub struct RowView<'a> {
    /// Source cursor positioned on the current row
    pub input: &'a dyn RowCursor,
    /// Output values already computed for this row (index 0 is the row number)
    pub output: &'a [Value],
    /// Run context
    pub context: &'a ProcessingContext,
}

impl RowView<'_> {
    /// Value of a source column
    pub fn input_value(&self, index: usize) -> &Value {
        self.input.value_at(index)
    }

    /// Value of an earlier output column
    pub fn output_value(&self, index: usize) -> Option<&Value> {
        self.output.get(index)
    }
}

type CustomProducer = Box<dyn FnMut(&RowView<'_>) -> Result<Value, ProduceError>>;

/// How one output column is computed for each row
pub enum ValueProducer {
    /// Copy a source column unchanged
    PassThrough { index: usize },
    /// Copy an earlier output column
    Alias { output_index: usize },
    /// A source column, or the fallback when it is blank
    Coalesce {
        index: usize,
        fallback: Box<ValueProducer>,
    },
    /// Convert a source column to a type
    Convert { index: usize, target: SemanticType },
    /// Convert with missing-value indicator support
    MissingValueConvert {
        index: usize,
        indicator_index: Option<usize>,
        target: SemanticType,
    },
    /// Dictionary lookup of a source column
    Remap {
        index: usize,
        dictionary: Rc<HashMap<String, Value>>,
        strict: bool,
    },
    /// The same value for every row
    Constant(Value),
    /// Increments by one per row from `start`; `next` is `None` once past `i64::MAX`
    Counter { start: i64, next: Option<i64> },
    /// A fresh random UUID per row
    GenerateIdentifier,
    /// One timestamp shared by every row (and every column holding a clone)
    FixedTimestamp(DateTime<Utc>),
    /// Caller-supplied computation
    Custom(CustomProducer),
}

impl ValueProducer {
    /// Wrap a closure as a producer
    pub fn custom<F>(f: F) -> Self
    where
        F: FnMut(&RowView<'_>) -> Result<Value, ProduceError> + 'static,
    {
        ValueProducer::Custom(Box::new(f))
    }

    /// A counter starting at `start`
    pub fn counter(start: i64) -> Self {
        ValueProducer::Counter {
            start,
            next: Some(start),
        }
    }

    /// Return stateful producers to their initial state
    pub fn reset(&mut self) {
        match self {
            ValueProducer::Counter { start, next } => *next = Some(*start),
            ValueProducer::Coalesce { fallback, .. } => fallback.reset(),
            _ => {}
        }
    }

    /// Highest output index this producer reads, if any
    pub fn output_dependency(&self) -> Option<usize> {
        match self {
            ValueProducer::Alias { output_index } => Some(*output_index),
            ValueProducer::Coalesce { fallback, .. } => fallback.output_dependency(),
            _ => None,
        }
    }

    /// Highest source index this producer reads, if any
    pub fn input_dependency(&self) -> Option<usize> {
        match self {
            ValueProducer::PassThrough { index }
            | ValueProducer::Convert { index, .. }
            | ValueProducer::Remap { index, .. } => Some(*index),
            ValueProducer::MissingValueConvert {
                index,
                indicator_index,
                ..
            } => Some((*index).max(indicator_index.unwrap_or(0))),
            ValueProducer::Coalesce { index, fallback } => {
                Some((*index).max(fallback.input_dependency().unwrap_or(0)))
            }
            _ => None,
        }
    }

    /// Compute the value for the current row
    pub fn produce(&mut self, row: &RowView<'_>) -> Result<Value, ProduceError> {
        match self {
            ValueProducer::PassThrough { index } => Ok(row.input_value(*index).clone()),
            ValueProducer::Alias { output_index } => {
                row.output_value(*output_index).cloned().ok_or_else(|| {
                    ProduceError::Fatal(LoadError::Configuration(format!(
                        "Alias of output column {} read before it was computed",
                        output_index
                    )))
                })
            }
            ValueProducer::Coalesce { index, fallback } => {
                let value = row.input_value(*index);
                if value.is_blank() {
                    fallback.produce(row)
                } else {
                    Ok(value.clone())
                }
            }
            ValueProducer::Convert { index, target } => {
                Ok(convert::convert(row.input_value(*index), *target)?)
            }
            ValueProducer::MissingValueConvert {
                index,
                indicator_index,
                target,
            } => {
                let indicator = indicator_index.map(|i| row.input_value(i));
                Ok(convert::convert_missing_value(
                    row.input_value(*index),
                    indicator,
                    *target,
                    row.context,
                )?)
            }
            ValueProducer::Remap {
                index,
                dictionary,
                strict,
            } => Ok(convert::remap(row.input_value(*index), dictionary, *strict)?),
            ValueProducer::Constant(value) => Ok(value.clone()),
            ValueProducer::Counter { next, .. } => {
                let Some(value) = *next else {
                    return Err(ConversionError::OutOfRange {
                        value: (i128::from(i64::MAX) + 1).to_string(),
                        target: SemanticType::BigInt,
                    }
                    .into());
                };
                *next = value.checked_add(1);
                Ok(Value::Int(value))
            }
            ValueProducer::GenerateIdentifier => Ok(Value::Guid(Uuid::new_v4())),
            ValueProducer::FixedTimestamp(ts) => Ok(Value::Timestamp(*ts)),
            ValueProducer::Custom(f) => f(row),
        }
    }
}

impl fmt::Debug for ValueProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueProducer::PassThrough { index } => write!(f, "PassThrough({})", index),
            ValueProducer::Alias { output_index } => write!(f, "Alias({})", output_index),
            ValueProducer::Coalesce { index, fallback } => {
                write!(f, "Coalesce({}, {:?})", index, fallback)
            }
            ValueProducer::Convert { index, target } => {
                write!(f, "Convert({}, {})", index, target)
            }
            ValueProducer::MissingValueConvert {
                index,
                indicator_index,
                target,
            } => write!(
                f,
                "MissingValueConvert({}, {:?}, {})",
                index, indicator_index, target
            ),
            ValueProducer::Remap { index, strict, .. } => {
                write!(f, "Remap({}, strict={})", index, strict)
            }
            ValueProducer::Constant(value) => write!(f, "Constant({:?})", value),
            ValueProducer::Counter { next, .. } => write!(f, "Counter(next={:?})", next),
            ValueProducer::GenerateIdentifier => f.write_str("GenerateIdentifier"),
            ValueProducer::FixedTimestamp(ts) => write!(f, "FixedTimestamp({})", ts),
            ValueProducer::Custom(_) => f.write_str("Custom"),
        }
    }
}
