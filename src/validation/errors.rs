//! Field, row, global and batch validation errors.
//!
//! Errors raised while loading data form a small hierarchy:
//!
//! - [`FieldError`]: one column of one row could not be produced
//! - [`RowError`]: all field errors of a row, plus an optional row message
//! - [`GlobalError`]: a problem not attributable to a single row
//! - [`BatchError`]: the terminal, ordered collection handed to the caller
//!
//! [`ErrorSink`] accumulates them for one run.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

use crate::models::Identifier;

/// A recoverable error local to one column of one row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Name of the output column
    pub field: String,
    /// Human-readable message
    pub message: String,
}

impl FieldError {
    /// Create a new field error
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Case-insensitive identifier of the failing field
    pub fn identifier(&self) -> Identifier {
        Identifier::new(self.field.as_str())
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Errors for a single row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowError {
    /// 1-based source row number
    pub row_number: i64,
    /// Per-field errors
    #[serde(default)]
    pub field_errors: Vec<FieldError>,
    /// Whole-row message (e.g. a constraint violation)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RowError {
    /// Create an empty error holder for a row
    pub fn new(row_number: i64) -> Self {
        Self {
            row_number,
            field_errors: Vec::new(),
            message: None,
        }
    }

    /// Create a row error carrying only a whole-row message
    pub fn with_message(row_number: i64, message: impl Into<String>) -> Self {
        Self {
            row_number,
            field_errors: Vec::new(),
            message: Some(message.into()),
        }
    }

    /// Add a field error
    pub fn add_field_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.field_errors.push(FieldError::new(field, message));
    }

    /// Whether a field already failed in this row
    pub fn has_field_error(&self, field: &str) -> bool {
        self.field_errors
            .iter()
            .any(|e| Identifier::same_name(&e.field, field))
    }

    /// True if nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.field_errors.is_empty() && self.message.is_none()
    }
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Row {}", self.row_number)?;
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        for error in &self.field_errors {
            write!(f, "; {}", error)?;
        }
        Ok(())
    }
}

/// An error not attributable to one row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalError {
    /// Human-readable message
    pub message: String,
    /// Row being processed when the error surfaced, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_number: Option<i64>,
}

impl GlobalError {
    /// Create a new global error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            row_number: None,
        }
    }

    /// Attach the row being processed
    pub fn at_row(mut self, row_number: i64) -> Self {
        self.row_number = Some(row_number);
        self
    }
}

impl fmt::Display for GlobalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.row_number {
            Some(row) => write!(f, "{} (at row {})", self.message, row),
            None => f.write_str(&self.message),
        }
    }
}

/// Terminal collection of errors surfaced to the top-level caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchError {
    /// Row errors in source order
    pub row_errors: Vec<RowError>,
    /// Global errors in the order they were raised
    pub global_errors: Vec<GlobalError>,
}

impl BatchError {
    /// Total number of recorded errors
    pub fn len(&self) -> usize {
        self.row_errors.len() + self.global_errors.len()
    }

    /// True if no errors were recorded
    pub fn is_empty(&self) -> bool {
        self.row_errors.is_empty() && self.global_errors.is_empty()
    }

    /// All messages, globals first
    pub fn messages(&self) -> Vec<String> {
        self.global_errors
            .iter()
            .map(ToString::to_string)
            .chain(self.row_errors.iter().map(ToString::to_string))
            .collect()
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages = self.messages();
        match messages.first() {
            None => f.write_str("No errors"),
            Some(first) if messages.len() == 1 => f.write_str(first),
            Some(first) => write!(f, "{} (and {} more errors)", first, messages.len() - 1),
        }
    }
}

impl std::error::Error for BatchError {}

/// Error accumulator for one pipeline run.
///
/// A row counts as failed as soon as any of its fields fails, even when the
/// field error itself is suppressed by de-duplication, so
/// [`ErrorSink::row_error_count`] is always the number of failing rows.
#[derive(Debug, Clone, Default)]
pub struct ErrorSink {
    row_errors: Vec<RowError>,
    global_errors: Vec<GlobalError>,
    failed_rows: BTreeSet<i64>,
    reported_fields: HashSet<Identifier>,
}

impl ErrorSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the errors of one row.
    ///
    /// Without `verbose`, a field that already reported an error earlier in
    /// the run is dropped from `error`. Returns true if anything was kept.
    pub fn add_row_error(&mut self, mut error: RowError, verbose: bool) -> bool {
        if error.is_empty() {
            return false;
        }
        self.failed_rows.insert(error.row_number);

        let reported = &mut self.reported_fields;
        if verbose {
            for field_error in &error.field_errors {
                reported.insert(field_error.identifier());
            }
        } else {
            error
                .field_errors
                .retain(|field_error| reported.insert(field_error.identifier()));
        }

        if error.is_empty() {
            tracing::debug!(
                "Suppressed repeated field errors for row {}",
                error.row_number
            );
            return false;
        }
        self.row_errors.push(error);
        true
    }

    /// Record a global error
    pub fn add_global_error(&mut self, error: GlobalError) {
        self.global_errors.push(error);
    }

    /// True if any row failed or any global error was raised
    pub fn has_errors(&self) -> bool {
        !self.failed_rows.is_empty() || !self.global_errors.is_empty()
    }

    /// Number of rows that failed
    pub fn row_error_count(&self) -> usize {
        self.failed_rows.len()
    }

    /// Number of field errors that were reported (after de-duplication)
    pub fn field_error_count(&self) -> usize {
        self.row_errors.iter().map(|e| e.field_errors.len()).sum()
    }

    /// Number of global errors
    pub fn global_error_count(&self) -> usize {
        self.global_errors.len()
    }

    /// Whether the given row failed
    pub fn has_row_failure(&self, row_number: i64) -> bool {
        self.failed_rows.contains(&row_number)
    }

    /// Reported row errors
    pub fn row_errors(&self) -> &[RowError] {
        &self.row_errors
    }

    /// Reported global errors
    pub fn global_errors(&self) -> &[GlobalError] {
        &self.global_errors
    }

    /// Snapshot of the reported errors
    pub fn to_batch_error(&self) -> BatchError {
        BatchError {
            row_errors: self.row_errors.clone(),
            global_errors: self.global_errors.clone(),
        }
    }
}
