//! Target table metadata consumed by the load orchestrator

use serde::{Deserialize, Serialize};

use super::column::ColumnSpec;
use super::identifier::Identifier;

/// Metadata for a load target, as supplied by the schema service
///
/// The pipeline never provisions tables; it only reads this description to
/// decide which columns to bind and whether generated keys must be re-read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name
    pub name: String,
    /// Columns in storage order
    pub columns: Vec<ColumnSpec>,
    /// Whether side-effecting triggers may modify inserted values
    #[serde(default)]
    pub has_triggers: bool,
    /// Columns identifying a row for merge operations
    #[serde(default)]
    pub key_columns: Vec<String>,
    /// Identity column populated by the store (re-read after insert)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_id_column: Option<String>,
    /// Object identifier column (re-read after insert or merge)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id_column: Option<String>,
}

impl TableSchema {
    /// Create a new table description
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        Self {
            name: name.into(),
            columns,
            has_triggers: false,
            key_columns: Vec::new(),
            row_id_column: None,
            object_id_column: None,
        }
    }

    /// Set the merge key columns
    pub fn with_key_columns<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_columns = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Set the identity column
    pub fn with_row_id_column(mut self, name: impl Into<String>) -> Self {
        self.row_id_column = Some(name.into());
        self
    }

    /// Set the object identifier column
    pub fn with_object_id_column(mut self, name: impl Into<String>) -> Self {
        self.object_id_column = Some(name.into());
        self
    }

    /// Mark the table as having triggers
    pub fn with_triggers(mut self) -> Self {
        self.has_triggers = true;
        self
    }

    /// Find a column by name (case-insensitive)
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.is_named(name))
    }

    /// Position of a column by name (case-insensitive)
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.is_named(name))
    }

    /// Whether the table defines a column with this name
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// The column whose missing-value indicator is stored in `name`
    pub fn missing_value_owner(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| {
            c.missing_values_enabled
                && c.missing_value_column
                    .as_deref()
                    .is_some_and(|companion| Identifier::same_name(companion, name))
        })
    }
}
