//! Column model for load pipelines

use serde::{Deserialize, Serialize};

use super::identifier::Identifier;
use super::value::SemanticType;

/// Name of the synthetic row-number column found at position 0 of every cursor
pub const ROW_NUMBER_COLUMN: &str = "_rowNumber";

/// Suffix used for a column's missing-value indicator companion
pub const MV_INDICATOR_SUFFIX: &str = "_MVIndicator";

/// Column model describing one positional column of a cursor
///
/// # Example
///
/// ```rust
/// use data_load_sdk::models::{ColumnSpec, SemanticType};
///
/// let column = ColumnSpec::new("Weight", SemanticType::Double)
///     .not_null()
///     .with_missing_values();
/// assert!(!column.nullable);
/// assert_eq!(column.missing_value_column.as_deref(), Some("Weight_MVIndicator"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name
    pub name: String,
    /// Semantic type of values in the column
    #[serde(default)]
    pub semantic_type: SemanticType,
    /// Whether the column allows NULL values (default: true)
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Whether missing-value indicators are accepted for this column
    #[serde(default)]
    pub missing_values_enabled: bool,
    /// Property URI associating the column with a domain property
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_uri: Option<String>,
    /// Name of the companion column holding the missing-value indicator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_value_column: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ColumnSpec {
    /// Create a new nullable column with the given name and type
    pub fn new(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            semantic_type,
            nullable: true,
            missing_values_enabled: false,
            property_uri: None,
            missing_value_column: None,
        }
    }

    /// The synthetic row-number column
    pub fn row_number() -> Self {
        Self::new(ROW_NUMBER_COLUMN, SemanticType::Integer).not_null()
    }

    /// Mark the column as NOT NULL
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Enable missing-value indicators, with the conventional companion column
    pub fn with_missing_values(mut self) -> Self {
        self.missing_values_enabled = true;
        self.missing_value_column = Some(format!("{}{}", self.name, MV_INDICATOR_SUFFIX));
        self
    }

    /// Associate the column with a property URI
    pub fn with_property_uri(mut self, uri: impl Into<String>) -> Self {
        self.property_uri = Some(uri.into());
        self
    }

    /// Copy of this column under another name
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Case-insensitive identifier of the column
    pub fn identifier(&self) -> Identifier {
        Identifier::new(self.name.as_str())
    }

    /// Check whether this column is named `name` (case-insensitive)
    pub fn is_named(&self, name: &str) -> bool {
        Identifier::same_name(&self.name, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_defaults() {
        let column = ColumnSpec::new("Name", SemanticType::Text);
        assert!(column.nullable);
        assert!(!column.missing_values_enabled);
        assert!(column.property_uri.is_none());
    }

    #[test]
    fn test_column_deserialize_defaults() {
        let column: ColumnSpec = serde_json::from_str(r#"{"name": "Age"}"#).unwrap();
        assert_eq!(column.semantic_type, SemanticType::Text);
        assert!(column.nullable);
    }

    #[test]
    fn test_is_named_case_insensitive() {
        let column = ColumnSpec::new("CreatedBy", SemanticType::Integer);
        assert!(column.is_named("createdby"));
        assert_eq!(column.identifier(), Identifier::new("CREATEDBY"));
    }

    #[test]
    fn test_is_named_non_ascii() {
        let column = ColumnSpec::new("Ärzte", SemanticType::Integer);
        assert!(column.is_named("ÄRZTE"));
        assert!(column.identifier().matches("ärzte"));
        assert!(!column.is_named("Arzte"));
    }
}
