//! Standard audit and identity columns

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::producer::ValueProducer;
use crate::models::{Identifier, Value};

/// Who is loading, and where
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditInfo {
    /// Container (folder/project) the rows belong to
    pub container_id: Value,
    /// User performing the load
    pub user_id: Value,
    /// Timestamp written to `Created` and `Modified`; the current time when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl AuditInfo {
    /// Create audit info stamped with the time the columns are added
    pub fn new(container_id: impl Into<Value>, user_id: impl Into<Value>) -> Self {
        Self {
            container_id: container_id.into(),
            user_id: user_id.into(),
            timestamp: None,
        }
    }

    /// Use a fixed timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Built-in columns injected by `add_built_in_columns`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltInColumn {
    Container,
    Owner,
    CreatedBy,
    ModifiedBy,
    Created,
    Modified,
    EntityId,
}

impl BuiltInColumn {
    /// Every built-in column, in the order they are added
    pub const ALL: [BuiltInColumn; 7] = [
        BuiltInColumn::Container,
        BuiltInColumn::Owner,
        BuiltInColumn::CreatedBy,
        BuiltInColumn::ModifiedBy,
        BuiltInColumn::Created,
        BuiltInColumn::Modified,
        BuiltInColumn::EntityId,
    ];

    /// Column name
    pub fn name(self) -> &'static str {
        match self {
            BuiltInColumn::Container => "Container",
            BuiltInColumn::Owner => "Owner",
            BuiltInColumn::CreatedBy => "CreatedBy",
            BuiltInColumn::ModifiedBy => "ModifiedBy",
            BuiltInColumn::Created => "Created",
            BuiltInColumn::Modified => "Modified",
            BuiltInColumn::EntityId => "EntityId",
        }
    }

    /// Look up a built-in column by name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|column| Identifier::same_name(column.name(), name))
    }

    /// Producer computing this column. `timestamp` is shared by every
    /// timestamp column added in the same call.
    pub fn producer(self, audit: &AuditInfo, timestamp: DateTime<Utc>) -> ValueProducer {
        match self {
            BuiltInColumn::Container => ValueProducer::Constant(audit.container_id.clone()),
            BuiltInColumn::Owner | BuiltInColumn::CreatedBy | BuiltInColumn::ModifiedBy => {
                ValueProducer::Constant(audit.user_id.clone())
            }
            BuiltInColumn::Created | BuiltInColumn::Modified => {
                ValueProducer::FixedTimestamp(timestamp)
            }
            BuiltInColumn::EntityId => ValueProducer::GenerateIdentifier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert_eq!(
            BuiltInColumn::from_name("createdby"),
            Some(BuiltInColumn::CreatedBy)
        );
        assert_eq!(BuiltInColumn::from_name("Name"), None);
    }

    #[test]
    fn test_producers() {
        let audit = AuditInfo::new("c-1", 7);
        let now = Utc::now();
        assert!(matches!(
            BuiltInColumn::Owner.producer(&audit, now),
            ValueProducer::Constant(Value::Int(7))
        ));
        assert!(matches!(
            BuiltInColumn::Modified.producer(&audit, now),
            ValueProducer::FixedTimestamp(ts) if ts == now
        ));
        assert!(matches!(
            BuiltInColumn::EntityId.producer(&audit, now),
            ValueProducer::GenerateIdentifier
        ));
    }
}
