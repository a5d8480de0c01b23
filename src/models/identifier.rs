//! Case-insensitive column and parameter identifiers

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A column or parameter name compared case-insensitively.
///
/// The original spelling is kept for display and error messages; equality,
/// ordering and hashing use the lower-cased form so `EntityId`, `entityid`
/// and `ENTITYID` all refer to the same column.
///
/// # Example
///
/// ```rust
/// use data_load_sdk::models::Identifier;
///
/// assert_eq!(Identifier::new("EntityId"), Identifier::new("ENTITYID"));
/// assert_eq!(Identifier::new("EntityId").as_str(), "EntityId");
/// ```
#[derive(Debug, Clone)]
pub struct Identifier {
    display: String,
    normalized: String,
}

impl Identifier {
    /// Create a new identifier from its display spelling
    pub fn new(name: impl Into<String>) -> Self {
        let display = name.into();
        let normalized = display.to_lowercase();
        Self {
            display,
            normalized,
        }
    }

    /// The name as originally spelled
    pub fn as_str(&self) -> &str {
        &self.display
    }

    /// The normalized (lower-case) key
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// Check whether a raw name refers to this identifier
    pub fn matches(&self, name: &str) -> bool {
        self.normalized == name.to_lowercase()
    }

    /// Compare two raw names the way identifiers compare
    pub fn same_name(a: &str, b: &str) -> bool {
        a == b || a.to_lowercase() == b.to_lowercase()
    }
}

impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for Identifier {}

impl Hash for Identifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state);
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.normalized.cmp(&other.normalized)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

impl From<&str> for Identifier {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Identifier {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.display)
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Identifier::new)
    }
}
