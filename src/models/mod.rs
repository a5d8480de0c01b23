//! Data model shared by every pipeline stage

pub mod column;
pub mod identifier;
pub mod table;
pub mod value;

pub use column::{ColumnSpec, MV_INDICATOR_SUFFIX, ROW_NUMBER_COLUMN};
pub use identifier::Identifier;
pub use table::TableSchema;
pub use value::{MissingValue, SemanticType, Value};
