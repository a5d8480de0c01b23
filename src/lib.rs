//! Data Load SDK - Row-cursor pipeline for loading tabular data into relational stores
//!
//! Provides:
//! - Forward-only row cursors with composable wrappers
//! - Column transformation (conversion, missing values, remapping, built-in audit columns)
//! - Parameter binding and statement execution with per-row error capture
//! - A table load orchestrator that owns its connection and statements
//! - In-memory and DuckDB stores behind a small set of database contracts

pub mod database;
pub mod iterator;
pub mod models;
pub mod validation;

// Re-export commonly used types
pub use database::{
    ConnectionProvider, DatabaseConnection, DatabaseError, DatabaseResult, LoadConfig,
    MemoryDatabase, ParameterizedStatement,
};
#[cfg(feature = "duckdb-backend")]
pub use database::DuckDbProvider;
pub use iterator::{
    AuditInfo, ColumnTransformer, CursorBuilder, ListSource, LoadError, LoadMode, LoadResult,
    LoadSummary, ProcessingContext, RowCursor, SharedContext, StatementBindingStage,
    TableLoadOptions, TableLoader, TransformPlan,
};
pub use models::{ColumnSpec, Identifier, SemanticType, TableSchema, Value};
pub use validation::{BatchError, GlobalError, RowError};
