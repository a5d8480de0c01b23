//! Database collaborator contracts for load pipelines
//!
//! The pipeline never generates SQL or manages schema itself. It talks to the
//! store through a few narrow contracts:
//! - [`ConnectionProvider`]: acquire/release a connection
//! - [`DatabaseConnection`]: prepare a parameterized statement for a table
//! - [`ParameterizedStatement`]: bind, execute and report generated keys
//! - [`BatchStatement`]: optional multi-row batching capability
//!
//! Two stores implement them:
//! - [`MemoryDatabase`]: in-process tables with constraint checking
//! - `DuckDbProvider`: DuckDB embedded database (feature `duckdb-backend`)

use serde::{Deserialize, Serialize};

use crate::models::{ColumnSpec, TableSchema, Value};

pub mod config;
#[cfg(feature = "duckdb-backend")]
pub mod duckdb;
pub mod memory;

pub use config::{DatabaseBackendType, LoadConfig};
#[cfg(feature = "duckdb-backend")]
pub use self::duckdb::DuckDbProvider;
pub use memory::MemoryDatabase;

/// Error type for database operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Statement preparation or execution failed for a non-data reason
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Values were malformed or out of range for the target column
    #[error("Data exception: {0}")]
    DataException(String),

    /// A not-null, unique or check constraint rejected the row
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Transaction failed
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
}

impl DatabaseError {
    /// Whether the failure is caused by the row's data rather than the store.
    ///
    /// Data-class failures are recovered as row errors; everything else
    /// aborts the run.
    pub fn is_data_class(&self) -> bool {
        matches!(
            self,
            DatabaseError::DataException(_) | DatabaseError::ConstraintViolation(_)
        )
    }
}

/// Result type for database operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// How a statement writes rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementMode {
    /// Plain insert
    #[default]
    Insert,
    /// Insert, or update the existing row matching the table's key columns
    Merge,
}

/// What a statement parameter carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    /// A column value
    Value,
    /// The missing-value indicator paired with a column
    MissingIndicator,
}

/// One bind parameter of a prepared statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementParameter {
    /// Column name the parameter writes
    pub name: String,
    /// Property URI of the column, if any
    pub property_uri: Option<String>,
    /// Value or indicator parameter
    pub kind: ParameterKind,
}

impl StatementParameter {
    /// A value parameter for a column
    pub fn value(column: &ColumnSpec) -> Self {
        Self {
            name: column.name.clone(),
            property_uri: column.property_uri.clone(),
            kind: ParameterKind::Value,
        }
    }

    /// An indicator parameter named after the companion column
    pub fn missing_indicator(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            property_uri: None,
            kind: ParameterKind::MissingIndicator,
        }
    }

    /// Parameters for a set of columns, with indicator parameters for
    /// columns that accept missing values
    pub fn for_columns(columns: &[ColumnSpec]) -> Vec<Self> {
        let mut parameters = Vec::with_capacity(columns.len());
        for column in columns {
            parameters.push(Self::value(column));
            if column.missing_values_enabled
                && let Some(companion) = &column.missing_value_column
            {
                parameters.push(Self::missing_indicator(companion.clone()));
            }
        }
        parameters
    }
}

/// Request handed to the dialect service to build a statement
#[derive(Debug, Clone)]
pub struct StatementRequest {
    /// Target table
    pub table: TableSchema,
    /// Columns to write, in parameter order
    pub columns: Vec<ColumnSpec>,
    /// Insert or merge
    pub mode: StatementMode,
    /// Whether generated keys must be returned after each execution
    pub reselect_keys: bool,
}

/// Outcome of executing a statement for one row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteOutcome {
    /// Rows inserted or updated
    pub rows_affected: usize,
    /// Generated identity value, when keys are reselected
    pub row_id: Option<Value>,
    /// Object identifier, when keys are reselected
    pub object_id: Option<Value>,
}

/// A ready-to-bind parameterized statement
pub trait ParameterizedStatement {
    /// Bind parameters in positional order
    fn parameters(&self) -> &[StatementParameter];

    /// Reset every parameter to NULL
    fn clear_parameters(&mut self);

    /// Set one parameter
    fn set_parameter(&mut self, index: usize, value: Value) -> DatabaseResult<()>;

    /// Execute with the current parameters
    fn execute(&mut self) -> DatabaseResult<ExecuteOutcome>;

    /// Multi-row batching, if supported
    fn as_batch(&mut self) -> Option<&mut dyn BatchStatement> {
        None
    }

    /// Release the statement. Safe to call more than once.
    fn close(&mut self) -> DatabaseResult<()>;
}

/// Batching capability of a statement
pub trait BatchStatement {
    /// Queue the current parameters as one row of the batch
    fn add_batch(&mut self) -> DatabaseResult<()>;

    /// Execute all queued rows, returning the number of rows affected
    fn execute_batch(&mut self) -> DatabaseResult<usize>;

    /// Drop queued rows without executing them
    fn clear_batch(&mut self);
}

/// A connection able to prepare statements
pub trait DatabaseConnection {
    /// Prepare a statement for the request
    fn prepare(
        &mut self,
        request: &StatementRequest,
    ) -> DatabaseResult<Box<dyn ParameterizedStatement>>;

    /// Whether a transaction is open on this connection
    fn is_transaction_active(&self) -> bool;

    /// Backend type name ("memory" or "duckdb")
    fn backend_type(&self) -> &'static str;
}

/// Source of connections
pub trait ConnectionProvider {
    /// Acquire a connection
    fn acquire(&self) -> DatabaseResult<Box<dyn DatabaseConnection>>;

    /// Return a connection acquired from this provider
    fn release(&self, connection: Box<dyn DatabaseConnection>) -> DatabaseResult<()>;
}
