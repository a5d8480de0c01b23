//! Composable row cursors for loading tabular data
//!
//! A load is a chain of forward-only cursors pulled one row at a time:
//!
//! ```text
//! source ──▶ ColumnTransformer ──▶ StatementBindingStage ──▶ caller
//!                     ╰──────── TableLoader ────────╯
//! ```
//!
//! Every stage implements [`RowCursor`]. Column 0 of every cursor is the
//! 1-based source row number; data columns are `1..=column_count()`.
//!
//! Recoverable problems are recorded in the shared [`ProcessingContext`]
//! and `advance` simply returns `Ok(false)` when the run must stop. `Err` is
//! reserved for fatal failures.
//!
//! ## Example
//!
//! ```rust
//! use data_load_sdk::iterator::{ListSource, ProcessingContext, RowCursor, TransformPlan};
//! use data_load_sdk::models::{ColumnSpec, SemanticType, Value};
//!
//! let ctx = ProcessingContext::new().shared();
//! let source = ListSource::new(
//!     vec![ColumnSpec::new("Age", SemanticType::Text)],
//!     vec![vec![Value::text("42")]],
//! );
//!
//! let mut plan = TransformPlan::new(source, ctx.clone());
//! plan.add_convert_column(ColumnSpec::new("Age", SemanticType::Integer), 1, false)
//!     .unwrap();
//! let mut cursor = plan.into_cursor();
//!
//! assert!(cursor.advance().unwrap());
//! assert_eq!(cursor.value_at(1), &Value::Int(42));
//! assert!(!cursor.advance().unwrap());
//! ```

use std::collections::BTreeMap;

use crate::database::DatabaseError;
use crate::models::{ColumnSpec, Value};

pub mod context;
pub mod deferred;
pub mod logging;
pub mod map;
pub mod source;
pub mod statement;
pub mod table_load;
pub mod transform;
pub mod wrapper;

pub use context::{
    DEFAULT_MAX_ROW_ERRORS, NON_FAIL_FAST_MAX_ROW_ERRORS, ProcessingContext, SharedContext,
};
pub use deferred::{DeferredError, DeferredErrorCursor, SurfaceMode};
pub use logging::LoggingCursor;
pub use map::MapCursor;
pub use source::ListSource;
pub use statement::{OBJECT_ID_COLUMN, ParameterBinding, ROW_ID_COLUMN, StatementBindingStage};
pub use table_load::{LoadMode, LoadSummary, TableLoadBuilder, TableLoadOptions, TableLoader};
pub use transform::{
    AuditInfo, BuiltInColumn, ColumnTransformer, ConversionError, ProduceError, RowView,
    TransformPlan, ValueProducer,
};
pub use wrapper::{FilterCursor, WrapperCursor};

/// Fatal pipeline errors
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// A non-data database failure
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// The pipeline was configured inconsistently
    #[error("Invalid pipeline configuration: {0}")]
    Configuration(String),

    /// A value producer failed for a reason other than conversion
    #[error("Failed to produce column '{column}': {message}")]
    Producer { column: String, message: String },

    /// A capability was requested from a cursor that does not support it
    #[error("Operation not supported: {0}")]
    Unsupported(String),
}

/// Result type for pipeline operations
pub type LoadResult<T> = Result<T, LoadError>;

/// Forward-only cursor over typed tabular rows.
///
/// `value_at` is only meaningful after `advance` returned `Ok(true)`.
pub trait RowCursor {
    /// Number of data columns, excluding the row-number column
    fn column_count(&self) -> usize;

    /// Column metadata for `0..=column_count()`
    fn column_spec(&self, index: usize) -> &ColumnSpec;

    /// Move to the next row. Returns `Ok(false)` once, permanently, when the
    /// source is exhausted or the run must stop.
    fn advance(&mut self) -> LoadResult<bool>;

    /// Value of a column in the current row
    fn value_at(&self, index: usize) -> &Value;

    /// Release underlying resources. Safe to call more than once.
    fn close(&mut self) -> LoadResult<()>;

    /// Restart capability, if supported
    fn as_restartable(&mut self) -> Option<&mut dyn Restartable> {
        None
    }

    /// Name-keyed access to the current row, if supported
    fn as_map_access(&self) -> Option<&dyn MapAccess> {
        None
    }
}

/// Cursors that can rewind to the first row
pub trait Restartable {
    /// Rewind so the next `advance` returns the first row again
    fn restart(&mut self) -> LoadResult<()>;
}

/// Cursors exposing the current row as a name→value map
pub trait MapAccess {
    /// Current row keyed by column name (row-number column excluded)
    fn current_map(&self) -> BTreeMap<String, Value>;
}

impl<C: RowCursor + ?Sized> RowCursor for Box<C> {
    fn column_count(&self) -> usize {
        (**self).column_count()
    }

    fn column_spec(&self, index: usize) -> &ColumnSpec {
        (**self).column_spec(index)
    }

    fn advance(&mut self) -> LoadResult<bool> {
        (**self).advance()
    }

    fn value_at(&self, index: usize) -> &Value {
        (**self).value_at(index)
    }

    fn close(&mut self) -> LoadResult<()> {
        (**self).close()
    }

    fn as_restartable(&mut self) -> Option<&mut dyn Restartable> {
        (**self).as_restartable()
    }

    fn as_map_access(&self) -> Option<&dyn MapAccess> {
        (**self).as_map_access()
    }
}

/// Builder contract used by import flows to assemble a pipeline without
/// knowing its stage composition
pub trait CursorBuilder {
    /// Build a fresh cursor bound to `context`
    fn build(&self, context: &SharedContext) -> LoadResult<Box<dyn RowCursor>>;
}

impl<F> CursorBuilder for F
where
    F: Fn(&SharedContext) -> LoadResult<Box<dyn RowCursor>>,
{
    fn build(&self, context: &SharedContext) -> LoadResult<Box<dyn RowCursor>> {
        self(context)
    }
}

/// Current row as a name→value map, built from column metadata
pub fn row_map<C: RowCursor + ?Sized>(cursor: &C) -> BTreeMap<String, Value> {
    (1..=cursor.column_count())
        .map(|i| (cursor.column_spec(i).name.clone(), cursor.value_at(i).clone()))
        .collect()
}

/// Index of a data column by name (case-insensitive)
pub fn find_column<C: RowCursor + ?Sized>(cursor: &C, name: &str) -> Option<usize> {
    (1..=cursor.column_count()).find(|&i| cursor.column_spec(i).is_named(name))
}

/// Row number of the current row
pub fn current_row_number<C: RowCursor + ?Sized>(cursor: &C) -> i64 {
    cursor.value_at(0).as_int().unwrap_or(0)
}
