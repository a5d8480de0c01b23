//! Decorator surfacing a pre-built validation error lazily

use super::{LoadResult, MapAccess, RowCursor, SharedContext, current_row_number};
use crate::models::{ColumnSpec, Value};
use crate::validation::{GlobalError, RowError};

/// When a deferred error is surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceMode {
    /// On the first `advance`, whether or not the source has data
    Immediately,
    /// Only once the inner cursor yields at least one row
    IfRowsPresent,
}

/// A validation error found while configuring a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredError {
    /// Attributed to a row (the row number is filled in when surfaced)
    Row(RowError),
    /// Not attributed to any row
    Global(GlobalError),
}

impl From<GlobalError> for DeferredError {
    fn from(error: GlobalError) -> Self {
        DeferredError::Global(error)
    }
}

impl From<RowError> for DeferredError {
    fn from(error: RowError) -> Self {
        DeferredError::Row(error)
    }
}

/// Holds an error until the pipeline runs, then records it in the context
/// and stops the run. The error fires at most once.
pub struct DeferredErrorCursor<C> {
    inner: C,
    context: SharedContext,
    error: Option<DeferredError>,
    mode: SurfaceMode,
    stopped: bool,
}

impl<C: RowCursor> DeferredErrorCursor<C> {
    /// Wrap `inner`, surfacing `error` according to `mode`
    pub fn new(
        inner: C,
        context: SharedContext,
        error: impl Into<DeferredError>,
        mode: SurfaceMode,
    ) -> Self {
        Self {
            inner,
            context,
            error: Some(error.into()),
            mode,
            stopped: false,
        }
    }

    /// Whether the held error has not fired yet
    pub fn is_pending(&self) -> bool {
        self.error.is_some()
    }

    fn surface(&mut self, row_number: Option<i64>) {
        let Some(error) = self.error.take() else {
            return;
        };
        match error {
            DeferredError::Row(mut row_error) => {
                if let Some(row) = row_number {
                    row_error.row_number = row;
                }
                self.context.record_row_error(row_error);
            }
            DeferredError::Global(global) => {
                let global = match row_number {
                    Some(row) if global.row_number.is_none() => global.at_row(row),
                    _ => global,
                };
                self.context.record_global_error(global);
            }
        }
        self.stopped = true;
    }
}

impl<C: RowCursor> RowCursor for DeferredErrorCursor<C> {
    fn column_count(&self) -> usize {
        self.inner.column_count()
    }

    fn column_spec(&self, index: usize) -> &ColumnSpec {
        self.inner.column_spec(index)
    }

    fn advance(&mut self) -> LoadResult<bool> {
        if self.stopped {
            return Ok(false);
        }
        if self.error.is_some() && self.mode == SurfaceMode::Immediately {
            self.surface(None);
            return Ok(false);
        }
        if !self.inner.advance()? {
            return Ok(false);
        }
        if self.error.is_some() {
            let row = current_row_number(&self.inner);
            self.surface(Some(row));
            return Ok(false);
        }
        Ok(true)
    }

    fn value_at(&self, index: usize) -> &Value {
        self.inner.value_at(index)
    }

    fn close(&mut self) -> LoadResult<()> {
        self.inner.close()
    }

    fn as_map_access(&self) -> Option<&dyn MapAccess> {
        self.inner.as_map_access()
    }
}
