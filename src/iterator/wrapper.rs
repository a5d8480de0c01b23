//! Pass-through and filtering decorators

use super::{LoadResult, MapAccess, Restartable, RowCursor};
use crate::models::{ColumnSpec, Value};

/// Forwards every call, including capabilities, to the inner cursor.
///
/// Useful as a named seam when composing pipelines and as the base that other
/// decorators specialise.
#[derive(Debug)]
pub struct WrapperCursor<C> {
    inner: C,
}

impl<C: RowCursor> WrapperCursor<C> {
    /// Wrap a cursor
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    /// Borrow the wrapped cursor
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Unwrap the cursor
    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: RowCursor> RowCursor for WrapperCursor<C> {
    fn column_count(&self) -> usize {
        self.inner.column_count()
    }

    fn column_spec(&self, index: usize) -> &ColumnSpec {
        self.inner.column_spec(index)
    }

    fn advance(&mut self) -> LoadResult<bool> {
        self.inner.advance()
    }

    fn value_at(&self, index: usize) -> &Value {
        self.inner.value_at(index)
    }

    fn close(&mut self) -> LoadResult<()> {
        self.inner.close()
    }

    fn as_restartable(&mut self) -> Option<&mut dyn Restartable> {
        self.inner.as_restartable()
    }

    fn as_map_access(&self) -> Option<&dyn MapAccess> {
        self.inner.as_map_access()
    }
}

/// Skips rows for which a predicate returns false.
///
/// Row numbers of the kept rows are those of the inner cursor, so errors
/// still point at the original source row.
pub struct FilterCursor<C, F> {
    inner: C,
    predicate: F,
    skipped: usize,
}

impl<C, F> FilterCursor<C, F>
where
    C: RowCursor,
    F: FnMut(&C) -> bool,
{
    /// Wrap a cursor with a row predicate
    pub fn new(inner: C, predicate: F) -> Self {
        Self {
            inner,
            predicate,
            skipped: 0,
        }
    }

    /// Number of rows filtered out so far
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<C, F> RowCursor for FilterCursor<C, F>
where
    C: RowCursor,
    F: FnMut(&C) -> bool,
{
    fn column_count(&self) -> usize {
        self.inner.column_count()
    }

    fn column_spec(&self, index: usize) -> &ColumnSpec {
        self.inner.column_spec(index)
    }

    fn advance(&mut self) -> LoadResult<bool> {
        while self.inner.advance()? {
            if (self.predicate)(&self.inner) {
                return Ok(true);
            }
            self.skipped += 1;
        }
        Ok(false)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterator::{ListSource, current_row_number};
    use crate::models::SemanticType;

    fn numbers() -> ListSource {
        ListSource::new(
            vec![ColumnSpec::new("N", SemanticType::Integer)],
            (1..=5).map(|n| vec![Value::Int(n)]).collect(),
        )
    }

    #[test]
    fn test_wrapper_forwards_capabilities() {
        let mut wrapper = WrapperCursor::new(numbers());
        assert_eq!(wrapper.column_count(), 1);
        assert!(wrapper.advance().unwrap());
        assert_eq!(wrapper.value_at(1), &Value::Int(1));
        assert!(wrapper.as_restartable().is_some());
        assert!(wrapper.as_map_access().is_none());
    }

    #[test]
    fn test_filter_keeps_order_and_row_numbers() {
        let mut filter =
            FilterCursor::new(numbers(), |c: &ListSource| c.value_at(1).as_int().unwrap_or(0) % 2 == 0);

        let mut seen = Vec::new();
        while filter.advance().unwrap() {
            seen.push(current_row_number(&filter));
        }
        assert_eq!(seen, vec![2, 4]);
        assert_eq!(filter.skipped(), 3);
    }
}
