//! In-memory positional row source

use super::{CursorBuilder, LoadError, LoadResult, Restartable, RowCursor, SharedContext};
use crate::models::{ColumnSpec, Value};

/// A cursor over rows held in memory.
///
/// Used for programmatic inserts and generated rows. Each row must have one
/// value per column; the row-number column is supplied by the source.
#[derive(Debug, Clone)]
pub struct ListSource {
    columns: Vec<ColumnSpec>,
    rows: Vec<Vec<Value>>,
    position: Option<usize>,
    current: Vec<Value>,
    exhausted: bool,
}

impl ListSource {
    /// Create a source from column metadata (without the row-number column)
    /// and data rows
    pub fn new(columns: Vec<ColumnSpec>, rows: Vec<Vec<Value>>) -> Self {
        let mut all_columns = Vec::with_capacity(columns.len() + 1);
        all_columns.push(ColumnSpec::row_number());
        all_columns.extend(columns);
        Self {
            columns: all_columns,
            rows,
            position: None,
            current: Vec::new(),
            exhausted: false,
        }
    }

    /// Create a source from text cells, as read from an uploaded file
    pub fn from_text<R, S>(columns: Vec<ColumnSpec>, rows: R) -> Self
    where
        R: IntoIterator<Item = Vec<S>>,
        S: Into<String>,
    {
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(|cell| Value::Text(cell.into())).collect())
            .collect();
        Self::new(columns, rows)
    }

    /// Number of rows held
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if no rows are held
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl RowCursor for ListSource {
    fn column_count(&self) -> usize {
        self.columns.len() - 1
    }

    fn column_spec(&self, index: usize) -> &ColumnSpec {
        &self.columns[index]
    }

    fn advance(&mut self) -> LoadResult<bool> {
        if self.exhausted {
            return Ok(false);
        }
        let next = self.position.map_or(0, |p| p + 1);
        let Some(row) = self.rows.get(next) else {
            self.exhausted = true;
            return Ok(false);
        };
        if row.len() != self.column_count() {
            return Err(LoadError::Configuration(format!(
                "Row {} has {} values, expected {}",
                next + 1,
                row.len(),
                self.column_count()
            )));
        }
        self.current.clear();
        self.current.push(Value::Int(next as i64 + 1));
        self.current.extend(row.iter().cloned());
        self.position = Some(next);
        Ok(true)
    }

    fn value_at(&self, index: usize) -> &Value {
        &self.current[index]
    }

    fn close(&mut self) -> LoadResult<()> {
        self.exhausted = true;
        Ok(())
    }

    fn as_restartable(&mut self) -> Option<&mut dyn Restartable> {
        Some(self)
    }
}

impl Restartable for ListSource {
    fn restart(&mut self) -> LoadResult<()> {
        self.position = None;
        self.current.clear();
        self.exhausted = false;
        Ok(())
    }
}

impl CursorBuilder for ListSource {
    fn build(&self, _context: &SharedContext) -> LoadResult<Box<dyn RowCursor>> {
        let mut source = self.clone();
        source.restart()?;
        Ok(Box::new(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SemanticType;

    fn letters() -> ListSource {
        ListSource::from_text(
            vec![ColumnSpec::new("Letter", SemanticType::Text)],
            vec![vec!["a"], vec!["b"]],
        )
    }

    #[test]
    fn test_row_numbers_are_one_based() {
        let mut source = letters();
        assert!(source.advance().unwrap());
        assert_eq!(source.value_at(0), &Value::Int(1));
        assert_eq!(source.value_at(1), &Value::text("a"));
        assert!(source.advance().unwrap());
        assert_eq!(source.value_at(0), &Value::Int(2));
        assert!(!source.advance().unwrap());
        assert!(!source.advance().unwrap());
    }

    #[test]
    fn test_restart() {
        let mut source = letters();
        while source.advance().unwrap() {}
        source.as_restartable().unwrap().restart().unwrap();
        assert!(source.advance().unwrap());
        assert_eq!(source.value_at(1), &Value::text("a"));
    }

    #[test]
    fn test_ragged_row_is_fatal() {
        let mut source = ListSource::new(
            vec![ColumnSpec::new("A", SemanticType::Text)],
            vec![vec![Value::Null, Value::Null]],
        );
        assert!(matches!(
            source.advance(),
            Err(LoadError::Configuration(_))
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut source = letters();
        source.close().unwrap();
        source.close().unwrap();
        assert!(!source.advance().unwrap());
    }
}
