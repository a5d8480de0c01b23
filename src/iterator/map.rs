//! Map-shaped cursor over a fixed list of rows

use std::collections::BTreeMap;

use super::{
    CursorBuilder, LoadResult, MapAccess, Restartable, RowCursor, SharedContext, row_map,
};
use crate::models::{ColumnSpec, SemanticType, Value};

/// Exposes rows as name→value maps.
///
/// Backed by an in-memory row list and a current position, so it supports
/// restart. Typical uses are diagnostics, sampling a pipeline's output, and
/// programmatic inserts of map-shaped records.
#[derive(Debug, Clone)]
pub struct MapCursor {
    columns: Vec<ColumnSpec>,
    rows: Vec<Vec<Value>>,
    position: Option<usize>,
    exhausted: bool,
}

impl MapCursor {
    /// Create a cursor with explicit columns; map entries are matched to
    /// columns by name (case-insensitive), absent entries are `Null`
    pub fn new(columns: Vec<ColumnSpec>, maps: Vec<BTreeMap<String, Value>>) -> Self {
        let rows = maps
            .into_iter()
            .enumerate()
            .map(|(i, map)| {
                let mut row = Vec::with_capacity(columns.len() + 1);
                row.push(Value::Int(i as i64 + 1));
                for column in &columns {
                    let value = map
                        .get(&column.name)
                        .or_else(|| {
                            map.iter()
                                .find(|(name, _)| column.is_named(name))
                                .map(|(_, value)| value)
                        })
                        .cloned()
                        .unwrap_or_default();
                    row.push(value);
                }
                row
            })
            .collect();
        Self::from_parts(columns, rows)
    }

    /// Create a cursor whose columns are the keys found in `maps`, typed as
    /// text, in name order
    pub fn from_maps(maps: Vec<BTreeMap<String, Value>>) -> Self {
        let mut names: Vec<&String> = maps.iter().flat_map(|m| m.keys()).collect();
        names.sort();
        names.dedup();
        let columns = names
            .into_iter()
            .map(|name| ColumnSpec::new(name.clone(), SemanticType::Text))
            .collect();
        Self::new(columns, maps)
    }

    /// Drain `inner` into memory, keeping its column metadata and row numbers
    pub fn materialize<C: RowCursor + ?Sized>(inner: &mut C) -> LoadResult<Self> {
        Self::collect(inner, usize::MAX)
    }

    /// Keep at most `limit` rows of `inner`, e.g. to preview a pipeline
    pub fn sample<C: RowCursor + ?Sized>(inner: &mut C, limit: usize) -> LoadResult<Self> {
        Self::collect(inner, limit)
    }

    fn collect<C: RowCursor + ?Sized>(inner: &mut C, limit: usize) -> LoadResult<Self> {
        let columns: Vec<ColumnSpec> = (1..=inner.column_count())
            .map(|i| inner.column_spec(i).clone())
            .collect();
        let mut rows = Vec::new();
        while rows.len() < limit && inner.advance()? {
            rows.push(
                (0..=columns.len())
                    .map(|i| inner.value_at(i).clone())
                    .collect(),
            );
        }
        Ok(Self::from_parts(columns, rows))
    }

    fn from_parts(columns: Vec<ColumnSpec>, rows: Vec<Vec<Value>>) -> Self {
        let mut all_columns = Vec::with_capacity(columns.len() + 1);
        all_columns.push(ColumnSpec::row_number());
        all_columns.extend(columns);
        Self {
            columns: all_columns,
            rows,
            position: None,
            exhausted: false,
        }
    }

    /// Number of rows held
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if no rows are held
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All rows as maps, independent of the cursor position
    pub fn to_maps(&self) -> Vec<BTreeMap<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row.iter())
                    .skip(1)
                    .map(|(column, value)| (column.name.clone(), value.clone()))
                    .collect()
            })
            .collect()
    }
}

impl RowCursor for MapCursor {
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
        if next >= self.rows.len() {
            self.exhausted = true;
            return Ok(false);
        }
        self.position = Some(next);
        Ok(true)
    }

    fn value_at(&self, index: usize) -> &Value {
        let position = self.position.unwrap_or_default();
        &self.rows[position][index]
    }

    fn close(&mut self) -> LoadResult<()> {
        self.exhausted = true;
        Ok(())
    }

    fn as_restartable(&mut self) -> Option<&mut dyn Restartable> {
        Some(self)
    }

    fn as_map_access(&self) -> Option<&dyn MapAccess> {
        Some(self)
    }
}

impl Restartable for MapCursor {
    fn restart(&mut self) -> LoadResult<()> {
        self.position = None;
        self.exhausted = false;
        Ok(())
    }
}

impl MapAccess for MapCursor {
    fn current_map(&self) -> BTreeMap<String, Value> {
        row_map(self)
    }
}

impl CursorBuilder for MapCursor {
    fn build(&self, _context: &SharedContext) -> LoadResult<Box<dyn RowCursor>> {
        let mut cursor = self.clone();
        cursor.restart()?;
        Ok(Box::new(cursor))
    }
}
