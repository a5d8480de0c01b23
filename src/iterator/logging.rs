//! Row logging decorator for diagnosing pipelines

use super::{LoadResult, MapAccess, Restartable, RowCursor, current_row_number};
use crate::models::{ColumnSpec, Value};

type DiagnosticSink = Box<dyn FnMut(&str)>;

/// Writes every row it passes through to a diagnostic sink.
///
/// Each row is serialised as JSON with a `{name, type, value}` entry per
/// column, plus a `map` dump when the inner cursor supports map access.
/// Values are never altered. Without an explicit sink, rows go to
/// `tracing::debug!`.
pub struct LoggingCursor<C> {
    inner: C,
    sink: Option<DiagnosticSink>,
}

impl<C: RowCursor> LoggingCursor<C> {
    /// Log rows through `tracing`
    pub fn new(inner: C) -> Self {
        Self { inner, sink: None }
    }

    /// Log rows to a custom sink
    pub fn with_sink(inner: C, sink: impl FnMut(&str) + 'static) -> Self {
        Self {
            inner,
            sink: Some(Box::new(sink)),
        }
    }

    /// JSON description of the current row
    pub fn describe_row(&self) -> serde_json::Value {
        let columns: Vec<serde_json::Value> = (1..=self.inner.column_count())
            .map(|i| {
                let spec = self.inner.column_spec(i);
                serde_json::json!({
                    "name": spec.name,
                    "type": spec.semantic_type.to_string(),
                    "value": self.inner.value_at(i).to_json(),
                })
            })
            .collect();

        let mut row = serde_json::json!({
            "row": current_row_number(&self.inner),
            "columns": columns,
        });

        if let Some(map_access) = self.inner.as_map_access() {
            let map: serde_json::Map<String, serde_json::Value> = map_access
                .current_map()
                .into_iter()
                .map(|(name, value)| (name, value.to_json()))
                .collect();
            row["map"] = serde_json::Value::Object(map);
        }
        row
    }
}

impl<C: RowCursor> RowCursor for LoggingCursor<C> {
    fn column_count(&self) -> usize {
        self.inner.column_count()
    }

    fn column_spec(&self, index: usize) -> &ColumnSpec {
        self.inner.column_spec(index)
    }

    fn advance(&mut self) -> LoadResult<bool> {
        if !self.inner.advance()? {
            return Ok(false);
        }
        let line = self.describe_row().to_string();
        match self.sink.as_mut() {
            Some(sink) => sink(&line),
            None => tracing::debug!(target: "data_load_sdk::rows", "{}", line),
        }
        Ok(true)
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
