//! Table load orchestration
//!
//! [`TableLoader`] drives a whole load into one table: it transforms source
//! rows, prepares the statement(s) on a lazily acquired connection and binds
//! every row, releasing the connection exactly once when it is closed or
//! dropped.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use std::time::{Duration, Instant};

use super::statement::StatementBindingStage;
use super::transform::{AuditInfo, ColumnTransformer, TransformPlan};
use super::{
    CursorBuilder, LoadError, LoadResult, MapAccess, RowCursor, SharedContext,
};
use crate::database::{
    ConnectionProvider, DatabaseConnection, LoadConfig, ParameterizedStatement, StatementMode,
    StatementRequest,
};
use crate::models::{ColumnSpec, SemanticType, TableSchema, Value};

static NULL_VALUE: Value = Value::Null;

/// How rows are written to the target table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Insert rows one by one, re-reading generated keys
    Insert,
    /// Bulk insert without re-reading keys
    #[default]
    Import,
    /// Insert or update by key, re-reading generated keys
    Merge,
    /// Bulk insert or update by key
    Upsert,
}

impl LoadMode {
    /// Whether generated keys are re-read after each row
    pub fn reselects_keys(self) -> bool {
        matches!(self, LoadMode::Insert | LoadMode::Merge)
    }

    /// Whether existing rows are updated by key
    pub fn merges(self) -> bool {
        matches!(self, LoadMode::Merge | LoadMode::Upsert)
    }

    /// Statement mode requested from the dialect service
    pub fn statement_mode(self) -> StatementMode {
        if self.merges() {
            StatementMode::Merge
        } else {
            StatementMode::Insert
        }
    }
}

impl FromStr for LoadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "insert" => Ok(LoadMode::Insert),
            "import" => Ok(LoadMode::Import),
            "merge" => Ok(LoadMode::Merge),
            "upsert" => Ok(LoadMode::Upsert),
            _ => Err(format!(
                "Unknown load mode: {}. Use 'insert', 'import', 'merge' or 'upsert'",
                s
            )),
        }
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadMode::Insert => write!(f, "insert"),
            LoadMode::Import => write!(f, "import"),
            LoadMode::Merge => write!(f, "merge"),
            LoadMode::Upsert => write!(f, "upsert"),
        }
    }
}

/// Options of one table load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLoadOptions {
    /// Insert/import/merge/upsert
    pub mode: LoadMode,
    /// Re-read generated keys even when the mode does not require it
    pub reselect_keys: bool,
    /// Rows per batch when keys are not re-read
    pub batch_size: usize,
    /// Alternate between two statements when keys are not re-read
    pub dual_statements: bool,
    /// Take built-in columns from same-named source columns when present
    pub allow_built_in_pass_through: bool,
}

impl Default for TableLoadOptions {
    fn default() -> Self {
        Self {
            mode: LoadMode::default(),
            reselect_keys: false,
            batch_size: crate::database::config::DEFAULT_BATCH_SIZE,
            dual_statements: true,
            allow_built_in_pass_through: false,
        }
    }
}

impl TableLoadOptions {
    /// Options from the `[load]` section of a configuration
    pub fn from_config(config: &LoadConfig) -> Self {
        Self {
            mode: config.load.mode,
            batch_size: config.load.batch_size,
            dual_statements: config.load.dual_statements,
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: LoadMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_reselect_keys(mut self, reselect_keys: bool) -> Self {
        self.reselect_keys = reselect_keys;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_dual_statements(mut self, dual_statements: bool) -> Self {
        self.dual_statements = dual_statements;
        self
    }

    pub fn with_built_in_pass_through(mut self, allow: bool) -> Self {
        self.allow_built_in_pass_through = allow;
        self
    }
}

/// Counters of a finished (or closed) load
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSummary {
    pub table: String,
    pub mode: LoadMode,
    /// Rows that reached the statement stage
    pub rows_read: usize,
    pub rows_persisted: usize,
    /// Rows not written because of errors
    pub rows_skipped: usize,
    /// Statement executions; a batch counts once
    pub executions: usize,
    #[serde(serialize_with = "serialize_millis")]
    pub duration: Duration,
}

fn serialize_millis<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u128(duration.as_millis())
}

impl fmt::Display for LoadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} into '{}': {} read, {} persisted, {} skipped, {} executions in {}ms",
            self.mode,
            self.table,
            self.rows_read,
            self.rows_persisted,
            self.rows_skipped,
            self.executions,
            self.duration.as_millis()
        )
    }
}

/// Loads the rows of a source cursor into one table.
///
/// The loader is itself a cursor: each `advance` writes one row and yields
/// it, extended with `_rowid`/`_objectid` when generated keys are re-read.
///
/// Keys are re-read when requested, when the mode requires it, or when the
/// table has triggers. Re-reading forces one row per execution and a single
/// statement; otherwise rows are batched and, when enabled, executions
/// alternate between two prepared statements.
pub struct TableLoader<C: RowCursor> {
    plan: Option<TransformPlan<C>>,
    stage: Option<StatementBindingStage<ColumnTransformer<C>>>,
    columns: Vec<ColumnSpec>,
    table: TableSchema,
    context: SharedContext,
    options: TableLoadOptions,
    provider: Rc<dyn ConnectionProvider>,
    connection: Option<Box<dyn DatabaseConnection>>,
    started: Option<Instant>,
    summary: Option<LoadSummary>,
    closed: bool,
}

impl<C: RowCursor> TableLoader<C> {
    /// Load `source` into `table`, mapping source columns onto table columns
    /// by name (case-insensitive) and adding the table's built-in columns.
    ///
    /// Source columns without a target column are ignored. A target column
    /// accepting missing values writes its `<name>_MVIndicator` companion from
    /// the converted value, so a source column carrying that companion is
    /// ignored when the owning column is mapped too.
    pub fn new(
        source: C,
        table: TableSchema,
        provider: Rc<dyn ConnectionProvider>,
        context: SharedContext,
        audit: &AuditInfo,
        options: TableLoadOptions,
    ) -> LoadResult<Self> {
        let mut plan = TransformPlan::new(source, context.clone());
        let source_names: Vec<String> = (1..=plan.input().column_count())
            .map(|index| plan.input().column_spec(index).name.clone())
            .collect();
        for (offset, name) in source_names.iter().enumerate() {
            let index = offset + 1;
            if let Some(owner) = table.missing_value_owner(name)
                && source_names.iter().any(|n| owner.is_named(n))
            {
                tracing::debug!(
                    "Source column '{}' is the missing-value companion of '{}'",
                    name,
                    owner.name
                );
                continue;
            }
            match table.column(name) {
                Some(target) => {
                    let target = target.clone();
                    let with_missing_values = target.missing_values_enabled;
                    plan.add_convert_column(target, index, with_missing_values)?;
                }
                None => tracing::debug!(
                    "Source column '{}' has no match in table '{}'",
                    name,
                    table.name
                ),
            }
        }
        plan.add_built_in_columns(audit, &table, options.allow_built_in_pass_through);
        Self::from_plan(plan, table, provider, context, options)
    }

    /// Load the output of a caller-built plan into `table`
    pub fn from_plan(
        plan: TransformPlan<C>,
        table: TableSchema,
        provider: Rc<dyn ConnectionProvider>,
        context: SharedContext,
        options: TableLoadOptions,
    ) -> LoadResult<Self> {
        if options.mode.merges() && table.key_columns.is_empty() {
            return Err(LoadError::Configuration(format!(
                "Table '{}' has no key columns to {} on",
                table.name, options.mode
            )));
        }
        if options.batch_size == 0 {
            return Err(LoadError::Configuration(
                "batch_size must be at least 1".to_string(),
            ));
        }

        let mut columns: Vec<ColumnSpec> = (0..=plan.column_count())
            .filter_map(|i| plan.column_spec(i).cloned())
            .collect();
        let reselect = reselects_keys(&options, &table);
        if reselect && table.row_id_column.is_some() {
            columns.push(ColumnSpec::new(super::ROW_ID_COLUMN, SemanticType::BigInt));
        }
        if reselect && table.object_id_column.is_some() {
            columns.push(ColumnSpec::new(super::OBJECT_ID_COLUMN, SemanticType::Text));
        }

        Ok(Self {
            plan: Some(plan),
            stage: None,
            columns,
            table,
            context,
            options,
            provider,
            connection: None,
            started: None,
            summary: None,
            closed: false,
        })
    }

    /// Whether generated keys are re-read after each row
    pub fn reselects_keys(&self) -> bool {
        reselects_keys(&self.options, &self.table)
    }

    /// Rows per execution actually used
    pub fn effective_batch_size(&self) -> usize {
        if self.reselects_keys() {
            1
        } else {
            self.options.batch_size
        }
    }

    /// The run context
    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    /// Current counters; final once the loader is closed
    pub fn summary(&self) -> LoadSummary {
        if let Some(summary) = &self.summary {
            return summary.clone();
        }
        let (rows_read, rows_persisted, rows_skipped, executions) = match &self.stage {
            Some(stage) => (
                stage.rows_received(),
                stage.rows_persisted(),
                stage.rows_skipped(),
                stage.executions(),
            ),
            None => (0, 0, 0, 0),
        };
        LoadSummary {
            table: self.table.name.clone(),
            mode: self.options.mode,
            rows_read,
            rows_persisted,
            rows_skipped,
            executions,
            duration: self.started.map(|s| s.elapsed()).unwrap_or_default(),
        }
    }

    /// Drain the source and close the loader
    pub fn run(&mut self) -> LoadResult<LoadSummary> {
        let drained = self.drain();
        let closed = self.close();
        drained?;
        closed?;
        Ok(self.summary())
    }

    fn drain(&mut self) -> LoadResult<()> {
        while self.advance()? {}
        Ok(())
    }

    /// Columns written by the statement: table columns matching an output
    /// column by property URI or name, in output order. A companion column
    /// is left out when its owner is written, which binds it as an indicator.
    fn target_columns(&self) -> Vec<ColumnSpec> {
        let mut targets: Vec<ColumnSpec> = Vec::new();
        for output in self.columns.iter().skip(1) {
            let by_property = output.property_uri.as_deref().and_then(|uri| {
                self.table
                    .columns
                    .iter()
                    .find(|c| c.property_uri.as_deref() == Some(uri))
            });
            let Some(target) = by_property.or_else(|| self.table.column(&output.name)) else {
                continue;
            };
            if !targets.iter().any(|t| t.is_named(&target.name)) {
                targets.push(target.clone());
            }
        }
        let owners: Vec<String> = targets
            .iter()
            .filter(|t| t.missing_values_enabled)
            .filter_map(|t| t.missing_value_column.clone())
            .collect();
        targets.retain(|t| !owners.iter().any(|companion| t.is_named(companion)));
        targets
    }

    fn open(&mut self) -> LoadResult<bool> {
        let Some(plan) = self.plan.take() else {
            return Ok(false);
        };
        self.started = Some(Instant::now());

        let reselect = reselects_keys(&self.options, &self.table);
        let request = StatementRequest {
            table: self.table.clone(),
            columns: self.target_columns(),
            mode: self.options.mode.statement_mode(),
            reselect_keys: reselect,
        };

        let dual = !reselect && self.options.dual_statements;
        let mut cursor = plan.into_cursor();
        let (statement, second) = match self.prepare_statements(&request, dual) {
            Ok(statements) => statements,
            Err(error) => {
                if let Err(close_error) = cursor.close() {
                    tracing::warn!("Failed to close source of '{}': {}", self.table.name, close_error);
                }
                return Err(error);
            }
        };

        let mut stage = StatementBindingStage::new(cursor, self.context.clone(), statement)
            .with_batch_size(self.effective_batch_size());
        if let Some(second) = second {
            stage = stage.with_second_statement(second)?;
        }
        if reselect && self.table.row_id_column.is_some() {
            stage = stage.capture_row_id();
        }
        if reselect && self.table.object_id_column.is_some() {
            stage = stage.capture_object_id();
        }

        tracing::debug!(
            "Loading '{}' in {} mode (reselect keys: {}, batch size: {}, dual statements: {})",
            self.table.name,
            self.options.mode,
            reselect,
            self.effective_batch_size(),
            dual
        );
        self.stage = Some(stage);
        Ok(true)
    }

    /// Acquire the connection and prepare one or two statements on it
    fn prepare_statements(
        &mut self,
        request: &StatementRequest,
        dual: bool,
    ) -> LoadResult<(Box<dyn ParameterizedStatement>, Option<Box<dyn ParameterizedStatement>>)> {
        let connection = self.connection.insert(self.provider.acquire()?);
        tracing::debug!(
            "Acquired {} connection for '{}' (transaction active: {})",
            connection.backend_type(),
            request.table.name,
            connection.is_transaction_active()
        );
        let statement = connection.prepare(request)?;
        let second = if dual {
            Some(connection.prepare(request)?)
        } else {
            None
        };
        Ok((statement, second))
    }

    fn release(&mut self) -> LoadResult<()> {
        match self.connection.take() {
            Some(connection) => {
                tracing::debug!("Releasing connection for '{}'", self.table.name);
                self.provider.release(connection)?;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

fn reselects_keys(options: &TableLoadOptions, table: &TableSchema) -> bool {
    options.reselect_keys || options.mode.reselects_keys() || table.has_triggers
}

impl<C: RowCursor> RowCursor for TableLoader<C> {
    fn column_count(&self) -> usize {
        self.columns.len() - 1
    }

    fn column_spec(&self, index: usize) -> &ColumnSpec {
        &self.columns[index]
    }

    fn advance(&mut self) -> LoadResult<bool> {
        if self.closed {
            return Ok(false);
        }
        if self.stage.is_none() && !self.open()? {
            return Ok(false);
        }
        let Some(stage) = self.stage.as_mut() else {
            return Ok(false);
        };
        stage.advance()
    }

    fn value_at(&self, index: usize) -> &Value {
        match &self.stage {
            Some(stage) => stage.value_at(index),
            None => &NULL_VALUE,
        }
    }

    fn close(&mut self) -> LoadResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let closed = match (self.stage.as_mut(), self.plan.take()) {
            (Some(stage), _) => stage.close(),
            (None, Some(plan)) => plan.into_cursor().close(),
            (None, None) => Ok(()),
        };
        let released = self.release();

        let summary = self.summary();
        tracing::info!("Load finished: {}", summary);
        self.summary = Some(summary);

        closed?;
        released
    }

    fn as_map_access(&self) -> Option<&dyn MapAccess> {
        self.stage.as_ref().and_then(|stage| stage.as_map_access())
    }
}

impl<C: RowCursor> Drop for TableLoader<C> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to close load into '{}': {}", self.table.name, e);
        }
    }
}

/// Builds a [`TableLoader`] over a freshly built source for each run
pub struct TableLoadBuilder {
    source: Box<dyn CursorBuilder>,
    table: TableSchema,
    provider: Rc<dyn ConnectionProvider>,
    audit: AuditInfo,
    options: TableLoadOptions,
}

impl TableLoadBuilder {
    pub fn new(
        source: impl CursorBuilder + 'static,
        table: TableSchema,
        provider: Rc<dyn ConnectionProvider>,
        audit: AuditInfo,
    ) -> Self {
        Self {
            source: Box::new(source),
            table,
            provider,
            audit,
            options: TableLoadOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TableLoadOptions) -> Self {
        self.options = options;
        self
    }
}

impl CursorBuilder for TableLoadBuilder {
    fn build(&self, context: &SharedContext) -> LoadResult<Box<dyn RowCursor>> {
        let source = self.source.build(context)?;
        let loader = TableLoader::new(
            source,
            self.table.clone(),
            self.provider.clone(),
            context.clone(),
            &self.audit,
            self.options.clone(),
        )?;
        Ok(Box::new(loader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryDatabase;
    use crate::iterator::{ListSource, ProcessingContext};

    fn table() -> TableSchema {
        TableSchema::new(
            "people",
            vec![
                ColumnSpec::new("RowId", SemanticType::BigInt),
                ColumnSpec::new("Name", SemanticType::Text).not_null(),
                ColumnSpec::new("Age", SemanticType::Integer),
                ColumnSpec::new("Created", SemanticType::Timestamp),
            ],
        )
        .with_row_id_column("RowId")
        .with_key_columns(["Name"])
    }

    fn source() -> ListSource {
        ListSource::from_text(
            vec![
                ColumnSpec::new("name", SemanticType::Text),
                ColumnSpec::new("age", SemanticType::Text),
                ColumnSpec::new("comment", SemanticType::Text),
            ],
            vec![vec!["ann", "31", "x"], vec!["bob", "42", "y"]],
        )
    }

    /// Source counting how often it was closed
    struct TrackedSource {
        inner: ListSource,
        closes: Rc<std::cell::Cell<usize>>,
    }

    impl RowCursor for TrackedSource {
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
            self.closes.set(self.closes.get() + 1);
            self.inner.close()
        }
    }

    #[test]
    fn test_load_mode() {
        assert!(LoadMode::Insert.reselects_keys());
        assert!(!LoadMode::Import.reselects_keys());
        assert!(LoadMode::Merge.reselects_keys());
        assert!(!LoadMode::Upsert.reselects_keys());
        assert_eq!(LoadMode::Upsert.statement_mode(), StatementMode::Merge);
        assert_eq!("UPSERT".parse::<LoadMode>().unwrap(), LoadMode::Upsert);
        assert!("replace".parse::<LoadMode>().is_err());
        assert_eq!(LoadMode::default(), LoadMode::Import);
    }

    #[test]
    fn test_auto_mapping() {
        let db = Rc::new(MemoryDatabase::new());
        db.create_table(table());
        let ctx = ProcessingContext::new().shared();
        let loader = TableLoader::new(
            source(),
            table(),
            db.clone(),
            ctx,
            &AuditInfo::new("c-1", 7),
            TableLoadOptions::default(),
        )
        .unwrap();

        let names: Vec<&str> = (1..=loader.column_count())
            .map(|i| loader.column_spec(i).name.as_str())
            .collect();
        assert_eq!(names, vec!["Name", "Age", "Created"]);
        assert!(!loader.reselects_keys());
        assert_eq!(db.acquired_count(), 0);
    }

    #[test]
    fn test_merge_requires_key_columns() {
        let db = Rc::new(MemoryDatabase::new());
        let ctx = ProcessingContext::new().shared();
        let table = TableSchema::new("t", vec![ColumnSpec::new("Name", SemanticType::Text)]);
        let result = TableLoader::new(
            source(),
            table,
            db,
            ctx,
            &AuditInfo::new("c-1", 7),
            TableLoadOptions::default().with_mode(LoadMode::Upsert),
        );
        assert!(matches!(result, Err(LoadError::Configuration(_))));
    }

    #[test]
    fn test_triggers_force_reselection() {
        let db = Rc::new(MemoryDatabase::new());
        let ctx = ProcessingContext::new().shared();
        let loader = TableLoader::new(
            source(),
            table().with_triggers(),
            db,
            ctx,
            &AuditInfo::new("c-1", 7),
            TableLoadOptions::default().with_batch_size(50),
        )
        .unwrap();
        assert!(loader.reselects_keys());
        assert_eq!(loader.effective_batch_size(), 1);
        assert_eq!(loader.column_spec(loader.column_count()).name, crate::iterator::ROW_ID_COLUMN);
    }

    #[test]
    fn test_connection_released_once() {
        let db = Rc::new(MemoryDatabase::new());
        db.create_table(table());
        let ctx = ProcessingContext::new().shared();
        let mut loader = TableLoader::new(
            source(),
            table(),
            db.clone(),
            ctx.clone(),
            &AuditInfo::new("c-1", 7),
            TableLoadOptions::default(),
        )
        .unwrap();

        let summary = loader.run().unwrap();
        assert_eq!(summary.rows_read, 2);
        assert_eq!(summary.rows_persisted, 2);
        loader.close().unwrap();
        drop(loader);

        assert_eq!(db.acquired_count(), 1);
        assert_eq!(db.released_count(), 1);
        assert_eq!(db.row_count("people"), 2);
        assert!(ctx.into_result().is_ok());
    }

    #[test]
    fn test_failed_prepare_closes_source() {
        let db = Rc::new(MemoryDatabase::new());
        let ctx = ProcessingContext::new().shared();
        let closes = Rc::new(std::cell::Cell::new(0));
        let source = TrackedSource {
            inner: source(),
            closes: closes.clone(),
        };
        let mut loader = TableLoader::new(
            source,
            table(),
            db.clone(),
            ctx,
            &AuditInfo::new("c-1", 7),
            TableLoadOptions::default(),
        )
        .unwrap();

        assert!(matches!(
            loader.advance(),
            Err(LoadError::Database(crate::database::DatabaseError::QueryFailed(_)))
        ));
        assert_eq!(closes.get(), 1);
        loader.close().unwrap();
        assert_eq!(closes.get(), 1);
        assert_eq!(db.acquired_count(), 1);
        assert_eq!(db.released_count(), 1);
    }

    #[test]
    fn test_drop_without_advance_does_not_acquire() {
        let db = Rc::new(MemoryDatabase::new());
        let ctx = ProcessingContext::new().shared();
        let loader = TableLoader::new(
            source(),
            table(),
            db.clone(),
            ctx,
            &AuditInfo::new("c-1", 7),
            TableLoadOptions::default(),
        )
        .unwrap();
        drop(loader);
        assert_eq!(db.acquired_count(), 0);
        assert_eq!(db.released_count(), 0);
    }

    #[test]
    fn test_summary_display() {
        let summary = LoadSummary {
            table: "people".to_string(),
            mode: LoadMode::Import,
            rows_read: 3,
            rows_persisted: 2,
            rows_skipped: 1,
            executions: 1,
            duration: Duration::from_millis(12),
        };
        assert_eq!(
            summary.to_string(),
            "import into 'people': 3 read, 2 persisted, 1 skipped, 1 executions in 12ms"
        );
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["rowsPersisted"], 2);
        assert_eq!(json["duration"], 12);
    }
}
