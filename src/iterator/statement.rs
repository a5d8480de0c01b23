//! Statement binding stage
//!
//! Binds each row of the inner cursor to a prepared statement and executes
//! it. Rows the store rejects for data reasons (malformed values, constraint
//! violations) become row errors; any other failure aborts the run.

use super::{LoadError, LoadResult, MapAccess, RowCursor, SharedContext, current_row_number, row_map};
use crate::database::{
    DatabaseError, DatabaseResult, ExecuteOutcome, ParameterKind, ParameterizedStatement,
    StatementParameter,
};
use crate::models::{ColumnSpec, Identifier, SemanticType, Value};
use crate::validation::{GlobalError, RowError};

/// Synthetic output column holding the generated row id
pub const ROW_ID_COLUMN: &str = "_rowid";

/// Synthetic output column holding the object identifier
pub const OBJECT_ID_COLUMN: &str = "_objectid";

/// Maps one output column onto statement parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterBinding {
    /// Output column of the inner cursor
    pub column_index: usize,
    /// Value parameter
    pub parameter_index: usize,
    /// Indicator parameter for missing-value-aware columns
    pub indicator_parameter: Option<usize>,
}

impl ParameterBinding {
    /// Match statement parameters to the columns of `cursor`.
    ///
    /// Each value parameter is bound to the column with the same property URI,
    /// or failing that the same name. Indicator parameters are bound to the
    /// column whose missing-value companion they name. Unmatched parameters
    /// are left unbound and execute as NULL.
    pub fn resolve<C: RowCursor + ?Sized>(
        cursor: &C,
        parameters: &[StatementParameter],
    ) -> Vec<ParameterBinding> {
        let columns: Vec<(usize, &ColumnSpec)> = (1..=cursor.column_count())
            .map(|i| (i, cursor.column_spec(i)))
            .collect();

        let mut bindings: Vec<ParameterBinding> = Vec::new();
        for (parameter_index, parameter) in parameters.iter().enumerate() {
            if parameter.kind != ParameterKind::Value {
                continue;
            }
            let by_property = parameter.property_uri.as_deref().and_then(|uri| {
                columns
                    .iter()
                    .find(|(_, c)| c.property_uri.as_deref() == Some(uri))
            });
            let name = Identifier::new(parameter.name.as_str());
            let matched = by_property.or_else(|| columns.iter().find(|(_, c)| name.matches(&c.name)));
            if let Some((column_index, _)) = matched
                && !bindings.iter().any(|b| b.column_index == *column_index)
            {
                bindings.push(ParameterBinding {
                    column_index: *column_index,
                    parameter_index,
                    indicator_parameter: None,
                });
            }
        }

        for (parameter_index, parameter) in parameters.iter().enumerate() {
            if parameter.kind != ParameterKind::MissingIndicator {
                continue;
            }
            let name = Identifier::new(parameter.name.as_str());
            let owner = bindings.iter_mut().find(|b| {
                cursor
                    .column_spec(b.column_index)
                    .missing_value_column
                    .as_deref()
                    .is_some_and(|companion| name.matches(companion))
            });
            if let Some(binding) = owner {
                binding.indicator_parameter = Some(parameter_index);
            }
        }
        bindings
    }
}

/// Executes a prepared statement for every row of the inner cursor.
///
/// Rows that already failed upstream are passed on without being executed.
/// With a batch size above one and a statement supporting batches, rows are
/// queued and flushed every `batch_size` rows and at end of input. With a
/// second statement, executions alternate between the two.
pub struct StatementBindingStage<C> {
    input: C,
    context: SharedContext,
    statements: Vec<Box<dyn ParameterizedStatement>>,
    current: usize,
    bindings: Vec<ParameterBinding>,
    extra_columns: Vec<ColumnSpec>,
    capture_row_id: bool,
    capture_object_id: bool,
    row_id: Value,
    object_id: Value,
    batch_size: usize,
    pending: Vec<i64>,
    executions: usize,
    rows_received: usize,
    rows_persisted: usize,
    rows_skipped: usize,
    stopped: bool,
    closed: bool,
}

impl<C: RowCursor> StatementBindingStage<C> {
    /// Bind `input` to `statement`
    pub fn new(
        input: C,
        context: SharedContext,
        statement: Box<dyn ParameterizedStatement>,
    ) -> Self {
        let bindings = ParameterBinding::resolve(&input, statement.parameters());
        tracing::debug!(
            "Bound {} of {} statement parameters",
            bindings.len() + bindings.iter().filter(|b| b.indicator_parameter.is_some()).count(),
            statement.parameters().len()
        );
        Self {
            input,
            context,
            statements: vec![statement],
            current: 0,
            bindings,
            extra_columns: Vec::new(),
            capture_row_id: false,
            capture_object_id: false,
            row_id: Value::Null,
            object_id: Value::Null,
            batch_size: 1,
            pending: Vec::new(),
            executions: 0,
            rows_received: 0,
            rows_persisted: 0,
            rows_skipped: 0,
            stopped: false,
            closed: false,
        }
    }

    /// Alternate executions with an equivalent second statement
    pub fn with_second_statement(
        mut self,
        statement: Box<dyn ParameterizedStatement>,
    ) -> LoadResult<Self> {
        if statement.parameters() != self.statements[0].parameters() {
            return Err(LoadError::Configuration(
                "second statement has different parameters".to_string(),
            ));
        }
        self.statements.push(statement);
        Ok(self)
    }

    /// Queue up to `batch_size` rows per execution
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Expose the generated row id as the `_rowid` column
    pub fn capture_row_id(mut self) -> Self {
        if !self.capture_row_id {
            self.capture_row_id = true;
            self.extra_columns
                .push(ColumnSpec::new(ROW_ID_COLUMN, SemanticType::BigInt));
        }
        self
    }

    /// Expose the object identifier as the `_objectid` column
    pub fn capture_object_id(mut self) -> Self {
        if !self.capture_object_id {
            self.capture_object_id = true;
            self.extra_columns
                .push(ColumnSpec::new(OBJECT_ID_COLUMN, SemanticType::Text));
        }
        self
    }

    /// Parameter bindings in use
    pub fn bindings(&self) -> &[ParameterBinding] {
        &self.bindings
    }

    /// Statement executions so far (a flushed batch counts once)
    pub fn executions(&self) -> usize {
        self.executions
    }

    /// Rows pulled from the inner cursor
    pub fn rows_received(&self) -> usize {
        self.rows_received
    }

    /// Rows written to the store
    pub fn rows_persisted(&self) -> usize {
        self.rows_persisted
    }

    /// Rows not written because of upstream or store errors
    pub fn rows_skipped(&self) -> usize {
        self.rows_skipped
    }

    fn batching(&mut self) -> bool {
        self.batch_size > 1 && self.statements[self.current].as_batch().is_some()
    }

    fn bind_current_row(&mut self) -> DatabaseResult<()> {
        let statement = &mut self.statements[self.current];
        statement.clear_parameters();
        for binding in &self.bindings {
            let (value, indicator) = self.input.value_at(binding.column_index).split_missing();
            statement.set_parameter(binding.parameter_index, value.clone())?;
            if let Some(parameter) = binding.indicator_parameter {
                statement.set_parameter(parameter, indicator.map(Value::text).unwrap_or_default())?;
            }
        }
        Ok(())
    }

    fn execute_row(&mut self) -> DatabaseResult<ExecuteOutcome> {
        self.bind_current_row()?;
        let outcome = self.statements[self.current].execute()?;
        self.executions += 1;
        self.rotate();
        Ok(outcome)
    }

    fn queue_row(&mut self) -> DatabaseResult<()> {
        self.bind_current_row()?;
        match self.statements[self.current].as_batch() {
            Some(batch) => batch.add_batch(),
            None => Err(DatabaseError::QueryFailed(
                "statement does not support batches".to_string(),
            )),
        }
    }

    /// Execute queued rows; a data failure is recorded against the batch
    fn flush(&mut self) -> LoadResult<()> {
        let (Some(&first), Some(&last)) = (self.pending.first(), self.pending.last()) else {
            return Ok(());
        };
        let queued = self.pending.len();
        self.pending.clear();

        let result = match self.statements[self.current].as_batch() {
            Some(batch) => batch.execute_batch(),
            None => Ok(0),
        };
        self.executions += 1;
        self.rotate();

        match result {
            Ok(affected) => {
                tracing::debug!("Flushed batch of rows {}-{} ({} affected)", first, last, affected);
                self.rows_persisted += queued;
                Ok(())
            }
            Err(error) if error.is_data_class() => {
                tracing::warn!("Batch of rows {}-{} rejected: {}", first, last, error);
                self.rows_skipped += queued;
                self.context.record_global_error(GlobalError::new(format!(
                    "Rows {}-{} were not saved: {}",
                    first, last, error
                )));
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Drop queued rows without executing them, recording them as not saved
    fn abandon_pending(&mut self, reason: &str) {
        let (Some(&first), Some(&last)) = (self.pending.first(), self.pending.last()) else {
            return;
        };
        let queued = self.pending.len();
        self.pending.clear();
        if let Some(batch) = self.statements[self.current].as_batch() {
            batch.clear_batch();
        }
        tracing::warn!("Rows {}-{} discarded: {}", first, last, reason);
        self.rows_skipped += queued;
        self.context.record_global_error(GlobalError::new(format!(
            "Rows {}-{} were not saved: {}",
            first, last, reason
        )));
    }

    fn rotate(&mut self) {
        self.current = (self.current + 1) % self.statements.len();
    }

    fn record_rejected_row(&mut self, row_number: i64, error: DatabaseError) {
        tracing::warn!("Row {} rejected: {}", row_number, error);
        self.rows_skipped += 1;
        self.context
            .record_row_error(RowError::with_message(row_number, error.to_string()));
    }

    fn stop(&mut self) -> LoadResult<bool> {
        self.stopped = true;
        Ok(false)
    }
}

impl<C: RowCursor> RowCursor for StatementBindingStage<C> {
    fn column_count(&self) -> usize {
        self.input.column_count() + self.extra_columns.len()
    }

    fn column_spec(&self, index: usize) -> &ColumnSpec {
        let base = self.input.column_count();
        if index <= base {
            self.input.column_spec(index)
        } else {
            &self.extra_columns[index - base - 1]
        }
    }

    fn advance(&mut self) -> LoadResult<bool> {
        if self.stopped {
            return Ok(false);
        }
        if !self.input.advance()? {
            if self.context.should_cancel() {
                self.abandon_pending("load cancelled");
            } else {
                self.flush()?;
            }
            return self.stop();
        }

        self.rows_received += 1;
        self.row_id = Value::Null;
        self.object_id = Value::Null;
        let row_number = current_row_number(&self.input);

        if self.context.errors().has_row_failure(row_number) {
            self.rows_skipped += 1;
            return Ok(true);
        }
        if self.context.should_cancel() {
            tracing::debug!("Load cancelled before row {}", row_number);
            self.abandon_pending("load cancelled");
            return self.stop();
        }

        if self.batching() {
            match self.queue_row() {
                Ok(()) => self.pending.push(row_number),
                Err(error) if error.is_data_class() => self.record_rejected_row(row_number, error),
                Err(error) => return Err(error.into()),
            }
            if self.pending.len() >= self.batch_size {
                self.flush()?;
            }
        } else {
            match self.execute_row() {
                Ok(outcome) => {
                    self.rows_persisted += 1;
                    if self.capture_row_id {
                        self.row_id = outcome.row_id.unwrap_or_default();
                    }
                    if self.capture_object_id {
                        self.object_id = outcome.object_id.unwrap_or_default();
                    }
                }
                Err(error) if error.is_data_class() => self.record_rejected_row(row_number, error),
                Err(error) => return Err(error.into()),
            }
        }

        if self.context.should_cancel() {
            self.abandon_pending("load cancelled");
            return self.stop();
        }
        Ok(true)
    }

    fn value_at(&self, index: usize) -> &Value {
        let base = self.input.column_count();
        if index <= base {
            return self.input.value_at(index);
        }
        match self.extra_columns[index - base - 1].name.as_str() {
            ROW_ID_COLUMN => &self.row_id,
            _ => &self.object_id,
        }
    }

    fn close(&mut self) -> LoadResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stopped = true;
        self.abandon_pending("load closed before the batch was flushed");
        let mut first_error = None;
        for statement in &mut self.statements {
            if let Err(error) = statement.close() {
                first_error.get_or_insert(error);
            }
        }
        self.input.close()?;
        match first_error {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    fn as_map_access(&self) -> Option<&dyn MapAccess> {
        Some(self)
    }
}

impl<C: RowCursor> MapAccess for StatementBindingStage<C> {
    fn current_map(&self) -> std::collections::BTreeMap<String, Value> {
        row_map(self)
    }
}
