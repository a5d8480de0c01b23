//! In-memory relational store
//!
//! Tables live in process memory and enforce the constraints a load has to
//! cope with: column types, NOT NULL, unique keys, generated row ids and
//! merge-by-key. Connections are counted so callers can check that every
//! acquired connection was released.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use super::{
    BatchStatement, ConnectionProvider, DatabaseConnection, DatabaseError, DatabaseResult,
    ExecuteOutcome, ParameterKind, ParameterizedStatement, StatementMode, StatementParameter,
    StatementRequest,
};
use crate::models::{ColumnSpec, SemanticType, TableSchema, Value};

/// One stored row, keyed by table column name
pub type MemoryRow = BTreeMap<String, Value>;

#[derive(Debug, Clone)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<MemoryRow>,
    next_row_id: i64,
}

impl MemoryTable {
    fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
            next_row_id: 1,
        }
    }

    fn find_by_key(&self, row: &MemoryRow) -> Option<usize> {
        let keys = &self.schema.key_columns;
        if keys.is_empty() {
            return None;
        }
        self.rows.iter().position(|existing| {
            keys.iter().all(|key| {
                let name = self.canonical_name(key);
                existing.get(&name).unwrap_or(&Value::Null) == row.get(&name).unwrap_or(&Value::Null)
            })
        })
    }

    fn canonical_name(&self, name: &str) -> String {
        self.schema
            .column(name)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| name.to_string())
    }

    /// Insert or merge one row, returning the index of the stored row
    fn write(&mut self, mut row: MemoryRow, mode: StatementMode) -> DatabaseResult<usize> {
        let existing = self.find_by_key(&row);
        match (existing, mode) {
            (Some(index), StatementMode::Merge) => {
                let mut merged = self.rows[index].clone();
                for (name, value) in row {
                    if self.schema.row_id_column.as_deref() != Some(name.as_str()) {
                        merged.insert(name, value);
                    }
                }
                check_not_null(&self.schema, &merged)?;
                self.rows[index] = merged;
                Ok(index)
            }
            (Some(_), StatementMode::Insert) => {
                let key = self
                    .schema
                    .key_columns
                    .iter()
                    .map(|k| {
                        row.get(&self.canonical_name(k))
                            .map(ToString::to_string)
                            .unwrap_or_default()
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(DatabaseError::ConstraintViolation(format!(
                    "Duplicate key ({}) in table '{}'",
                    key, self.schema.name
                )))
            }
            (None, _) => {
                let mut next_row_id = self.next_row_id;
                if let Some(row_id_column) = &self.schema.row_id_column {
                    let name = self.canonical_name(row_id_column);
                    let id = match row.get(&name).and_then(Value::as_int) {
                        Some(id) => id,
                        None => {
                            row.insert(name, Value::Int(self.next_row_id));
                            self.next_row_id
                        }
                    };
                    let following = id.checked_add(1).ok_or_else(|| {
                        DatabaseError::DataException(format!(
                            "Row id {} exhausts the identity of table '{}'",
                            id, self.schema.name
                        ))
                    })?;
                    next_row_id = next_row_id.max(following);
                }
                check_not_null(&self.schema, &row)?;
                self.next_row_id = next_row_id;
                self.rows.push(row);
                Ok(self.rows.len() - 1)
            }
        }
    }
}

fn check_not_null(schema: &TableSchema, row: &MemoryRow) -> DatabaseResult<()> {
    for column in schema.columns.iter().filter(|c| !c.nullable) {
        if row.get(&column.name).is_none_or(Value::is_null) {
            return Err(DatabaseError::ConstraintViolation(format!(
                "NULL value in column '{}' of table '{}' violates not-null constraint",
                column.name, schema.name
            )));
        }
    }
    Ok(())
}

/// Check a bound value against its column type, widening integers for
/// floating point columns
fn check_value(column: &ColumnSpec, value: Value) -> DatabaseResult<Value> {
    let invalid = |value: &Value| {
        DatabaseError::DataException(format!(
            "Value '{}' ({}) is not valid for column '{}' of type {}",
            value,
            value.kind(),
            column.name,
            column.semantic_type
        ))
    };
    match (column.semantic_type, value) {
        (_, Value::Null) => Ok(Value::Null),
        (SemanticType::Integer, Value::Int(i)) => {
            if i32::try_from(i).is_err() {
                return Err(DatabaseError::DataException(format!(
                    "Value {} is out of range for column '{}'",
                    i, column.name
                )));
            }
            Ok(Value::Int(i))
        }
        (SemanticType::BigInt, Value::Int(i)) => Ok(Value::Int(i)),
        (SemanticType::Double, Value::Int(i)) => Ok(Value::Float(i as f64)),
        (SemanticType::Double, Value::Float(f)) => Ok(Value::Float(f)),
        (SemanticType::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
        (SemanticType::Text, Value::Text(s)) => Ok(Value::Text(s)),
        (SemanticType::Date, Value::Date(d)) => Ok(Value::Date(d)),
        (SemanticType::Timestamp, Value::Timestamp(ts)) => Ok(Value::Timestamp(ts)),
        (SemanticType::Guid, Value::Guid(id)) => Ok(Value::Guid(id)),
        (SemanticType::Guid, Value::Text(s)) => uuid::Uuid::parse_str(&s)
            .map(Value::Guid)
            .map_err(|_| invalid(&Value::Text(s.clone()))),
        (SemanticType::Binary, Value::Binary(bytes)) => Ok(Value::Binary(bytes)),
        (_, other) => Err(invalid(&other)),
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, MemoryTable>,
    injected_failures: Vec<DatabaseError>,
    executions: usize,
    batch_executions: usize,
    prepared: usize,
}

impl MemoryState {
    fn table(&self, name: &str) -> DatabaseResult<&MemoryTable> {
        self.tables
            .get(&name.to_lowercase())
            .ok_or_else(|| DatabaseError::QueryFailed(format!("Table '{}' does not exist", name)))
    }

    fn table_mut(&mut self, name: &str) -> DatabaseResult<&mut MemoryTable> {
        self.tables
            .get_mut(&name.to_lowercase())
            .ok_or_else(|| DatabaseError::QueryFailed(format!("Table '{}' does not exist", name)))
    }

    fn take_injected_failure(&mut self) -> Option<DatabaseError> {
        if self.injected_failures.is_empty() {
            None
        } else {
            Some(self.injected_failures.remove(0))
        }
    }
}

/// In-memory store and connection provider
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    state: Rc<RefCell<MemoryState>>,
    transactional: bool,
    acquired: Cell<usize>,
    released: Cell<usize>,
}

impl MemoryDatabase {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections report an active transaction
    pub fn with_transactions(mut self) -> Self {
        self.transactional = true;
        self
    }

    /// Create (or replace) a table
    pub fn create_table(&self, schema: TableSchema) {
        tracing::debug!("Creating in-memory table '{}'", schema.name);
        self.state
            .borrow_mut()
            .tables
            .insert(schema.name.to_lowercase(), MemoryTable::new(schema));
    }

    /// Make the next statement execution (single row or batch) fail with `error`
    pub fn fail_next_execution(&self, error: DatabaseError) {
        self.state.borrow_mut().injected_failures.push(error);
    }

    /// Rows stored in a table, in insertion order
    pub fn rows(&self, table: &str) -> DatabaseResult<Vec<MemoryRow>> {
        Ok(self.state.borrow().table(table)?.rows.clone())
    }

    /// Number of rows stored in a table (0 for unknown tables)
    pub fn row_count(&self, table: &str) -> usize {
        self.state
            .borrow()
            .table(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    /// Connections handed out
    pub fn acquired_count(&self) -> usize {
        self.acquired.get()
    }

    /// Connections returned
    pub fn released_count(&self) -> usize {
        self.released.get()
    }

    /// Single-row executions
    pub fn execution_count(&self) -> usize {
        self.state.borrow().executions
    }

    /// Batch executions
    pub fn batch_execution_count(&self) -> usize {
        self.state.borrow().batch_executions
    }

    /// Statements prepared
    pub fn prepared_count(&self) -> usize {
        self.state.borrow().prepared
    }
}

impl ConnectionProvider for MemoryDatabase {
    fn acquire(&self) -> DatabaseResult<Box<dyn DatabaseConnection>> {
        self.acquired.set(self.acquired.get() + 1);
        Ok(Box::new(MemoryConnection {
            state: self.state.clone(),
            transactional: self.transactional,
        }))
    }

    fn release(&self, _connection: Box<dyn DatabaseConnection>) -> DatabaseResult<()> {
        if self.released.get() >= self.acquired.get() {
            return Err(DatabaseError::InvalidInput(
                "Connection released more often than acquired".to_string(),
            ));
        }
        self.released.set(self.released.get() + 1);
        Ok(())
    }
}

struct MemoryConnection {
    state: Rc<RefCell<MemoryState>>,
    transactional: bool,
}

impl DatabaseConnection for MemoryConnection {
    fn prepare(
        &mut self,
        request: &StatementRequest,
    ) -> DatabaseResult<Box<dyn ParameterizedStatement>> {
        let mut state = self.state.borrow_mut();
        let table = state.table(&request.table.name)?;

        let mut columns = Vec::with_capacity(request.columns.len());
        for column in &request.columns {
            let target = table.schema.column(&column.name).ok_or_else(|| {
                DatabaseError::QueryFailed(format!(
                    "Column '{}' does not exist in table '{}'",
                    column.name, table.schema.name
                ))
            })?;
            columns.push(ColumnSpec {
                missing_values_enabled: column.missing_values_enabled,
                missing_value_column: column.missing_value_column.clone(),
                property_uri: column.property_uri.clone(),
                ..target.clone()
            });
        }

        let parameters = StatementParameter::for_columns(&columns);
        let table_name = table.schema.name.clone();
        state.prepared += 1;
        Ok(Box::new(MemoryStatement {
            state: self.state.clone(),
            table: table_name,
            values: vec![Value::Null; parameters.len()],
            columns,
            parameters,
            mode: request.mode,
            reselect_keys: request.reselect_keys,
            queued: Vec::new(),
            closed: false,
        }))
    }

    fn is_transaction_active(&self) -> bool {
        self.transactional
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

struct MemoryStatement {
    state: Rc<RefCell<MemoryState>>,
    table: String,
    columns: Vec<ColumnSpec>,
    parameters: Vec<StatementParameter>,
    values: Vec<Value>,
    mode: StatementMode,
    reselect_keys: bool,
    queued: Vec<Vec<Value>>,
    closed: bool,
}

impl MemoryStatement {
    fn check_open(&self) -> DatabaseResult<()> {
        if self.closed {
            return Err(DatabaseError::QueryFailed("Statement is closed".to_string()));
        }
        Ok(())
    }

    /// Turn bound values into a typed row
    fn build_row(&self, values: &[Value]) -> DatabaseResult<MemoryRow> {
        let mut row = MemoryRow::new();
        let mut columns = self.columns.iter();
        for (parameter, value) in self.parameters.iter().zip(values) {
            match parameter.kind {
                ParameterKind::Value => {
                    let Some(column) = columns.next() else {
                        break;
                    };
                    row.insert(column.name.clone(), check_value(column, value.clone())?);
                }
                ParameterKind::MissingIndicator => {
                    if !value.is_null() {
                        row.insert(parameter.name.clone(), value.clone());
                    }
                }
            }
        }
        Ok(row)
    }
}

impl ParameterizedStatement for MemoryStatement {
    fn parameters(&self) -> &[StatementParameter] {
        &self.parameters
    }

    fn clear_parameters(&mut self) {
        self.values.fill(Value::Null);
    }

    fn set_parameter(&mut self, index: usize, value: Value) -> DatabaseResult<()> {
        let slot = self.values.get_mut(index).ok_or_else(|| {
            DatabaseError::InvalidInput(format!("Parameter index {} out of range", index))
        })?;
        *slot = value;
        Ok(())
    }

    fn execute(&mut self) -> DatabaseResult<ExecuteOutcome> {
        self.check_open()?;
        let mut state = self.state.borrow_mut();
        state.executions += 1;
        if let Some(error) = state.take_injected_failure() {
            return Err(error);
        }

        let row = self.build_row(&self.values)?;
        let table = state.table_mut(&self.table)?;
        let index = table.write(row, self.mode)?;

        let mut outcome = ExecuteOutcome {
            rows_affected: 1,
            ..ExecuteOutcome::default()
        };
        if self.reselect_keys {
            let stored = &table.rows[index];
            outcome.row_id = table
                .schema
                .row_id_column
                .as_deref()
                .and_then(|c| stored.get(&table.canonical_name(c)).cloned());
            outcome.object_id = table
                .schema
                .object_id_column
                .as_deref()
                .and_then(|c| stored.get(&table.canonical_name(c)).cloned());
        }
        Ok(outcome)
    }

    fn as_batch(&mut self) -> Option<&mut dyn BatchStatement> {
        Some(self)
    }

    fn close(&mut self) -> DatabaseResult<()> {
        self.closed = true;
        self.queued.clear();
        Ok(())
    }
}

impl BatchStatement for MemoryStatement {
    fn add_batch(&mut self) -> DatabaseResult<()> {
        self.check_open()?;
        self.queued.push(self.values.clone());
        Ok(())
    }

    /// All rows of the batch are written, or none
    fn execute_batch(&mut self) -> DatabaseResult<usize> {
        self.check_open()?;
        let queued = std::mem::take(&mut self.queued);
        let mut state = self.state.borrow_mut();
        state.batch_executions += 1;
        if let Some(error) = state.take_injected_failure() {
            return Err(error);
        }

        let mut staged = state.table(&self.table)?.clone();
        for values in &queued {
            let row = self.build_row(values)?;
            staged.write(row, self.mode)?;
        }
        *state.table_mut(&self.table)? = staged;
        Ok(queued.len())
    }

    fn clear_batch(&mut self) {
        self.queued.clear();
    }
}
