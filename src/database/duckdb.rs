//! DuckDB database backend implementation
//!
//! Provides an embedded store for load pipelines. Statements are generated
//! from the [`StatementRequest`]: a plain `INSERT`, or `INSERT ... ON CONFLICT
//! DO UPDATE` keyed on the table's key columns for merges, with a `RETURNING`
//! clause when generated keys must be reselected.

use std::cell::Cell;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::{
    BatchStatement, ConnectionProvider, DatabaseConnection, DatabaseError, DatabaseResult,
    ExecuteOutcome, ParameterizedStatement, StatementMode, StatementParameter, StatementRequest,
};
use crate::models::{Identifier, SemanticType, TableSchema, Value};

/// DuckDB connection provider
///
/// Every acquired connection is a clone of the provider's root connection,
/// so all of them see the same database.
pub struct DuckDbProvider {
    /// Path to the database file (None for in-memory)
    db_path: Option<PathBuf>,
    connection: duckdb::Connection,
    acquired: Cell<usize>,
    released: Cell<usize>,
}

impl DuckDbProvider {
    /// Open (or create) a file-based database
    pub fn new(db_path: impl AsRef<Path>) -> DatabaseResult<Self> {
        let path = db_path.as_ref().to_path_buf();
        let connection = duckdb::Connection::open(&path).map_err(|e| {
            DatabaseError::ConnectionFailed(format!("Failed to open DuckDB: {}", e))
        })?;

        Ok(Self {
            db_path: Some(path),
            connection,
            acquired: Cell::new(0),
            released: Cell::new(0),
        })
    }

    /// Create an in-memory database
    pub fn in_memory() -> DatabaseResult<Self> {
        let connection = duckdb::Connection::open_in_memory().map_err(|e| {
            DatabaseError::ConnectionFailed(format!("Failed to create in-memory DuckDB: {}", e))
        })?;

        Ok(Self {
            db_path: None,
            connection,
            acquired: Cell::new(0),
            released: Cell::new(0),
        })
    }

    /// Get the database file path (None for in-memory)
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Check if this is an in-memory database
    pub fn is_in_memory(&self) -> bool {
        self.db_path.is_none()
    }

    /// Connections handed out
    pub fn acquired_count(&self) -> usize {
        self.acquired.get()
    }

    /// Connections returned
    pub fn released_count(&self) -> usize {
        self.released.get()
    }

    /// Execute one or more SQL statements that don't return rows
    pub fn execute_batch(&self, sql: &str) -> DatabaseResult<()> {
        self.connection
            .execute_batch(sql)
            .map_err(|e| DatabaseError::QueryFailed(format!("Batch execute failed: {}", e)))
    }

    /// Create a table for a schema
    ///
    /// The row id column is backed by a sequence and the key columns form the
    /// primary key, which merge statements rely on.
    pub fn create_table(&self, schema: &TableSchema) -> DatabaseResult<()> {
        let mut definitions = Vec::with_capacity(schema.columns.len() + 1);
        let mut ddl = String::new();

        for column in &schema.columns {
            let mut definition = format!(
                "{} {}",
                quote_identifier(&column.name),
                sql_type(column.semantic_type)
            );
            if schema
                .row_id_column
                .as_deref()
                .is_some_and(|c| column.is_named(c))
            {
                let sequence = format!("{}_rowid_seq", schema.name);
                ddl.push_str(&format!(
                    "CREATE SEQUENCE IF NOT EXISTS {};\n",
                    quote_identifier(&sequence)
                ));
                definition.push_str(&format!(" DEFAULT nextval('{}')", sequence.replace('\'', "''")));
            }
            if !column.nullable {
                definition.push_str(" NOT NULL");
            }
            definitions.push(definition);
        }
        if !schema.key_columns.is_empty() {
            definitions.push(format!("PRIMARY KEY ({})", quote_list(&schema.key_columns)));
        }

        ddl.push_str(&format!(
            "CREATE TABLE {} ({});",
            quote_identifier(&schema.name),
            definitions.join(", ")
        ));
        tracing::debug!("Creating DuckDB table: {}", ddl);
        self.execute_batch(&ddl)
    }

    /// Run a query and collect every row
    pub fn query(&self, sql: &str) -> DatabaseResult<Vec<Vec<Value>>> {
        let mut stmt = self
            .connection
            .prepare(sql)
            .map_err(|e| DatabaseError::QueryFailed(format!("Prepare failed: {}", e)))?;
        let mut rows = stmt
            .query([])
            .map_err(|e| DatabaseError::QueryFailed(format!("Query failed: {}", e)))?;

        let mut result = Vec::new();
        while let Some(row) = rows.next().map_err(classify_error)? {
            let mut values = Vec::new();
            while let Ok(value) = row.get_ref(values.len()) {
                values.push(value_from_ref(value));
            }
            result.push(values);
        }
        Ok(result)
    }

    /// Number of rows in a table
    pub fn row_count(&self, table: &str) -> DatabaseResult<usize> {
        let rows = self.query(&format!("SELECT COUNT(*) FROM {}", quote_identifier(table)))?;
        let count = rows
            .first()
            .and_then(|row| row.first())
            .and_then(Value::as_int)
            .unwrap_or(0);
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

impl ConnectionProvider for DuckDbProvider {
    fn acquire(&self) -> DatabaseResult<Box<dyn DatabaseConnection>> {
        let connection = self.connection.try_clone().map_err(|e| {
            DatabaseError::ConnectionFailed(format!("Failed to clone DuckDB connection: {}", e))
        })?;
        self.acquired.set(self.acquired.get() + 1);
        Ok(Box::new(DuckDbConnection { connection }))
    }

    fn release(&self, connection: Box<dyn DatabaseConnection>) -> DatabaseResult<()> {
        drop(connection);
        self.released.set(self.released.get() + 1);
        Ok(())
    }
}

struct DuckDbConnection {
    connection: duckdb::Connection,
}

impl DatabaseConnection for DuckDbConnection {
    fn prepare(
        &mut self,
        request: &StatementRequest,
    ) -> DatabaseResult<Box<dyn ParameterizedStatement>> {
        let parameters = StatementParameter::for_columns(&request.columns);
        let sql = build_statement_sql(request, &parameters);
        tracing::debug!("Preparing DuckDB statement: {}", sql);

        // Surface missing tables and columns when the load opens
        self.connection.prepare_cached(&sql).map_err(classify_error)?;

        let connection = self.connection.try_clone().map_err(|e| {
            DatabaseError::ConnectionFailed(format!("Failed to clone DuckDB connection: {}", e))
        })?;
        Ok(Box::new(DuckDbStatement {
            connection,
            sql,
            values: vec![Value::Null; parameters.len()],
            parameters,
            reselect_keys: request.reselect_keys,
            returns_object_id: request.table.object_id_column.is_some(),
            queued: Vec::new(),
            closed: false,
        }))
    }

    fn is_transaction_active(&self) -> bool {
        false
    }

    fn backend_type(&self) -> &'static str {
        "duckdb"
    }
}

struct DuckDbStatement {
    connection: duckdb::Connection,
    sql: String,
    parameters: Vec<StatementParameter>,
    values: Vec<Value>,
    reselect_keys: bool,
    returns_object_id: bool,
    queued: Vec<Vec<duckdb::types::Value>>,
    closed: bool,
}

impl DuckDbStatement {
    fn check_open(&self) -> DatabaseResult<()> {
        if self.closed {
            return Err(DatabaseError::QueryFailed("Statement is closed".to_string()));
        }
        Ok(())
    }

    fn bound_values(&self) -> DatabaseResult<Vec<duckdb::types::Value>> {
        self.values.iter().map(value_to_duckdb).collect()
    }
}

impl ParameterizedStatement for DuckDbStatement {
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
        let values = self.bound_values()?;
        let mut stmt = self
            .connection
            .prepare_cached(&self.sql)
            .map_err(classify_error)?;

        if !self.reselect_keys {
            let rows_affected = stmt
                .execute(duckdb::params_from_iter(values))
                .map_err(classify_error)?;
            return Ok(ExecuteOutcome {
                rows_affected,
                ..ExecuteOutcome::default()
            });
        }

        let mut rows = stmt
            .query(duckdb::params_from_iter(values))
            .map_err(classify_error)?;
        let mut outcome = ExecuteOutcome::default();
        if let Some(row) = rows.next().map_err(classify_error)? {
            outcome.rows_affected = 1;
            outcome.row_id = row.get_ref(0).ok().map(value_from_ref);
            if self.returns_object_id {
                outcome.object_id = row.get_ref(1).ok().map(value_from_ref);
            }
        }
        Ok(outcome)
    }

    fn as_batch(&mut self) -> Option<&mut dyn BatchStatement> {
        if self.reselect_keys { None } else { Some(self) }
    }

    fn close(&mut self) -> DatabaseResult<()> {
        self.closed = true;
        self.queued.clear();
        Ok(())
    }
}

impl BatchStatement for DuckDbStatement {
    fn add_batch(&mut self) -> DatabaseResult<()> {
        self.check_open()?;
        let values = self.bound_values()?;
        self.queued.push(values);
        Ok(())
    }

    /// Runs the queued rows in one transaction; a failure rolls all of them back
    fn execute_batch(&mut self) -> DatabaseResult<usize> {
        self.check_open()?;
        let queued = std::mem::take(&mut self.queued);
        let tx = self.connection.transaction().map_err(|e| {
            DatabaseError::TransactionFailed(format!("Failed to begin transaction: {}", e))
        })?;

        let mut affected = 0;
        {
            let mut stmt = tx.prepare_cached(&self.sql).map_err(classify_error)?;
            for values in queued {
                affected += stmt
                    .execute(duckdb::params_from_iter(values))
                    .map_err(classify_error)?;
            }
        }

        tx.commit().map_err(|e| {
            DatabaseError::TransactionFailed(format!("Failed to commit transaction: {}", e))
        })?;
        Ok(affected)
    }

    fn clear_batch(&mut self) {
        self.queued.clear();
    }
}

/// Build the INSERT (or merge) statement for a request
fn build_statement_sql(request: &StatementRequest, parameters: &[StatementParameter]) -> String {
    let table = &request.table;
    let columns: Vec<String> = parameters.iter().map(|p| p.name.clone()).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_identifier(&table.name),
        quote_list(&columns),
        placeholders
    );

    if request.mode == StatementMode::Merge && !table.key_columns.is_empty() {
        let updates: Vec<String> = columns
            .iter()
            .filter(|c| !table.key_columns.iter().any(|k| Identifier::same_name(k, c)))
            .map(|c| format!("{0} = excluded.{0}", quote_identifier(c)))
            .collect();
        sql.push_str(&format!(" ON CONFLICT ({}) ", quote_list(&table.key_columns)));
        if updates.is_empty() {
            sql.push_str("DO NOTHING");
        } else {
            sql.push_str(&format!("DO UPDATE SET {}", updates.join(", ")));
        }
    }

    if request.reselect_keys {
        let mut returning = vec![
            table
                .row_id_column
                .as_deref()
                .map(quote_identifier)
                .unwrap_or_else(|| "NULL".to_string()),
        ];
        if let Some(object_id) = &table.object_id_column {
            returning.push(quote_identifier(object_id));
        }
        sql.push_str(&format!(" RETURNING {}", returning.join(", ")));
    }

    sql
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_list(names: &[String]) -> String {
    names
        .iter()
        .map(|n| quote_identifier(n))
        .collect::<Vec<_>>()
        .join(", ")
}

fn sql_type(semantic_type: SemanticType) -> &'static str {
    match semantic_type {
        SemanticType::Boolean => "BOOLEAN",
        SemanticType::Integer => "INTEGER",
        SemanticType::BigInt => "BIGINT",
        SemanticType::Double => "DOUBLE",
        SemanticType::Text => "VARCHAR",
        SemanticType::Date => "DATE",
        SemanticType::Timestamp => "TIMESTAMP",
        SemanticType::Guid => "UUID",
        SemanticType::Binary => "BLOB",
    }
}

/// Map a DuckDB error onto the data / non-data split the pipeline relies on
fn classify_error(error: duckdb::Error) -> DatabaseError {
    let message = error.to_string();
    if message.contains("Constraint Error") {
        DatabaseError::ConstraintViolation(message)
    } else if message.contains("Conversion Error")
        || message.contains("Invalid Input Error")
        || message.contains("Out of Range Error")
    {
        DatabaseError::DataException(message)
    } else {
        DatabaseError::QueryFailed(message)
    }
}

/// Convert a pipeline value to a DuckDB parameter value
fn value_to_duckdb(value: &Value) -> DatabaseResult<duckdb::types::Value> {
    use duckdb::types::{TimeUnit, Value as DuckValue};

    Ok(match value {
        Value::Null | Value::Missing(_) => DuckValue::Null,
        Value::Bool(b) => DuckValue::Boolean(*b),
        Value::Int(i) => DuckValue::BigInt(*i),
        Value::Float(f) => DuckValue::Double(*f),
        Value::Text(s) => DuckValue::Text(s.clone()),
        Value::Date(d) => {
            let days = d
                .signed_duration_since(DateTime::<Utc>::UNIX_EPOCH.date_naive())
                .num_days();
            let days = i32::try_from(days).map_err(|_| {
                DatabaseError::DataException(format!("Date {} is out of range", d))
            })?;
            DuckValue::Date32(days)
        }
        Value::Timestamp(ts) => DuckValue::Timestamp(TimeUnit::Microsecond, ts.timestamp_micros()),
        Value::Guid(id) => DuckValue::Text(id.to_string()),
        Value::Binary(bytes) => DuckValue::Blob(bytes.clone()),
    })
}

/// Convert a DuckDB ValueRef to a pipeline value
fn value_from_ref(value: duckdb::types::ValueRef) -> Value {
    use duckdb::types::{TimeUnit, ValueRef};

    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(i) => Value::Int(i.into()),
        ValueRef::SmallInt(i) => Value::Int(i.into()),
        ValueRef::Int(i) => Value::Int(i.into()),
        ValueRef::BigInt(i) => Value::Int(i),
        ValueRef::UTinyInt(i) => Value::Int(i.into()),
        ValueRef::USmallInt(i) => Value::Int(i.into()),
        ValueRef::UInt(i) => Value::Int(i.into()),
        ValueRef::UBigInt(i) => i64::try_from(i)
            .map(Value::Int)
            .unwrap_or_else(|_| Value::Text(i.to_string())),
        ValueRef::HugeInt(i) => i64::try_from(i)
            .map(Value::Int)
            .unwrap_or_else(|_| Value::Text(i.to_string())),
        ValueRef::Float(f) => Value::Float(f.into()),
        ValueRef::Double(f) => Value::Float(f),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            match uuid::Uuid::parse_str(&text) {
                Ok(id) => Value::Guid(id),
                Err(_) => Value::Text(text),
            }
        }
        ValueRef::Blob(bytes) => Value::Binary(bytes.to_vec()),
        ValueRef::Timestamp(unit, raw) => {
            let micros = match unit {
                TimeUnit::Second => raw.saturating_mul(1_000_000),
                TimeUnit::Millisecond => raw.saturating_mul(1_000),
                TimeUnit::Microsecond => raw,
                TimeUnit::Nanosecond => raw / 1_000,
            };
            DateTime::<Utc>::from_timestamp_micros(micros)
                .map(Value::Timestamp)
                .unwrap_or(Value::Null)
        }
        ValueRef::Date32(days) => DateTime::<Utc>::UNIX_EPOCH
            .date_naive()
            .checked_add_signed(chrono::Duration::days(days.into()))
            .map(Value::Date)
            .unwrap_or(Value::Null),
        ValueRef::Decimal(d) => Value::Text(d.to_string()),
        other => Value::Text(format!("{:?}", other)),
    }
}
