//! Integration tests for loading rows into the in-memory store

use std::collections::HashMap;
use std::rc::Rc;

use data_load_sdk::database::{DatabaseError, LoadConfig, MemoryDatabase};
use data_load_sdk::iterator::{
    AuditInfo, CursorBuilder, ListSource, LoadError, LoadMode, LoggingCursor, OBJECT_ID_COLUMN,
    ProcessingContext, ROW_ID_COLUMN, RowCursor, SharedContext, TableLoadBuilder,
    TableLoadOptions, TableLoader, TransformPlan, ValueProducer, find_column,
};
use data_load_sdk::models::{ColumnSpec, SemanticType, TableSchema, Value};

fn people_table() -> TableSchema {
    TableSchema::new(
        "People",
        vec![
            ColumnSpec::new("RowId", SemanticType::BigInt),
            ColumnSpec::new("EntityId", SemanticType::Guid),
            ColumnSpec::new("Name", SemanticType::Text).not_null(),
            ColumnSpec::new("Age", SemanticType::Integer),
            ColumnSpec::new("Weight", SemanticType::Double).with_missing_values(),
            ColumnSpec::new("Weight_MVIndicator", SemanticType::Text),
            ColumnSpec::new("Container", SemanticType::Text),
            ColumnSpec::new("CreatedBy", SemanticType::Integer),
            ColumnSpec::new("Created", SemanticType::Timestamp),
            ColumnSpec::new("Modified", SemanticType::Timestamp),
        ],
    )
    .with_row_id_column("RowId")
    .with_object_id_column("EntityId")
    .with_key_columns(["Name"])
}

fn people_source(rows: Vec<Vec<&str>>) -> ListSource {
    ListSource::from_text(
        vec![
            ColumnSpec::new("name", SemanticType::Text),
            ColumnSpec::new("age", SemanticType::Text),
            ColumnSpec::new("weight", SemanticType::Text),
        ],
        rows,
    )
}

fn audit() -> AuditInfo {
    AuditInfo::new("container-1", 42)
}

fn database() -> Rc<MemoryDatabase> {
    let db = Rc::new(MemoryDatabase::new());
    db.create_table(people_table());
    db
}

fn loader(
    db: &Rc<MemoryDatabase>,
    ctx: &SharedContext,
    rows: Vec<Vec<&str>>,
    options: TableLoadOptions,
) -> TableLoader<ListSource> {
    TableLoader::new(
        people_source(rows),
        people_table(),
        db.clone(),
        ctx.clone(),
        &audit(),
        options,
    )
    .unwrap()
}

#[test]
fn test_import_batches_rows_and_fills_built_ins() {
    let db = database();
    let ctx = ProcessingContext::new().shared();
    let mut loader = loader(
        &db,
        &ctx,
        vec![vec!["ann", "31", "60.5"], vec!["bob", "42", "Q"]],
        TableLoadOptions::default(),
    );

    let summary = loader.run().unwrap();
    assert_eq!(summary.rows_read, 2);
    assert_eq!(summary.rows_persisted, 2);
    assert_eq!(summary.executions, 1);
    assert!(ctx.into_result().is_ok());

    assert_eq!(db.batch_execution_count(), 1);
    assert_eq!(db.execution_count(), 0);

    let rows = db.rows("People").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("RowId"), Some(&Value::Int(1)));
    assert_eq!(rows[0].get("Age"), Some(&Value::Int(31)));
    assert_eq!(rows[0].get("Weight"), Some(&Value::Float(60.5)));
    assert_eq!(rows[0].get("Container"), Some(&Value::text("container-1")));
    assert_eq!(rows[0].get("CreatedBy"), Some(&Value::Int(42)));
    assert_eq!(rows[1].get("Weight"), Some(&Value::Null));
    assert_eq!(rows[1].get("Weight_MVIndicator"), Some(&Value::text("Q")));

    // One timestamp for the whole run
    assert_eq!(rows[0].get("Created"), rows[1].get("Modified"));
    assert!(matches!(rows[0].get("EntityId"), Some(Value::Guid(_))));
    assert_ne!(rows[0].get("EntityId"), rows[1].get("EntityId"));
}

#[test]
fn test_insert_reselects_keys_one_row_per_execution() {
    let db = database();
    let ctx = ProcessingContext::new().shared();
    let mut loader = loader(
        &db,
        &ctx,
        vec![vec!["ann", "31", ""], vec!["bob", "42", ""], vec!["cat", "7", ""]],
        TableLoadOptions::default()
            .with_mode(LoadMode::Insert)
            .with_batch_size(100),
    );
    assert_eq!(loader.effective_batch_size(), 1);

    let row_id = find_column(&loader, ROW_ID_COLUMN).unwrap();
    let object_id = find_column(&loader, OBJECT_ID_COLUMN).unwrap();
    let mut ids = Vec::new();
    while loader.advance().unwrap() {
        ids.push(loader.value_at(row_id).clone());
        assert!(matches!(loader.value_at(object_id), Value::Guid(_)));
    }
    loader.close().unwrap();

    assert_eq!(ids, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    assert_eq!(db.execution_count(), 3);
    assert_eq!(db.batch_execution_count(), 0);
    // A single statement when keys are re-read
    assert_eq!(db.prepared_count(), 1);
    assert_eq!(loader.summary().executions, 3);
}

#[test]
fn test_dual_statements_alternate_per_batch() {
    let db = database();
    let ctx = ProcessingContext::new().shared();
    let mut loader = loader(
        &db,
        &ctx,
        vec![vec!["ann", "1", ""], vec!["bob", "2", ""], vec!["cat", "3", ""]],
        TableLoadOptions::default().with_batch_size(2),
    );

    let summary = loader.run().unwrap();
    assert_eq!(db.prepared_count(), 2);
    assert_eq!(db.batch_execution_count(), 2);
    assert_eq!(summary.executions, 2);
    assert_eq!(summary.rows_persisted, 3);
}

#[test]
fn test_constraint_violation_becomes_row_error() {
    let db = database();
    let ctx = ProcessingContext::new().with_fail_fast(false).shared();
    let mut loader = loader(
        &db,
        &ctx,
        vec![vec!["ann", "31", ""], vec!["ann", "32", ""], vec!["bob", "42", ""]],
        TableLoadOptions::default().with_mode(LoadMode::Insert),
    );

    let summary = loader.run().unwrap();
    assert_eq!(summary.rows_read, 3);
    assert_eq!(summary.rows_persisted, 2);
    assert_eq!(summary.rows_skipped, 1);
    assert_eq!(db.row_count("People"), 2);

    let errors = ctx.errors();
    assert_eq!(errors.row_error_count(), 1);
    let error = &errors.row_errors()[0];
    assert_eq!(error.row_number, 2);
    assert!(error.message.as_deref().unwrap_or_default().contains("Duplicate key"));
}

#[test]
fn test_rejected_batch_becomes_global_error() {
    let db = database();
    let ctx = ProcessingContext::new().with_fail_fast(false).shared();
    let mut loader = loader(
        &db,
        &ctx,
        vec![vec!["ann", "31", ""], vec!["ann", "32", ""]],
        TableLoadOptions::default(),
    );

    let summary = loader.run().unwrap();
    assert_eq!(summary.rows_persisted, 0);
    assert_eq!(summary.rows_skipped, 2);
    assert_eq!(db.row_count("People"), 0);

    let batch_error = ctx.into_result().unwrap_err();
    assert_eq!(batch_error.global_errors.len(), 1);
    assert!(batch_error.global_errors[0].message.starts_with("Rows 1-2 were not saved"));
}

#[test]
fn test_fail_fast_stops_at_first_conversion_error() {
    let db = database();
    let ctx = ProcessingContext::new().shared();
    let mut loader = loader(
        &db,
        &ctx,
        vec![vec!["ann", "31", ""], vec!["bob", "old", ""], vec!["cat", "7", ""]],
        TableLoadOptions::default().with_mode(LoadMode::Insert),
    );

    let summary = loader.run().unwrap();
    assert_eq!(summary.rows_read, 1);
    assert_eq!(db.row_count("People"), 1);

    let errors = ctx.errors();
    assert_eq!(errors.row_error_count(), 1);
    assert_eq!(errors.row_errors()[0].row_number, 2);
    assert!(errors.row_errors()[0].has_field_error("age"));
}

#[test]
fn test_rows_failing_conversion_are_not_executed() {
    let db = database();
    let ctx = ProcessingContext::new().with_fail_fast(false).shared();
    let mut loader = loader(
        &db,
        &ctx,
        vec![vec!["ann", "31", ""], vec!["bob", "old", ""], vec!["cat", "7", "heavy"]],
        TableLoadOptions::default().with_mode(LoadMode::Insert),
    );

    let summary = loader.run().unwrap();
    assert_eq!(summary.rows_read, 3);
    assert_eq!(summary.rows_persisted, 1);
    assert_eq!(summary.rows_skipped, 2);
    assert_eq!(db.execution_count(), 1);
    assert_eq!(ctx.errors().row_error_count(), 2);
}

#[test]
fn test_fatal_failure_releases_connection() {
    let db = database();
    db.fail_next_execution(DatabaseError::ConnectionFailed("socket closed".to_string()));
    let ctx = ProcessingContext::new().shared();
    let mut loader = loader(
        &db,
        &ctx,
        vec![vec!["ann", "31", ""]],
        TableLoadOptions::default().with_mode(LoadMode::Insert),
    );

    let result = loader.run();
    assert!(matches!(
        result,
        Err(LoadError::Database(DatabaseError::ConnectionFailed(_)))
    ));
    drop(loader);
    assert_eq!(db.acquired_count(), 1);
    assert_eq!(db.released_count(), 1);
}

#[test]
fn test_missing_table_fails_on_first_advance() {
    let db = Rc::new(MemoryDatabase::new());
    let ctx = ProcessingContext::new().shared();
    let mut loader = loader(&db, &ctx, vec![vec!["ann", "31", ""]], TableLoadOptions::default());

    assert!(matches!(
        loader.advance(),
        Err(LoadError::Database(DatabaseError::QueryFailed(_)))
    ));
    loader.close().unwrap();
    assert_eq!(db.released_count(), 1);
}

#[test]
fn test_merge_updates_rows_by_key() {
    let db = database();
    let ctx = ProcessingContext::new().shared();
    loader(&db, &ctx, vec![vec!["ann", "31", ""]], TableLoadOptions::default())
        .run()
        .unwrap();

    let mut merge = loader(
        &db,
        &ctx,
        vec![vec!["ann", "32", ""], vec!["bob", "40", ""]],
        TableLoadOptions::default().with_mode(LoadMode::Merge),
    );
    let row_id = find_column(&merge, ROW_ID_COLUMN).unwrap();
    assert!(merge.advance().unwrap());
    assert_eq!(merge.value_at(row_id), &Value::Int(1));
    assert!(merge.advance().unwrap());
    assert_eq!(merge.value_at(row_id), &Value::Int(2));
    assert!(!merge.advance().unwrap());
    merge.close().unwrap();

    let rows = db.rows("People").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("Age"), Some(&Value::Int(32)));
}

#[test]
fn test_caller_built_plan() {
    let db = database();
    let ctx = ProcessingContext::new().shared();
    let source = ListSource::from_text(
        vec![ColumnSpec::new("full_name", SemanticType::Text)],
        vec![vec!["ann"], vec!["bob"]],
    );

    let mut plan = TransformPlan::new(source, ctx.clone());
    plan.add_coalesce_column("Name", 1, ValueProducer::Constant(Value::text("unknown")))
        .unwrap();
    plan.add_counter_column("Age", 18);
    plan.add_built_in_columns(&audit(), &people_table(), false);

    let mut loader = TableLoader::from_plan(
        plan,
        people_table(),
        db.clone(),
        ctx.clone(),
        TableLoadOptions::default(),
    )
    .unwrap();
    loader.run().unwrap();

    let rows = db.rows("People").unwrap();
    assert_eq!(rows[0].get("Name"), Some(&Value::text("ann")));
    assert_eq!(rows[0].get("Age"), Some(&Value::Int(18)));
    assert_eq!(rows[1].get("Age"), Some(&Value::Int(19)));
}

#[test]
fn test_builder_from_config() {
    let config = LoadConfig::parse(
        r#"
[load]
fail_fast = false
batch_size = 1
mode = "insert"
"#,
    )
    .unwrap();

    let db = database();
    let ctx = ProcessingContext::from_config(&config).shared();
    let source = |_: &SharedContext| -> data_load_sdk::iterator::LoadResult<Box<dyn RowCursor>> {
        Ok(Box::new(people_source(vec![
            vec!["ann", "31", ""],
            vec!["bob", "x", ""],
            vec!["cat", "5", ""],
        ])))
    };
    let builder = TableLoadBuilder::new(source, people_table(), db.clone(), audit())
        .with_options(TableLoadOptions::from_config(&config));

    let mut cursor = LoggingCursor::new(builder.build(&ctx).unwrap());
    let mut rows = 0;
    while cursor.advance().unwrap() {
        rows += 1;
    }
    cursor.close().unwrap();

    assert_eq!(rows, 3);
    assert_eq!(db.row_count("People"), 2);
    assert_eq!(db.execution_count(), 2);
    assert_eq!(db.released_count(), 1);
    assert_eq!(ctx.errors().row_error_count(), 1);
}

#[test]
fn test_source_indicator_companion_is_bound_once() {
    let db = database();
    let ctx = ProcessingContext::new().shared();
    let source = ListSource::from_text(
        vec![
            ColumnSpec::new("name", SemanticType::Text),
            ColumnSpec::new("weight", SemanticType::Text),
            ColumnSpec::new("weight_MVIndicator", SemanticType::Text),
        ],
        vec![vec!["ann", "Q", ""], vec!["bob", "60.5", "N"]],
    );
    let mut loader = TableLoader::new(
        source,
        people_table(),
        db.clone(),
        ctx.clone(),
        &audit(),
        TableLoadOptions::default(),
    )
    .unwrap();
    assert!(find_column(&loader, "Weight").is_some());
    assert!(find_column(&loader, "Weight_MVIndicator").is_none());

    let summary = loader.run().unwrap();
    assert_eq!(summary.rows_persisted, 2);
    assert!(ctx.into_result().is_ok());

    let rows = db.rows("People").unwrap();
    assert_eq!(rows[0].get("Weight"), Some(&Value::Null));
    assert_eq!(rows[0].get("Weight_MVIndicator"), Some(&Value::text("Q")));
    assert_eq!(rows[1].get("Weight"), Some(&Value::Float(60.5)));
    assert_eq!(rows[1].get("Weight_MVIndicator"), Some(&Value::text("N")));
}

#[test]
fn test_cancelled_batch_reports_queued_rows() {
    let db = database();
    let ctx = ProcessingContext::new()
        .with_fail_fast(false)
        .with_max_row_errors(1)
        .shared();
    let mut loader = loader(
        &db,
        &ctx,
        vec![
            vec!["ann", "1", ""],
            vec!["bob", "2", ""],
            vec!["cy", "x", ""],
            vec!["dan", "y", ""],
            vec!["eve", "5", ""],
        ],
        TableLoadOptions::default().with_mode(LoadMode::Import),
    );

    let summary = loader.run().unwrap();
    assert_eq!(summary.rows_read, 3);
    assert_eq!(summary.rows_persisted, 0);
    assert_eq!(summary.rows_skipped, 3);
    assert_eq!(summary.rows_read, summary.rows_persisted + summary.rows_skipped);
    assert_eq!(db.row_count("People"), 0);
    assert_eq!(db.batch_execution_count(), 0);
    assert_eq!(ctx.errors().row_error_count(), 2);

    let batch_error = ctx.into_result().unwrap_err();
    assert_eq!(batch_error.global_errors.len(), 1);
    assert!(batch_error.global_errors[0].message.starts_with("Rows 1-2 were not saved"));
}

#[test]
fn test_rejected_merge_keeps_existing_row() {
    let mut table = people_table();
    table.columns[3] = ColumnSpec::new("Age", SemanticType::Integer).not_null();
    let db = Rc::new(MemoryDatabase::new());
    db.create_table(table.clone());
    let ctx = ProcessingContext::new().with_fail_fast(false).shared();

    let load = |rows: Vec<Vec<&str>>, mode: LoadMode| {
        let mut plan = TransformPlan::new(people_source(rows), ctx.clone());
        plan.add_convert_column(ColumnSpec::new("Name", SemanticType::Text), 1, false)
            .unwrap();
        plan.add_convert_column(ColumnSpec::new("Age", SemanticType::Integer), 2, false)
            .unwrap();
        TableLoader::from_plan(
            plan,
            table.clone(),
            db.clone(),
            ctx.clone(),
            TableLoadOptions::default().with_mode(mode),
        )
        .unwrap()
        .run()
        .unwrap()
    };

    load(vec![vec!["ann", "31", ""]], LoadMode::Import);
    let summary = load(vec![vec!["ann", "", ""], vec!["bob", "40", ""]], LoadMode::Merge);
    assert_eq!(summary.rows_persisted, 1);
    assert_eq!(summary.rows_skipped, 1);

    let errors = ctx.errors();
    assert_eq!(errors.row_error_count(), 1);
    assert_eq!(errors.row_errors()[0].row_number, 1);
    drop(errors);

    let rows = db.rows("People").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("Name"), Some(&Value::text("ann")));
    assert_eq!(rows[0].get("Age"), Some(&Value::Int(31)));
}

fn remap_load(strict: bool) -> (Rc<MemoryDatabase>, SharedContext) {
    let db = database();
    let ctx = ProcessingContext::new().with_fail_fast(false).shared();
    let source = ListSource::from_text(
        vec![ColumnSpec::new("name", SemanticType::Text)],
        vec![vec!["a"], vec!["z"], vec!["b"]],
    );
    let dictionary = HashMap::from([
        ("a".to_string(), Value::text("ann")),
        ("b".to_string(), Value::text("bob")),
    ]);

    let mut plan = TransformPlan::new(source, ctx.clone());
    plan.add_remap_column(1, dictionary, strict).unwrap();
    plan.add_built_in_columns(&audit(), &people_table(), false);
    TableLoader::from_plan(
        plan,
        people_table(),
        db.clone(),
        ctx.clone(),
        TableLoadOptions::default(),
    )
    .unwrap()
    .run()
    .unwrap();
    (db, ctx)
}

#[test]
fn test_strict_remap_rejects_unknown_codes() {
    let (db, ctx) = remap_load(true);

    let names: Vec<Option<Value>> = db
        .rows("People")
        .unwrap()
        .iter()
        .map(|row| row.get("Name").cloned())
        .collect();
    assert_eq!(names, vec![Some(Value::text("ann")), Some(Value::text("bob"))]);

    let errors = ctx.errors();
    assert_eq!(errors.row_error_count(), 1);
    assert_eq!(errors.row_errors()[0].row_number, 2);
    assert!(errors.row_errors()[0].has_field_error("name"));
}

#[test]
fn test_lenient_remap_passes_unknown_codes_through() {
    let (db, ctx) = remap_load(false);

    let names: Vec<Option<Value>> = db
        .rows("People")
        .unwrap()
        .iter()
        .map(|row| row.get("Name").cloned())
        .collect();
    assert_eq!(
        names,
        vec![
            Some(Value::text("ann")),
            Some(Value::text("z")),
            Some(Value::text("bob"))
        ]
    );
    assert!(ctx.into_result().is_ok());
}
