//! Column transformation stage
//!
//! A [`TransformPlan`] declares the output columns and the [`ValueProducer`]
//! computing each one; [`TransformPlan::into_cursor`] turns it into a
//! [`ColumnTransformer`] that evaluates the producers row by row.
//!
//! Conversion failures never abort a row: they are recorded as field errors
//! against the column, which is left `Null`, and the remaining columns are
//! still computed. Any other producer failure is fatal.

pub mod builtin;
pub mod convert;
pub mod plan;
pub mod producer;

pub use builtin::{AuditInfo, BuiltInColumn};
pub use convert::ConversionError;
pub use plan::TransformPlan;
pub use producer::{ProduceError, RowView, ValueProducer};

use super::{
    LoadError, LoadResult, MapAccess, Restartable, RowCursor, SharedContext, current_row_number,
    row_map,
};
use crate::models::{ColumnSpec, Value};
use crate::validation::RowError;

/// Message recorded when a non-nullable column has no value
pub const MISSING_REQUIRED_VALUE: &str = "Missing value for required property";

/// Cursor computing output columns from a source cursor
pub struct ColumnTransformer<C> {
    input: C,
    context: SharedContext,
    columns: Box<[ColumnSpec]>,
    producers: Vec<ValueProducer>,
    row: Vec<Value>,
    row_error: Option<RowError>,
    stopped: bool,
}

impl<C: RowCursor> ColumnTransformer<C> {
    pub(crate) fn new(
        input: C,
        context: SharedContext,
        columns: Vec<ColumnSpec>,
        producers: Vec<ValueProducer>,
    ) -> Self {
        Self {
            input,
            context,
            columns: columns.into_boxed_slice(),
            producers,
            row: Vec::new(),
            row_error: None,
            stopped: false,
        }
    }

    /// The run context
    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    /// Errors found in the current row, if any
    pub fn current_row_error(&self) -> Option<&RowError> {
        self.row_error.as_ref()
    }

    /// Index of an output column by name (case-insensitive)
    pub fn find_output(&self, name: &str) -> Option<usize> {
        (1..self.columns.len()).find(|&i| self.columns[i].is_named(name))
    }

    fn evaluate_row(&mut self) -> LoadResult<RowError> {
        if self.row.is_empty() {
            self.row = vec![Value::Null; self.columns.len()];
        } else {
            self.row.fill(Value::Null);
        }

        let mut row_error = RowError::new(current_row_number(&self.input));
        for index in 0..self.producers.len() {
            let view = RowView {
                input: &self.input,
                output: &self.row[..index],
                context: &self.context,
            };
            match self.producers[index].produce(&view) {
                Ok(value) => self.row[index] = value,
                Err(ProduceError::Conversion(error)) => {
                    row_error.add_field_error(self.columns[index].name.clone(), error.to_string());
                }
                Err(ProduceError::Fatal(error)) => return Err(error),
            }
        }

        for (column, value) in self.columns.iter().zip(&self.row).skip(1) {
            if !column.nullable && value.is_null() && !row_error.has_field_error(&column.name) {
                row_error.add_field_error(column.name.clone(), MISSING_REQUIRED_VALUE);
            }
        }
        Ok(row_error)
    }
}

impl<C: RowCursor> RowCursor for ColumnTransformer<C> {
    fn column_count(&self) -> usize {
        self.columns.len() - 1
    }

    fn column_spec(&self, index: usize) -> &ColumnSpec {
        &self.columns[index]
    }

    fn advance(&mut self) -> LoadResult<bool> {
        self.row_error = None;
        if self.stopped || !self.input.advance()? {
            self.stopped = true;
            return Ok(false);
        }

        let row_error = self.evaluate_row()?;
        if !row_error.is_empty() {
            tracing::debug!(
                "Row {} has {} field error(s)",
                row_error.row_number,
                row_error.field_errors.len()
            );
            self.context.record_row_error(row_error.clone());
            self.row_error = Some(row_error);
        }

        if self.context.should_cancel() {
            self.stopped = true;
            return Ok(false);
        }
        Ok(true)
    }

    fn value_at(&self, index: usize) -> &Value {
        &self.row[index]
    }

    fn close(&mut self) -> LoadResult<()> {
        self.stopped = true;
        self.input.close()
    }

    fn as_restartable(&mut self) -> Option<&mut dyn Restartable> {
        if self.input.as_restartable().is_some() {
            Some(self)
        } else {
            None
        }
    }

    fn as_map_access(&self) -> Option<&dyn MapAccess> {
        Some(self)
    }
}

impl<C: RowCursor> Restartable for ColumnTransformer<C> {
    fn restart(&mut self) -> LoadResult<()> {
        let Some(input) = self.input.as_restartable() else {
            return Err(LoadError::Unsupported(
                "source cursor cannot restart".to_string(),
            ));
        };
        input.restart()?;
        for producer in &mut self.producers {
            producer.reset();
        }
        self.row_error = None;
        self.stopped = false;
        Ok(())
    }
}

impl<C: RowCursor> MapAccess for ColumnTransformer<C> {
    fn current_map(&self) -> std::collections::BTreeMap<String, Value> {
        row_map(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterator::{ListSource, ProcessingContext};
    use crate::models::SemanticType;
    use uuid::Uuid;

    fn scenario_source() -> (ListSource, Vec<String>) {
        let guids: Vec<String> = (0..3).map(|_| Uuid::new_v4().to_string()).collect();
        let source = ListSource::from_text(
            vec![
                ColumnSpec::new("IntNotNull", SemanticType::Text),
                ColumnSpec::new("Text", SemanticType::Text),
                ColumnSpec::new("EntityId", SemanticType::Text),
                ColumnSpec::new("Int", SemanticType::Text),
            ],
            vec![
                vec!["1".to_string(), "one".into(), guids[0].clone(), "".into()],
                vec!["2".to_string(), "two".into(), guids[1].clone(), "/N".into()],
                vec!["3".to_string(), "three".into(), guids[2].clone(), "3".into()],
                vec!["4".to_string(), "four".into(), "".into(), "4".into()],
            ],
        );
        (source, guids)
    }

    fn drain<C: RowCursor>(cursor: &mut C, column: usize) -> Vec<Value> {
        let mut values = Vec::new();
        while cursor.advance().unwrap() {
            values.push(cursor.value_at(column).clone());
        }
        values
    }

    #[test]
    fn test_convert_only_column() {
        let (source, _) = scenario_source();
        let mut plan = TransformPlan::new(source, ProcessingContext::new().shared());
        plan.add_convert_column(ColumnSpec::new("IntNotNull", SemanticType::Integer), 1, false)
            .unwrap();
        let mut cursor = plan.into_cursor();
        assert_eq!(cursor.column_count(), 1);

        for expected in 1..=4 {
            assert!(cursor.advance().unwrap());
            assert_eq!(cursor.value_at(0), &Value::Int(expected));
            assert_eq!(cursor.value_at(1), &Value::Int(expected));
        }
        assert!(!cursor.advance().unwrap());
        assert!(!cursor.advance().unwrap());
    }

    #[test]
    fn test_select_all_then_convert() {
        let (source, _) = scenario_source();
        let ctx = ProcessingContext::new().shared();
        let mut plan = TransformPlan::new(source, ctx.clone());
        plan.select_all();
        let index = plan
            .add_convert_column(ColumnSpec::new("IntNotNull", SemanticType::Integer), 1, false)
            .unwrap();
        let mut cursor = plan.into_cursor();

        assert_eq!(cursor.column_count(), 5);
        assert_eq!(
            drain(&mut cursor, index),
            vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)]
        );
        assert!(!ctx.has_errors());
    }

    #[test]
    fn test_coalesce_generates_identifier_for_blank() {
        let (source, guids) = scenario_source();
        let mut plan = TransformPlan::new(source, ProcessingContext::new().shared());
        plan.add_coalesce_column("IntNotNull", 3, ValueProducer::GenerateIdentifier)
            .unwrap();
        let mut cursor = plan.into_cursor();

        let values = drain(&mut cursor, 1);
        assert_eq!(values.len(), 4);
        for (value, guid) in values.iter().zip(&guids) {
            assert_eq!(value, &Value::text(guid.as_str()));
        }
        assert!(matches!(values[3], Value::Guid(_)));
    }

    #[test]
    fn test_conversion_failure_fail_fast() {
        let (source, _) = scenario_source();
        let ctx = ProcessingContext::new().shared();
        let mut plan = TransformPlan::new(source, ctx.clone());
        plan.add_convert_column(ColumnSpec::new("Text", SemanticType::Integer), 2, false)
            .unwrap();
        let mut cursor = plan.into_cursor();

        assert!(!cursor.advance().unwrap());
        assert_eq!(ctx.errors().row_error_count(), 1);
        assert!(!cursor.advance().unwrap());
    }

    #[test]
    fn test_conversion_failure_verbose_reports_every_row() {
        let (source, _) = scenario_source();
        let ctx = ProcessingContext::new()
            .with_fail_fast(false)
            .with_verbose(true)
            .shared();
        let mut plan = TransformPlan::new(source, ctx.clone());
        plan.add_convert_column(ColumnSpec::new("Text", SemanticType::Integer), 2, false)
            .unwrap();
        let mut cursor = plan.into_cursor();

        assert_eq!(drain(&mut cursor, 1), vec![Value::Null; 4]);
        assert_eq!(ctx.errors().row_error_count(), 4);
        assert_eq!(ctx.errors().field_error_count(), 4);
    }

    #[test]
    fn test_repeated_field_errors_are_deduplicated() {
        let (source, _) = scenario_source();
        let ctx = ProcessingContext::new().with_fail_fast(false).shared();
        let mut plan = TransformPlan::new(source, ctx.clone());
        plan.add_convert_column(ColumnSpec::new("Text", SemanticType::Integer), 2, false)
            .unwrap();
        let mut cursor = plan.into_cursor();

        assert_eq!(drain(&mut cursor, 1).len(), 4);
        assert_eq!(ctx.errors().row_error_count(), 4);
        assert_eq!(ctx.errors().field_error_count(), 1);
    }

    #[test]
    fn test_fail_fast_stops_before_first_failing_row() {
        let source = ListSource::from_text(
            vec![ColumnSpec::new("N", SemanticType::Text)],
            vec![vec!["1"], vec!["2"], vec!["x"], vec!["4"]],
        );
        let ctx = ProcessingContext::new().shared();
        let mut plan = TransformPlan::new(source, ctx.clone());
        plan.add_convert_column(ColumnSpec::new("N", SemanticType::Integer), 1, false)
            .unwrap();
        let mut cursor = plan.into_cursor();

        assert_eq!(drain(&mut cursor, 1), vec![Value::Int(1), Value::Int(2)]);
        let errors = ctx.errors();
        assert_eq!(errors.row_errors()[0].row_number, 3);
        assert_eq!(errors.row_errors()[0].field_errors[0].field, "N");
    }

    #[test]
    fn test_max_row_errors_stops_non_fail_fast_run() {
        let source = ListSource::from_text(
            vec![ColumnSpec::new("N", SemanticType::Text)],
            vec![vec!["a"], vec!["b"], vec!["c"], vec!["d"]],
        );
        let ctx = ProcessingContext::new()
            .with_fail_fast(false)
            .with_max_row_errors(2)
            .shared();
        let mut plan = TransformPlan::new(source, ctx.clone());
        plan.add_convert_column(ColumnSpec::new("N", SemanticType::Integer), 1, false)
            .unwrap();
        let mut cursor = plan.into_cursor();

        assert_eq!(drain(&mut cursor, 1).len(), 2);
        assert_eq!(ctx.errors().row_error_count(), 3);
    }

    #[test]
    fn test_pass_through_is_unmodified() {
        let (mut reference, _) = scenario_source();
        let (source, _) = scenario_source();
        let mut plan = TransformPlan::new(source, ProcessingContext::new().shared());
        plan.select_all();
        let mut cursor = plan.into_cursor();

        // fresh guids per call, so compare only the stable columns
        while cursor.advance().unwrap() {
            assert!(reference.advance().unwrap());
            for index in [0, 1, 2, 4] {
                assert_eq!(cursor.value_at(index), reference.value_at(index));
            }
        }
        assert!(!reference.advance().unwrap());
    }

    #[test]
    fn test_not_null_column_requires_value() {
        let source = ListSource::from_text(
            vec![ColumnSpec::new("Code", SemanticType::Text)],
            vec![vec!["A"], vec![" "]],
        );
        let ctx = ProcessingContext::new().with_fail_fast(false).shared();
        let mut plan = TransformPlan::new(source, ctx.clone());
        plan.add_convert_column(ColumnSpec::new("Code", SemanticType::Text).not_null(), 1, false)
            .unwrap();
        let mut cursor = plan.into_cursor();

        assert!(cursor.advance().unwrap());
        assert!(cursor.current_row_error().is_none());
        assert!(cursor.advance().unwrap());
        let error = cursor.current_row_error().unwrap();
        assert_eq!(error.row_number, 2);
        assert_eq!(error.field_errors[0].message, MISSING_REQUIRED_VALUE);
    }

    #[test]
    fn test_missing_value_conversion() {
        let source = ListSource::from_text(
            vec![
                ColumnSpec::new("Weight", SemanticType::Text),
                ColumnSpec::new("Weight_MVIndicator", SemanticType::Text),
            ],
            vec![vec!["61.5", ""], vec!["Q", ""], vec!["70", "N"], vec!["70", "Z"]],
        );
        let ctx = ProcessingContext::new().with_fail_fast(false).shared();
        let mut plan = TransformPlan::new(source, ctx.clone());
        let weight = plan
            .add_convert_column(ColumnSpec::new("Weight", SemanticType::Double), 1, true)
            .unwrap();
        let indicator = plan.add_missing_value_indicator_column(weight).unwrap();
        let mut cursor = plan.into_cursor();

        assert!(cursor.advance().unwrap());
        assert_eq!(cursor.value_at(weight), &Value::Float(61.5));
        assert_eq!(cursor.value_at(indicator), &Value::Null);

        assert!(cursor.advance().unwrap());
        assert_eq!(cursor.value_at(weight).split_missing(), (&Value::Null, Some("Q")));
        assert_eq!(cursor.value_at(indicator), &Value::text("Q"));

        assert!(cursor.advance().unwrap());
        assert_eq!(
            cursor.value_at(weight).split_missing(),
            (&Value::Float(70.0), Some("N"))
        );

        assert!(cursor.advance().unwrap());
        assert!(cursor.current_row_error().is_some());
        assert_eq!(ctx.errors().row_error_count(), 1);
    }

    #[test]
    fn test_built_in_columns_appear_once() {
        let table = crate::models::TableSchema::new(
            "t",
            vec![
                ColumnSpec::new("Created", SemanticType::Timestamp),
                ColumnSpec::new("Modified", SemanticType::Timestamp),
                ColumnSpec::new("EntityId", SemanticType::Guid),
            ],
        );
        let (source, _) = scenario_source();
        let mut plan = TransformPlan::new(source, ProcessingContext::new().shared());
        plan.select_all();
        let audit = AuditInfo::new("c-1", 7);
        plan.add_built_in_columns(&audit, &table, false);
        plan.add_built_in_columns(&audit, &table, false);
        let mut cursor = plan.into_cursor();

        let names: Vec<&str> = (1..=cursor.column_count())
            .map(|i| cursor.column_spec(i).name.as_str())
            .collect();
        assert_eq!(names.iter().filter(|n| n.eq_ignore_ascii_case("entityid")).count(), 1);
        assert_eq!(cursor.column_count(), 6);

        let created = cursor.find_output("Created").unwrap();
        let modified = cursor.find_output("Modified").unwrap();
        let entity = cursor.find_output("EntityId").unwrap();
        let mut seen = Vec::new();
        while cursor.advance().unwrap() {
            assert_eq!(cursor.value_at(created), cursor.value_at(modified));
            assert!(matches!(cursor.value_at(entity), Value::Guid(_)));
            seen.push(cursor.value_at(entity).clone());
        }
        seen.dedup();
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_restart_resets_counters() {
        let source = ListSource::from_text(
            vec![ColumnSpec::new("Name", SemanticType::Text)],
            vec![vec!["a"], vec!["b"]],
        );
        let mut plan = TransformPlan::new(source, ProcessingContext::new().shared());
        plan.select_all();
        let counter = plan.add_counter_column("Seq", 100);
        let mut cursor = plan.into_cursor();

        assert_eq!(drain(&mut cursor, counter), vec![Value::Int(100), Value::Int(101)]);
        cursor.as_restartable().unwrap().restart().unwrap();
        assert_eq!(drain(&mut cursor, counter), vec![Value::Int(100), Value::Int(101)]);
    }

    #[test]
    fn test_map_access() {
        let (source, _) = scenario_source();
        let mut plan = TransformPlan::new(source, ProcessingContext::new().shared());
        plan.add_passthrough_column(2).unwrap();
        let mut cursor = plan.into_cursor();
        assert!(cursor.advance().unwrap());
        let map = cursor.as_map_access().unwrap().current_map();
        assert_eq!(map.get("Text"), Some(&Value::text("one")));
    }

    #[test]
    fn test_fatal_producer_error_propagates() {
        let (source, _) = scenario_source();
        let mut plan = TransformPlan::new(source, ProcessingContext::new().shared());
        plan.add_column(
            ColumnSpec::new("Broken", SemanticType::Text),
            ValueProducer::custom(|_| {
                Err(ProduceError::Fatal(LoadError::Producer {
                    column: "Broken".to_string(),
                    message: "lookup service unavailable".to_string(),
                }))
            }),
        )
        .unwrap();
        let mut cursor = plan.into_cursor();
        assert!(matches!(cursor.advance(), Err(LoadError::Producer { .. })));
    }
}
