//! Mutable configuration of a column transformation

use chrono::Utc;
use std::collections::HashMap;
use std::rc::Rc;

use super::builtin::{AuditInfo, BuiltInColumn};
use super::producer::{ProduceError, RowView, ValueProducer};
use super::ColumnTransformer;
use crate::iterator::{LoadError, LoadResult, RowCursor, SharedContext, find_column};
use crate::models::{ColumnSpec, MV_INDICATOR_SUFFIX, SemanticType, TableSchema, Value};

/// Output columns of a transformation and how each one is computed.
///
/// Output column 0 always passes the source row number through. Columns are
/// evaluated in the order they are added, so a producer may only read output
/// columns added before it. The plan is consumed by [`TransformPlan::into_cursor`];
/// the resulting cursor's columns cannot change.
pub struct TransformPlan<C> {
    input: C,
    context: SharedContext,
    columns: Vec<ColumnSpec>,
    producers: Vec<ValueProducer>,
}

impl<C: RowCursor> TransformPlan<C> {
    /// Start an empty plan over `input`
    pub fn new(input: C, context: SharedContext) -> Self {
        let row_number = input.column_spec(0).clone();
        Self {
            input,
            context,
            columns: vec![row_number],
            producers: vec![ValueProducer::PassThrough { index: 0 }],
        }
    }

    /// The source cursor
    pub fn input(&self) -> &C {
        &self.input
    }

    /// Number of output columns, excluding the row number
    pub fn column_count(&self) -> usize {
        self.columns.len() - 1
    }

    /// Output column metadata
    pub fn column_spec(&self, index: usize) -> Option<&ColumnSpec> {
        self.columns.get(index)
    }

    /// Index of an output column by name (case-insensitive)
    pub fn find_output(&self, name: &str) -> Option<usize> {
        (1..self.columns.len()).find(|&i| self.columns[i].is_named(name))
    }

    /// Index of a source column by name (case-insensitive)
    pub fn find_input(&self, name: &str) -> Option<usize> {
        find_column(&self.input, name)
    }

    /// Pass every source column through
    pub fn select_all(&mut self) {
        for index in 1..=self.input.column_count() {
            let spec = self.input.column_spec(index).clone();
            self.push(spec, ValueProducer::PassThrough { index });
        }
    }

    /// Add a column computed by `producer`
    pub fn add_column(&mut self, spec: ColumnSpec, producer: ValueProducer) -> LoadResult<usize> {
        if let Some(index) = producer.input_dependency() {
            self.check_input(index)?;
        }
        if let Some(index) = producer.output_dependency() {
            self.check_output(index)?;
        }
        Ok(self.push(spec, producer))
    }

    /// Pass one source column through unchanged
    pub fn add_passthrough_column(&mut self, source_index: usize) -> LoadResult<usize> {
        self.check_input(source_index)?;
        let spec = self.input.column_spec(source_index).clone();
        Ok(self.push(spec, ValueProducer::PassThrough { index: source_index }))
    }

    /// Copy an earlier output column under another name
    pub fn add_alias_column(
        &mut self,
        name: impl Into<String>,
        output_index: usize,
    ) -> LoadResult<usize> {
        self.check_output(output_index)?;
        let spec = self.columns[output_index].renamed(name);
        Ok(self.push(spec, ValueProducer::Alias { output_index }))
    }

    /// A source column, computed by `fallback` whenever it is blank
    pub fn add_coalesce_column(
        &mut self,
        name: impl Into<String>,
        source_index: usize,
        fallback: ValueProducer,
    ) -> LoadResult<usize> {
        self.check_input(source_index)?;
        let spec = self.input.column_spec(source_index).renamed(name);
        self.add_column(
            spec,
            ValueProducer::Coalesce {
                index: source_index,
                fallback: Box::new(fallback),
            },
        )
    }

    /// Convert a source column to `spec.semantic_type`.
    ///
    /// With missing-value support, the companion indicator column is looked up
    /// in the source by the column's companion name, then by the conventional
    /// `<source name>_MVIndicator` name.
    pub fn add_convert_column(
        &mut self,
        spec: ColumnSpec,
        source_index: usize,
        with_missing_values: bool,
    ) -> LoadResult<usize> {
        self.check_input(source_index)?;
        let target = spec.semantic_type;
        if !with_missing_values {
            return Ok(self.push(
                spec,
                ValueProducer::Convert {
                    index: source_index,
                    target,
                },
            ));
        }

        let spec = if spec.missing_values_enabled && spec.missing_value_column.is_some() {
            spec
        } else {
            spec.with_missing_values()
        };
        let source_name = &self.input.column_spec(source_index).name;
        let indicator_index = spec
            .missing_value_column
            .as_deref()
            .and_then(|name| self.find_input(name))
            .or_else(|| self.find_input(&format!("{}{}", source_name, MV_INDICATOR_SUFFIX)));

        Ok(self.push(
            spec,
            ValueProducer::MissingValueConvert {
                index: source_index,
                indicator_index,
                target,
            },
        ))
    }

    /// Look a source column up in `dictionary`
    pub fn add_remap_column(
        &mut self,
        source_index: usize,
        dictionary: HashMap<String, Value>,
        strict: bool,
    ) -> LoadResult<usize> {
        self.check_input(source_index)?;
        let spec = self.input.column_spec(source_index).clone();
        Ok(self.push(
            spec,
            ValueProducer::Remap {
                index: source_index,
                dictionary: Rc::new(dictionary),
                strict,
            },
        ))
    }

    /// A column that is always NULL
    pub fn add_null_column(
        &mut self,
        name: impl Into<String>,
        semantic_type: SemanticType,
    ) -> usize {
        self.push(
            ColumnSpec::new(name, semantic_type),
            ValueProducer::Constant(Value::Null),
        )
    }

    /// A column counting rows from `start`
    pub fn add_counter_column(&mut self, name: impl Into<String>, start: i64) -> usize {
        self.push(
            ColumnSpec::new(name, SemanticType::BigInt).not_null(),
            ValueProducer::counter(start),
        )
    }

    /// Expose the indicator of a missing-value-aware output column as its own
    /// text column
    pub fn add_missing_value_indicator_column(&mut self, output_index: usize) -> LoadResult<usize> {
        self.check_output(output_index)?;
        let column = &self.columns[output_index];
        let name = column
            .missing_value_column
            .clone()
            .unwrap_or_else(|| format!("{}{}", column.name, MV_INDICATOR_SUFFIX));
        let producer = ValueProducer::custom(move |row: &RowView<'_>| {
            let value = row.output_value(output_index).ok_or_else(|| {
                ProduceError::Fatal(LoadError::Configuration(format!(
                    "Indicator of output column {} read before it was computed",
                    output_index
                )))
            })?;
            Ok(match value.split_missing() {
                (_, Some(indicator)) => Value::text(indicator),
                (_, None) => Value::Null,
            })
        });
        Ok(self.push(ColumnSpec::new(name, SemanticType::Text), producer))
    }

    /// Make sure each built-in column defined by `table` is present exactly once.
    ///
    /// A missing column is passed through from a same-named source column when
    /// `allow_pass_through` is set and one exists, otherwise it is computed
    /// from `audit`. A column that is already selected keeps its producer when
    /// pass-through is allowed and is recomputed from `audit` when it is not.
    pub fn add_built_in_columns(
        &mut self,
        audit: &AuditInfo,
        table: &TableSchema,
        allow_pass_through: bool,
    ) {
        let timestamp = audit.timestamp.unwrap_or_else(Utc::now);
        for built_in in BuiltInColumn::ALL {
            let name = built_in.name();
            let Some(target) = table.column(name) else {
                continue;
            };

            match self.find_output(name) {
                Some(index) => {
                    if !allow_pass_through {
                        self.producers[index] = built_in.producer(audit, timestamp);
                    }
                }
                None => {
                    let producer = match self.find_input(name) {
                        Some(index) if allow_pass_through => ValueProducer::PassThrough { index },
                        _ => built_in.producer(audit, timestamp),
                    };
                    self.push(target.clone(), producer);
                }
            }
        }
    }

    /// Freeze the plan into a cursor
    pub fn into_cursor(self) -> ColumnTransformer<C> {
        ColumnTransformer::new(self.input, self.context, self.columns, self.producers)
    }

    fn push(&mut self, spec: ColumnSpec, producer: ValueProducer) -> usize {
        tracing::debug!("Output column {} '{}': {:?}", self.columns.len(), spec.name, producer);
        self.columns.push(spec);
        self.producers.push(producer);
        self.columns.len() - 1
    }

    fn check_input(&self, index: usize) -> LoadResult<()> {
        if index > self.input.column_count() {
            return Err(LoadError::Configuration(format!(
                "Source column {} does not exist (source has {} columns)",
                index,
                self.input.column_count()
            )));
        }
        Ok(())
    }

    fn check_output(&self, index: usize) -> LoadResult<()> {
        if index >= self.columns.len() {
            return Err(LoadError::Configuration(format!(
                "Output column {} must be added before columns that read it",
                index
            )));
        }
        Ok(())
    }
}
