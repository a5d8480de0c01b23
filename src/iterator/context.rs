//! Per-run processing options and the shared error sink

use std::cell::{Ref, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;

use crate::database::LoadConfig;
use crate::validation::{BatchError, ErrorSink, GlobalError, RowError};

/// Row errors tolerated by default
pub const DEFAULT_MAX_ROW_ERRORS: usize = 1;

/// Row errors tolerated when fail-fast is disabled without an explicit limit
pub const NON_FAIL_FAST_MAX_ROW_ERRORS: usize = 1000;

/// Context shared by every stage of one pipeline instance
pub type SharedContext = Rc<ProcessingContext>;

/// Options and error sink for one pipeline run.
///
/// Options are fixed before the context is shared; the error sink is the only
/// part mutated while rows flow, always from the thread driving the pipeline.
#[derive(Debug)]
pub struct ProcessingContext {
    fail_fast: bool,
    max_row_errors: usize,
    max_row_errors_explicit: bool,
    verbose: bool,
    for_import: bool,
    missing_value_indicators: BTreeSet<String>,
    errors: RefCell<ErrorSink>,
}

impl Default for ProcessingContext {
    fn default() -> Self {
        Self {
            fail_fast: true,
            max_row_errors: DEFAULT_MAX_ROW_ERRORS,
            max_row_errors_explicit: false,
            verbose: false,
            for_import: false,
            missing_value_indicators: ["Q", "N"].into_iter().map(String::from).collect(),
            errors: RefCell::new(ErrorSink::new()),
        }
    }
}

impl ProcessingContext {
    /// Create a context with default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from the `[load]` section of a configuration
    pub fn from_config(config: &LoadConfig) -> Self {
        let mut context = Self::new()
            .with_verbose(config.load.verbose)
            .with_missing_value_indicators(config.load.missing_value_indicators.iter().cloned());
        if let Some(max) = config.load.max_row_errors {
            context = context.with_max_row_errors(max);
        }
        context.with_fail_fast(config.load.fail_fast)
    }

    /// Set the fail-fast flag.
    ///
    /// Disabling fail-fast while the row error limit is still at its default
    /// raises the limit to [`NON_FAIL_FAST_MAX_ROW_ERRORS`].
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        if !fail_fast
            && !self.max_row_errors_explicit
            && self.max_row_errors == DEFAULT_MAX_ROW_ERRORS
        {
            self.max_row_errors = NON_FAIL_FAST_MAX_ROW_ERRORS;
        }
        self
    }

    /// Set the number of row errors tolerated before the run is stopped
    pub fn with_max_row_errors(mut self, max_row_errors: usize) -> Self {
        self.max_row_errors = max_row_errors;
        self.max_row_errors_explicit = true;
        self
    }

    /// Report every failing row of a field instead of only the first
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Mark the run as a bulk import
    pub fn with_for_import(mut self, for_import: bool) -> Self {
        self.for_import = for_import;
        self
    }

    /// Replace the accepted missing-value indicators
    pub fn with_missing_value_indicators<I, S>(mut self, indicators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.missing_value_indicators = indicators
            .into_iter()
            .map(|i| i.into().trim().to_string())
            .filter(|i| !i.is_empty())
            .collect();
        self
    }

    /// Wrap the context for sharing across stages
    pub fn shared(self) -> SharedContext {
        Rc::new(self)
    }

    /// Stop at the first row with an error
    pub fn fail_fast(&self) -> bool {
        self.fail_fast
    }

    /// Row errors tolerated before the run is stopped
    pub fn max_row_errors(&self) -> usize {
        self.max_row_errors
    }

    /// Verbose field error reporting
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Whether the run is a bulk import
    pub fn for_import(&self) -> bool {
        self.for_import
    }

    /// Whether `token` is an accepted missing-value indicator
    pub fn is_missing_value_indicator(&self, token: &str) -> bool {
        self.missing_value_indicators.contains(token.trim())
    }

    /// Accepted missing-value indicators
    pub fn missing_value_indicators(&self) -> impl Iterator<Item = &str> {
        self.missing_value_indicators.iter().map(String::as_str)
    }

    /// Cooperative cancellation check consulted by downstream stages.
    ///
    /// True once errors exist and either fail-fast is set or the number of
    /// failed rows exceeds the limit.
    pub fn should_cancel(&self) -> bool {
        let errors = self.errors.borrow();
        errors.has_errors()
            && (self.fail_fast || errors.row_error_count() > self.max_row_errors)
    }

    /// Borrow the error sink
    pub fn errors(&self) -> Ref<'_, ErrorSink> {
        self.errors.borrow()
    }

    /// True if any error was recorded
    pub fn has_errors(&self) -> bool {
        self.errors.borrow().has_errors()
    }

    /// Record a row error, applying the verbose de-duplication policy
    pub fn record_row_error(&self, error: RowError) -> bool {
        self.errors.borrow_mut().add_row_error(error, self.verbose)
    }

    /// Record a global error
    pub fn record_global_error(&self, error: GlobalError) {
        tracing::debug!("Recorded global error: {}", error);
        self.errors.borrow_mut().add_global_error(error);
    }

    /// Snapshot of recorded errors, if any
    pub fn batch_error(&self) -> Option<BatchError> {
        let errors = self.errors.borrow();
        if errors.has_errors() {
            Some(errors.to_batch_error())
        } else {
            None
        }
    }

    /// `Err` with the accumulated errors, or `Ok` if the run was clean
    pub fn into_result(&self) -> Result<(), BatchError> {
        match self.batch_error() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
