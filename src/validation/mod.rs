//! Validation functionality
//!
//! Provides the error model populated while loading data:
//! - Field and row errors (recoverable, reported per row)
//! - Global and batch errors (surfaced to the top-level caller)

pub mod errors;

pub use errors::{BatchError, ErrorSink, FieldError, GlobalError, RowError};
