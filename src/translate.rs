//! Maps driver failures onto the executor's error taxonomy.

use crate::backend::{DriverError, DriverErrorKind};
use crate::error::{ErrorCategory, ExecutionError};

pub const UNDEFINED_TABLE: &str = "42P01";
pub const UNDEFINED_COLUMN: &str = "42703";
pub const SYNTAX_ERROR: &str = "42601";
pub const QUERY_CANCELED: &str = "57014";
pub const INVALID_SCHEMA_NAME: &str = "3F000";

/// Translate a driver failure. Learner mistakes keep the server's message so
/// it can be shown as feedback; infrastructure failures get a fixed message.
pub fn translate(err: &DriverError) -> ExecutionError {
    match err.kind {
        DriverErrorKind::AuthRejected | DriverErrorKind::ConnectionRefused => ExecutionError::new(
            ErrorCategory::AuthFailure,
            "Database authentication failed for both the sandbox and fallback credentials",
        )
        .retryable(),
        DriverErrorKind::PoolTimedOut => ExecutionError::new(
            ErrorCategory::ConnectionFailure,
            "No database connection became available in time; try again shortly",
        ),
        DriverErrorKind::Connection => ExecutionError::new(
            ErrorCategory::ConnectionFailure,
            format!("Database connection failed: {}", err.message),
        ),
        DriverErrorKind::Database => translate_sqlstate(err.code.as_deref(), &err.message),
        DriverErrorKind::Other => ExecutionError::new(
            ErrorCategory::ExecutionFailure,
            format!("Query execution failed: {}", err.message),
        ),
    }
}

fn translate_sqlstate(code: Option<&str>, message: &str) -> ExecutionError {
    match code {
        Some(UNDEFINED_TABLE) => ExecutionError::new(
            ErrorCategory::TableNotFound,
            format!("Table not found: {message}. Please check the table name and schema."),
        ),
        Some(UNDEFINED_COLUMN) => ExecutionError::new(
            ErrorCategory::ColumnNotFound,
            format!("Column not found: {message}. Please check the column names."),
        ),
        Some(SYNTAX_ERROR) => ExecutionError::new(
            ErrorCategory::SyntaxError,
            format!("SQL syntax error: {message}. Please check your query syntax."),
        ),
        Some(QUERY_CANCELED) => time_budget_exceeded(),
        Some(INVALID_SCHEMA_NAME) => ExecutionError::new(
            ErrorCategory::SchemaMissing,
            format!("Schema not found: {message}"),
        ),
        _ => ExecutionError::new(
            ErrorCategory::ExecutionFailure,
            format!("Query execution failed: {message}"),
        ),
    }
}

/// The statement timeout or the caller's deadline elapsed.
pub fn time_budget_exceeded() -> ExecutionError {
    ExecutionError::new(
        ErrorCategory::ExecutionFailure,
        "Query exceeded its time budget and was cancelled",
    )
}
