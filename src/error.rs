use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("validation: {reason}")]
    Validation { reason: String },

    #[error("config: {message}")]
    Config { message: String },

    #[error("connection: {message}")]
    Connection { message: String },

    #[error("{0}")]
    Execution(#[from] ExecutionError),

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("server: {message}")]
    Server { message: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable error taxonomy surfaced by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCategory {
    AuthFailure,
    ConnectionFailure,
    SchemaMissing,
    TableNotFound,
    ColumnNotFound,
    SyntaxError,
    ExecutionFailure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::AuthFailure => "AuthFailure",
            ErrorCategory::ConnectionFailure => "ConnectionFailure",
            ErrorCategory::SchemaMissing => "SchemaMissing",
            ErrorCategory::TableNotFound => "TableNotFound",
            ErrorCategory::ColumnNotFound => "ColumnNotFound",
            ErrorCategory::SyntaxError => "SyntaxError",
            ErrorCategory::ExecutionFailure => "ExecutionFailure",
        }
    }

    /// Infrastructure problems, as opposed to mistakes in the learner's query.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            ErrorCategory::AuthFailure | ErrorCategory::ConnectionFailure
        )
    }

    /// HTTP status the API layer answers with for this category.
    pub fn http_status(&self) -> u16 {
        if self.is_infrastructure() { 500 } else { 400 }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A categorized failure of one sandboxed execution attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{category}: {message}")]
pub struct ExecutionError {
    pub category: ErrorCategory,
    pub message: String,
    pub retryable: bool,
}

impl ExecutionError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn http_status(&self) -> u16 {
        self.category.http_status()
    }
}
