pub mod postgres;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Coarse classification of a driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// The server rejected the credential (SQLSTATE 28P01 / 28000).
    AuthRejected,
    ConnectionRefused,
    /// No connection became available within the acquire timeout.
    PoolTimedOut,
    Connection,
    /// The server reported an error; `code` carries the SQLSTATE.
    Database,
    Other,
}

/// A low-level failure reported by the database driver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub code: Option<String>,
    pub message: String,
}

impl DriverError {
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    pub fn database(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Database,
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Failures on which the connector chain may try the next pool.
    pub fn allows_fallback(&self) -> bool {
        matches!(
            self.kind,
            DriverErrorKind::AuthRejected | DriverErrorKind::ConnectionRefused
        )
    }
}

/// Metadata for a single result column, in driver order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMeta {
    pub name: String,
    pub type_oid: Option<u32>,
    pub type_name: String,
}

/// Positional rows plus their field metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub fields: Vec<FieldMeta>,
    pub rows: Vec<Vec<Value>>,
}

/// One open transaction on a borrowed connection.
///
/// Dropping an implementation without calling [`rollback`](Self::rollback)
/// must still discard the transaction and return the connection.
#[async_trait]
pub trait SandboxTransaction: Send {
    async fn schema_exists(&mut self, schema: &str) -> Result<bool, DriverError>;

    /// Run a transaction-scoped `SET LOCAL` statement.
    async fn apply_setting(&mut self, statement: &str) -> Result<(), DriverError>;

    async fn fetch_positional(&mut self, sql: &str) -> Result<ResultSet, DriverError>;

    /// Roll back and release the connection.
    async fn rollback(self: Box<Self>) -> Result<(), DriverError>;
}

/// Borrows a connection from one pool and opens a transaction on it.
#[async_trait]
pub trait Connector: Send + Sync {
    fn label(&self) -> &str;

    async fn begin(&self) -> Result<Box<dyn SandboxTransaction>, DriverError>;
}
