//! Runs one admitted query inside a transaction that is always rolled back.

use crate::backend::{DriverError, ResultSet, SandboxTransaction};
use crate::error::ExecutionError;
use crate::logging::Timer;
use crate::pool::ConnectorChain;
use crate::translate::{time_budget_exceeded, translate};
use log::{debug, error, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

pub const PUBLIC_SCHEMA: &str = "public";

/// Column metadata as reported to API clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldInfo {
    pub name: String,
    #[serde(rename = "dataTypeID")]
    pub data_type_id: Option<u32>,
    pub data_type: String,
}

/// A normalized result set. `columns` follows the driver's field order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub row_count: usize,
    pub rows: Vec<Map<String, Value>>,
    pub columns: Vec<String>,
    pub fields: Vec<FieldInfo>,
}

impl From<ResultSet> for ExecutionResult {
    fn from(set: ResultSet) -> Self {
        let columns: Vec<String> = set.fields.iter().map(|f| f.name.clone()).collect();
        let rows: Vec<Map<String, Value>> = set
            .rows
            .into_iter()
            .map(|values| columns.iter().cloned().zip(values).collect())
            .collect();
        let fields = set
            .fields
            .into_iter()
            .map(|f| FieldInfo {
                name: f.name,
                data_type_id: f.type_oid,
                data_type: f.type_name,
            })
            .collect();

        Self {
            row_count: rows.len(),
            rows,
            columns,
            fields,
        }
    }
}

/// Strip everything outside `[A-Za-z0-9_]`. The result is the only text
/// interpolated into SQL by this crate.
pub fn sanitize_schema_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

pub struct SandboxExecutor {
    chain: ConnectorChain,
    statement_timeout: Duration,
}

impl SandboxExecutor {
    pub fn new(chain: ConnectorChain, statement_timeout: Duration) -> Self {
        Self {
            chain,
            statement_timeout,
        }
    }

    pub fn statement_timeout(&self) -> Duration {
        self.statement_timeout
    }

    /// Execute `query` scoped to `schema_name`. The query must already have
    /// passed validation.
    pub async fn execute(
        &self,
        query: &str,
        schema_name: &str,
    ) -> Result<ExecutionResult, ExecutionError> {
        let timer = Timer::start();
        let (mut tx, via) = self.chain.begin().await.map_err(|err| report(&err))?;

        let outcome = self.run_scoped(tx.as_mut(), query, schema_name).await;

        // Rollback consumes the transaction and releases the connection.
        // Nothing in this crate ever commits.
        if let Err(err) = tx.rollback().await {
            error!("error rolling back sandbox transaction: {err}");
        }

        match outcome {
            Ok(set) => {
                let result = ExecutionResult::from(set);
                debug!(
                    "query complete via {via} pool ({}ms, {} rows)",
                    timer.elapsed_ms(),
                    result.row_count
                );
                Ok(result)
            }
            Err(err) => Err(report(&err)),
        }
    }

    /// Like [`execute`](Self::execute), bounded by a caller deadline. When the
    /// deadline fires the in-flight transaction is dropped, which rolls it
    /// back and returns its connection.
    pub async fn execute_with_deadline(
        &self,
        query: &str,
        schema_name: &str,
        deadline: Option<Duration>,
    ) -> Result<ExecutionResult, ExecutionError> {
        match deadline {
            Some(limit) => tokio::time::timeout(limit, self.execute(query, schema_name))
                .await
                .unwrap_or_else(|_| {
                    warn!("query abandoned after caller deadline of {}ms", limit.as_millis());
                    Err(time_budget_exceeded())
                }),
            None => self.execute(query, schema_name).await,
        }
    }

    async fn run_scoped(
        &self,
        tx: &mut dyn SandboxTransaction,
        query: &str,
        schema_name: &str,
    ) -> Result<ResultSet, DriverError> {
        let schema = resolve_schema(tx, schema_name).await?;

        let search_path = if schema == PUBLIC_SCHEMA {
            "SET LOCAL search_path TO public".to_string()
        } else {
            format!("SET LOCAL search_path TO \"{schema}\", public")
        };
        tx.apply_setting(&search_path).await?;
        tx.apply_setting(&format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout.as_millis()
        ))
        .await?;

        tx.fetch_positional(query).await
    }
}

/// Unknown or unusable schema names fall back to `public`.
async fn resolve_schema(
    tx: &mut dyn SandboxTransaction,
    schema_name: &str,
) -> Result<String, DriverError> {
    let sanitized = sanitize_schema_name(schema_name);
    if sanitized.is_empty() {
        warn!("schema name {schema_name:?} has no usable characters, using public schema");
        return Ok(PUBLIC_SCHEMA.to_string());
    }
    if !tx.schema_exists(&sanitized).await? {
        warn!("schema {sanitized} not found, using public schema");
        return Ok(PUBLIC_SCHEMA.to_string());
    }
    Ok(sanitized)
}

fn report(err: &DriverError) -> ExecutionError {
    let translated = translate(err);
    if translated.category.is_infrastructure() {
        warn!("sandbox infrastructure failure ({}): {err}", translated.category);
    } else {
        debug!("query rejected by database: {translated}");
    }
    translated
}
