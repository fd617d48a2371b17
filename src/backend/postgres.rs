use crate::backend::{
    Connector, DriverError, DriverErrorKind, FieldMeta, ResultSet, SandboxTransaction,
};
use async_trait::async_trait;
use serde_json::Value;
use log::warn;
use sqlx::postgres::{PgColumn, PgPool, PgRow, Postgres};
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::types::{Decimal, Uuid};
use sqlx::{
    Column, ConnectOptions, Connection, Executor, Row, Statement, Transaction, TypeInfo,
    ValueRef,
};

const SCHEMA_EXISTS_SQL: &str =
    "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_namespace WHERE nspname = $1)";

/// Opens sandbox transactions on one sqlx pool.
pub struct PgConnector {
    label: String,
    pool: PgPool,
}

impl PgConnector {
    pub fn new(label: impl Into<String>, pool: PgPool) -> Self {
        Self {
            label: label.into(),
            pool,
        }
    }

    /// sqlx keeps retrying a refused connect until the acquire timeout and
    /// then reports `PoolTimedOut`, which hides the refusal from the fallback
    /// policy. While the pool holds no connections, one direct connect
    /// attempt classifies the server's answer first.
    async fn check_reachable(&self) -> Result<(), DriverError> {
        if self.pool.size() > 0 {
            return Ok(());
        }

        let options = self.pool.connect_options();
        let attempt = tokio::time::timeout(
            self.pool.options().get_acquire_timeout(),
            options.connect(),
        )
        .await;
        match attempt {
            Ok(Ok(conn)) => {
                let _ = conn.close().await;
                Ok(())
            }
            Ok(Err(err)) => {
                let err = DriverError::from(err);
                warn!("{} pool cannot open a connection: {}", self.label, err);
                Err(err)
            }
            // No answer yet; the pool's own acquire timeout decides.
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl Connector for PgConnector {
    fn label(&self) -> &str {
        &self.label
    }

    async fn begin(&self) -> Result<Box<dyn SandboxTransaction>, DriverError> {
        self.check_reachable().await?;
        // Pool::begin owns the checked-out connection; dropping the
        // transaction queues a ROLLBACK and hands the connection back.
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgSandboxTransaction { tx }))
    }
}

pub struct PgSandboxTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SandboxTransaction for PgSandboxTransaction {
    async fn schema_exists(&mut self, schema: &str) -> Result<bool, DriverError> {
        let exists = sqlx::query_scalar::<_, bool>(SCHEMA_EXISTS_SQL)
            .bind(schema)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(exists)
    }

    async fn apply_setting(&mut self, statement: &str) -> Result<(), DriverError> {
        let conn: &mut sqlx::PgConnection = &mut self.tx;
        conn.execute(sqlx::raw_sql(statement)).await?;
        Ok(())
    }

    async fn fetch_positional(&mut self, sql: &str) -> Result<ResultSet, DriverError> {
        // A named statement prepared under another assignment's search_path
        // would be reused by text and fail with "cached plan must not change
        // result type", so every execution starts from an empty cache.
        self.tx.clear_cached_statements().await?;

        // Preparing first gives field metadata even when no rows come back.
        // The extended protocol also refuses more than one statement.
        let statement = (&mut *self.tx).prepare(sql).await?;
        let fields: Vec<FieldMeta> = statement.columns().iter().map(field_meta).collect();

        let pg_rows = sqlx::query(sql)
            .persistent(false)
            .fetch_all(&mut *self.tx)
            .await?;
        let mut rows = Vec::with_capacity(pg_rows.len());
        for row in &pg_rows {
            let mut values = Vec::with_capacity(fields.len());
            for (index, field) in fields.iter().enumerate() {
                values.push(decode_cell(row, index, &field.type_name)?);
            }
            rows.push(values);
        }

        Ok(ResultSet { fields, rows })
    }

    async fn rollback(self: Box<Self>) -> Result<(), DriverError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn field_meta(column: &PgColumn) -> FieldMeta {
    let type_info = column.type_info();
    FieldMeta {
        name: column.name().to_string(),
        type_oid: type_info.oid().map(|oid| oid.0),
        type_name: type_info.name().to_string(),
    }
}

/// Decode one cell into JSON. Numeric values become strings so no precision
/// is lost; temporal values become ISO-8601 strings.
fn decode_cell(row: &PgRow, index: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(Value::Null);
    }

    let value = match type_name {
        "BOOL" => Value::Bool(row.try_get::<bool, _>(index)?),
        "INT2" => Value::from(row.try_get::<i16, _>(index)?),
        "INT4" => Value::from(row.try_get::<i32, _>(index)?),
        "INT8" => Value::from(row.try_get::<i64, _>(index)?),
        "FLOAT4" => Value::from(f64::from(row.try_get::<f32, _>(index)?)),
        "FLOAT8" => Value::from(row.try_get::<f64, _>(index)?),
        "NUMERIC" => Value::String(row.try_get::<Decimal, _>(index)?.to_string()),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => {
            Value::String(row.try_get::<String, _>(index)?)
        }
        "UUID" => Value::String(row.try_get::<Uuid, _>(index)?.to_string()),
        "DATE" => Value::String(row.try_get::<NaiveDate, _>(index)?.to_string()),
        "TIME" => Value::String(row.try_get::<NaiveTime, _>(index)?.to_string()),
        "TIMESTAMP" => Value::String(
            row.try_get::<NaiveDateTime, _>(index)?
                .format("%Y-%m-%dT%H:%M:%S%.f")
                .to_string(),
        ),
        "TIMESTAMPTZ" => Value::String(row.try_get::<DateTime<Utc>, _>(index)?.to_rfc3339()),
        "JSON" | "JSONB" => row.try_get::<Value, _>(index)?,
        _ => row
            .try_get_unchecked::<String, _>(index)
            .map(Value::String)
            .unwrap_or(Value::Null),
    };
    Ok(value)
}

impl From<sqlx::Error> for DriverError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => {
                let code = db.code().map(|c| c.into_owned());
                let kind = match code.as_deref() {
                    Some("28P01") | Some("28000") => DriverErrorKind::AuthRejected,
                    _ => DriverErrorKind::Database,
                };
                DriverError {
                    kind,
                    code,
                    message: db.message().to_string(),
                }
            }
            sqlx::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
                DriverError::new(
                    DriverErrorKind::ConnectionRefused,
                    "connection refused by database server",
                )
            }
            sqlx::Error::Io(io) => DriverError::new(
                DriverErrorKind::Connection,
                format!("i/o error talking to database: {}", io.kind()),
            ),
            sqlx::Error::PoolTimedOut => DriverError::new(
                DriverErrorKind::PoolTimedOut,
                "timed out waiting for a pooled connection",
            ),
            sqlx::Error::PoolClosed => {
                DriverError::new(DriverErrorKind::Connection, "connection pool is closed")
            }
            sqlx::Error::Tls(_) => DriverError::new(
                DriverErrorKind::Connection,
                "TLS negotiation with database failed",
            ),
            sqlx::Error::Configuration(_) => DriverError::new(
                DriverErrorKind::Connection,
                "invalid database connection configuration",
            ),
            other => DriverError::new(DriverErrorKind::Other, other.to_string()),
        }
    }
}
