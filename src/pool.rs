//! The three process-wide connection pools and the sandbox → fallback
//! connection policy.

use crate::backend::postgres::PgConnector;
use crate::backend::{Connector, DriverError, DriverErrorKind, SandboxTransaction};
use crate::config::{Credentials, DatabaseConfig};
use crate::error::SandboxError;
use crate::masking::describe_target;
use log::{debug, info, warn};
use secrecy::ExposeSecret;
use serde::Serialize;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolRole {
    /// Full privilege; catalog and administrative work.
    Primary,
    /// Restricted role used for learner queries.
    Sandbox,
    /// Primary credential, used when the sandbox role is unavailable.
    Fallback,
}

impl PoolRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolRole::Primary => "primary",
            PoolRole::Sandbox => "sandbox",
            PoolRole::Fallback => "fallback",
        }
    }

    fn application_name(&self) -> &'static str {
        match self {
            PoolRole::Primary => "sql-sandbox-app",
            PoolRole::Sandbox => "sql-sandbox-user",
            PoolRole::Fallback => "sql-sandbox-fallback",
        }
    }
}

/// Point-in-time occupancy of one pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub role: PoolRole,
    pub size: u32,
    pub idle: usize,
    pub max: u32,
}

/// Owns the primary, sandbox and fallback pools for the process lifetime.
///
/// Pools are built lazily: no connection is opened until first use or
/// [`verify`](Self::verify).
pub struct PoolManager {
    primary: PgPool,
    sandbox: PgPool,
    fallback: PgPool,
    degraded: bool,
}

impl PoolManager {
    pub fn connect_lazy(config: &DatabaseConfig) -> Self {
        let limits = &config.pools;

        let primary = PgPoolOptions::new()
            .max_connections(limits.primary_max)
            .idle_timeout(limits.primary_idle_timeout)
            .acquire_timeout(limits.connect_timeout)
            .connect_lazy_with(connect_options(&config.primary, config.require_tls, PoolRole::Primary));

        let restricted = || {
            PgPoolOptions::new()
                .max_connections(limits.restricted_max)
                .acquire_timeout(limits.connect_timeout)
        };

        let fallback_options = || {
            session_limits(
                connect_options(&config.primary, config.require_tls, PoolRole::Fallback),
                config,
            )
        };

        let fallback = restricted().connect_lazy_with(fallback_options());

        let (sandbox, degraded) = match &config.sandbox {
            Some(credentials) => {
                let options = session_limits(
                    connect_options(credentials, config.require_tls, PoolRole::Sandbox),
                    config,
                )
                .options([("search_path", "sandbox,public")]);
                info!(
                    "sandbox pool uses restricted role {}",
                    describe_target(
                        &credentials.host,
                        credentials.port,
                        &credentials.database,
                        &credentials.user
                    )
                );
                (restricted().connect_lazy_with(options), false)
            }
            None => {
                warn!(
                    "DB_SANDBOX_USER or DB_SANDBOX_PASSWORD not set; sandbox queries run as the primary user {}",
                    config.primary.user
                );
                (restricted().connect_lazy_with(fallback_options()), true)
            }
        };

        Self {
            primary,
            sandbox,
            fallback,
            degraded,
        }
    }

    /// True when the sandbox pool runs on the fallback credential.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn primary(&self) -> &PgPool {
        &self.primary
    }

    pub fn sandbox_connector(&self) -> Arc<dyn Connector> {
        Arc::new(PgConnector::new(PoolRole::Sandbox.as_str(), self.sandbox.clone()))
    }

    pub fn fallback_connector(&self) -> Arc<dyn Connector> {
        Arc::new(PgConnector::new(PoolRole::Fallback.as_str(), self.fallback.clone()))
    }

    /// Sandbox first, fallback second.
    pub fn connector_chain(&self) -> ConnectorChain {
        ConnectorChain::new(vec![self.sandbox_connector(), self.fallback_connector()])
    }

    /// Startup connectivity check. The primary pool must answer; a sandbox
    /// failure is logged and tolerated because the fallback pool covers it.
    pub async fn verify(&self) -> Result<(), SandboxError> {
        sqlx::query("SELECT 1")
            .execute(&self.primary)
            .await
            .map_err(|e| SandboxError::Connection {
                message: format!("primary database unreachable: {}", DriverError::from(e)),
            })?;
        info!("primary database connected");

        match sqlx::query_scalar::<_, String>("SHOW search_path")
            .fetch_one(&self.sandbox)
            .await
        {
            Ok(search_path) => {
                info!("sandbox database connected (search_path: {search_path})");
            }
            Err(e) => {
                let err = DriverError::from(e);
                if err.kind == DriverErrorKind::AuthRejected {
                    warn!("sandbox authentication failed; queries will use the fallback pool");
                } else {
                    warn!("sandbox connection check failed ({err}); continuing with fallback");
                }
            }
        }
        Ok(())
    }

    /// True when the primary pool can run a trivial query.
    pub async fn ping_primary(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.primary).await.is_ok()
    }

    pub fn status(&self) -> Vec<PoolStatus> {
        [
            (PoolRole::Primary, &self.primary),
            (PoolRole::Sandbox, &self.sandbox),
            (PoolRole::Fallback, &self.fallback),
        ]
        .into_iter()
        .map(|(role, pool)| PoolStatus {
            role,
            size: pool.size(),
            idle: pool.num_idle(),
            max: pool.options().get_max_connections(),
        })
        .collect()
    }

    /// Drain all pools. Checked-out connections close when returned.
    pub async fn close(&self) {
        self.sandbox.close().await;
        self.fallback.close().await;
        self.primary.close().await;
        debug!("connection pools closed");
    }
}

fn connect_options(credentials: &Credentials, require_tls: bool, role: PoolRole) -> PgConnectOptions {
    let mut options = PgConnectOptions::new()
        .host(&credentials.host)
        .port(credentials.port)
        .database(&credentials.database)
        .username(&credentials.user)
        .application_name(role.application_name())
        .ssl_mode(if require_tls {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        });
    if let Some(password) = &credentials.password {
        options = options.password(password.expose_secret());
    }
    options
}

/// Server-side limits every restricted connection starts with.
fn session_limits(options: PgConnectOptions, config: &DatabaseConfig) -> PgConnectOptions {
    options.options([
        (
            "statement_timeout",
            config.statement_timeout.as_millis().to_string(),
        ),
        (
            "idle_in_transaction_session_timeout",
            config.idle_in_transaction_timeout.as_millis().to_string(),
        ),
    ])
}

/// An ordered list of connectors. The next one is tried only when the
/// previous failure was an authentication rejection or a refused connection.
pub struct ConnectorChain {
    steps: Vec<Arc<dyn Connector>>,
}

impl ConnectorChain {
    pub fn new(steps: Vec<Arc<dyn Connector>>) -> Self {
        Self { steps }
    }

    pub fn labels(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.label()).collect()
    }

    /// Open a transaction on the first connector that accepts, returning it
    /// with that connector's label.
    pub async fn begin(&self) -> Result<(Box<dyn SandboxTransaction>, &str), DriverError> {
        for (index, step) in self.steps.iter().enumerate() {
            match step.begin().await {
                Ok(tx) => {
                    if index > 0 {
                        info!("using {} database connection", step.label());
                    }
                    return Ok((tx, step.label()));
                }
                Err(err) if err.allows_fallback() && index + 1 < self.steps.len() => {
                    warn!(
                        "{} pool connection failed ({}), trying {} pool",
                        step.label(),
                        err,
                        self.steps[index + 1].label()
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Err(DriverError::new(
            DriverErrorKind::Connection,
            "no connection pool configured",
        ))
    }
}
