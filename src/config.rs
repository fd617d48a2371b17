use crate::cli::{ConnectionArgs, ServeArgs};
use crate::error::SandboxError;
use crate::masking::{describe_target, format_optional_secret};
use directories::ProjectDirs;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_SCHEMA: &str = "sandbox";
pub const DEFAULT_STATEMENT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_IDLE_IN_TRANSACTION_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_RATE_LIMIT_MAX: u32 = 100;
pub const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 60_000;

/// Top-level application configuration.
#[derive(Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    /// Schema used when a request names no assignment.
    pub default_schema: String,
    /// Assignment id to schema name.
    pub assignments: BTreeMap<String, String>,
    pub verbose: bool,
    pub show_secrets: bool,
}

/// Everything the pool manager needs to build its three pools.
#[derive(Debug)]
pub struct DatabaseConfig {
    pub primary: Credentials,
    /// Restricted role; `None` puts the sandbox pool in degraded mode.
    pub sandbox: Option<Credentials>,
    pub require_tls: bool,
    pub pools: PoolLimits,
    pub statement_timeout: Duration,
    pub idle_in_transaction_timeout: Duration,
}

#[derive(Debug)]
pub struct Credentials {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<SecretString>,
}

#[derive(Debug, Clone)]
pub struct PoolLimits {
    pub primary_max: u32,
    pub restricted_max: u32,
    pub primary_idle_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            primary_max: 20,
            restricted_max: 10,
            primary_idle_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub rate_limit: RateLimitConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5001,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Per-client request budget for the HTTP API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests allowed per client and window; 0 turns the limit off.
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_RATE_LIMIT_MAX,
            window: Duration::from_millis(DEFAULT_RATE_LIMIT_WINDOW_MS),
        }
    }
}

// --- TOML config file structs ---

#[derive(Debug, Deserialize, Default)]
struct TomlConfig {
    #[serde(default)]
    database: TomlDatabase,
    #[serde(default)]
    sandbox: TomlSandbox,
    #[serde(default)]
    pools: TomlPools,
    #[serde(default)]
    execution: TomlExecution,
    #[serde(default)]
    server: TomlServer,
    #[serde(default)]
    assignments: BTreeMap<String, String>,
    #[serde(default)]
    verbose: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlDatabase {
    host: Option<String>,
    port: Option<u16>,
    name: Option<String>,
    user: Option<String>,
    password: Option<String>,
    password_env: Option<String>,
    require_tls: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlSandbox {
    host: Option<String>,
    port: Option<u16>,
    name: Option<String>,
    user: Option<String>,
    password: Option<String>,
    password_env: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlPools {
    primary_max: Option<u32>,
    restricted_max: Option<u32>,
    primary_idle_timeout_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlExecution {
    statement_timeout_ms: Option<u64>,
    idle_in_transaction_timeout_ms: Option<u64>,
    default_schema: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlServer {
    host: Option<String>,
    port: Option<u16>,
    rate_limit_max: Option<u32>,
    rate_limit_window_ms: Option<u64>,
}

/// A resolved config path and whether the user named it explicitly.
struct ResolvedConfigPath {
    path: PathBuf,
    /// true if user explicitly specified via --config or SQLSANDBOX_CONFIG
    explicit: bool,
}

/// Resolve the config file path: --config flag > env var > platform default.
fn resolve_config_path(cli_config: Option<&PathBuf>) -> Option<ResolvedConfigPath> {
    if let Some(path) = cli_config {
        return Some(ResolvedConfigPath { path: path.clone(), explicit: true });
    }
    if let Ok(path) = std::env::var("SQLSANDBOX_CONFIG") {
        return Some(ResolvedConfigPath { path: PathBuf::from(path), explicit: true });
    }
    ProjectDirs::from("", "", "sqlsandbox").map(|dirs| ResolvedConfigPath {
        path: dirs.config_dir().join("config.toml"),
        explicit: false,
    })
}

/// Load and parse the TOML config file (if it exists).
fn load_toml_config(resolved: Option<&ResolvedConfigPath>) -> Result<TomlConfig, SandboxError> {
    let resolved = match resolved {
        Some(r) => r,
        None => return Ok(TomlConfig::default()),
    };

    if !resolved.path.exists() {
        if resolved.explicit {
            return Err(SandboxError::Config {
                message: format!("config file not found: {}", resolved.path.display()),
            });
        }
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(&resolved.path).map_err(|e| SandboxError::Config {
        message: format!("cannot read config file {}: {}", resolved.path.display(), e),
    })?;

    toml::from_str(&content).map_err(|e| SandboxError::Config {
        message: format!("invalid config file {}: {}", resolved.path.display(), e),
    })
}

/// Treat empty strings as unset.
pub fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Read an env var, treating empty values as unset.
pub fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Resolve a password from direct value, env indirection, or env var.
fn resolve_secret(
    direct: Option<&str>,
    env_key: Option<&str>,
    fallback_env: &str,
) -> Option<SecretString> {
    if let Some(val) = non_empty(direct) {
        return Some(SecretString::from(val.to_string()));
    }
    // Env indirection (e.g., password_env = "SANDBOX_SECRET")
    if let Some(val) = non_empty(env_key).and_then(env_non_empty) {
        return Some(SecretString::from(val));
    }
    env_non_empty(fallback_env).map(SecretString::from)
}

fn rate_limit_window(window_ms: u64) -> Result<Duration, SandboxError> {
    if window_ms == 0 {
        return Err(SandboxError::Config {
            message: "rate limit window must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_millis(window_ms))
}

/// Build AppConfig from connection args, the config file and the environment.
pub fn load_from_connection_args(
    args: &ConnectionArgs,
    verbose: bool,
    show_secrets: bool,
    config_path: Option<&PathBuf>,
) -> Result<AppConfig, SandboxError> {
    let resolved_path = resolve_config_path(config_path);
    let toml_config = load_toml_config(resolved_path.as_ref())?;

    let db = &toml_config.database;

    let host = non_empty(args.host.as_deref())
        .or(non_empty(db.host.as_deref()))
        .unwrap_or("localhost")
        .to_string();

    let port = args.port.or(db.port).unwrap_or(DEFAULT_PORT);

    let database = non_empty(args.database.as_deref())
        .or(non_empty(db.name.as_deref()))
        .ok_or_else(|| SandboxError::Config {
            message: "no database name specified — use --db-name or DB_NAME".to_string(),
        })?
        .to_string();

    let user = non_empty(args.user.as_deref())
        .or(non_empty(db.user.as_deref()))
        .ok_or_else(|| SandboxError::Config {
            message: "no database user specified — use --db-user or DB_USER".to_string(),
        })?
        .to_string();

    let password = resolve_secret(
        args.password.as_deref(),
        db.password_env.as_deref(),
        "DB_PASSWORD",
    )
    .or_else(|| non_empty(db.password.as_deref()).map(|p| SecretString::from(p.to_string())));

    let primary = Credentials {
        host,
        port,
        database,
        user,
        password,
    };

    let sandbox = resolve_sandbox_credentials(args, &toml_config.sandbox, &primary);

    let pools_toml = &toml_config.pools;
    let defaults = PoolLimits::default();
    let pools = PoolLimits {
        primary_max: pools_toml.primary_max.unwrap_or(defaults.primary_max),
        restricted_max: pools_toml.restricted_max.unwrap_or(defaults.restricted_max),
        primary_idle_timeout: pools_toml
            .primary_idle_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.primary_idle_timeout),
        connect_timeout: pools_toml
            .connect_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.connect_timeout),
    };
    if pools.primary_max == 0 || pools.restricted_max == 0 {
        return Err(SandboxError::Config {
            message: "pool sizes must be at least 1".to_string(),
        });
    }

    let execution = &toml_config.execution;
    let statement_timeout_ms = args
        .statement_timeout_ms
        .or(execution.statement_timeout_ms)
        .unwrap_or(DEFAULT_STATEMENT_TIMEOUT_MS);
    if statement_timeout_ms == 0 {
        return Err(SandboxError::Config {
            message: "statement timeout must be greater than zero".to_string(),
        });
    }
    let idle_in_transaction_ms = execution
        .idle_in_transaction_timeout_ms
        .unwrap_or(DEFAULT_IDLE_IN_TRANSACTION_TIMEOUT_MS);

    let default_schema = non_empty(execution.default_schema.as_deref())
        .unwrap_or(DEFAULT_SCHEMA)
        .to_string();

    let require_tls = args.require_tls || db.require_tls.unwrap_or(false);

    let server_toml = &toml_config.server;
    let server_defaults = ServerConfig::default();
    let server = ServerConfig {
        host: non_empty(server_toml.host.as_deref())
            .map(str::to_string)
            .unwrap_or(server_defaults.host),
        port: server_toml.port.unwrap_or(server_defaults.port),
        rate_limit: RateLimitConfig {
            max_requests: server_toml
                .rate_limit_max
                .unwrap_or(server_defaults.rate_limit.max_requests),
            window: rate_limit_window(
                server_toml
                    .rate_limit_window_ms
                    .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_MS),
            )?,
        },
    };

    let verbose = verbose || toml_config.verbose.unwrap_or(false);

    Ok(AppConfig {
        database: DatabaseConfig {
            primary,
            sandbox,
            require_tls,
            pools,
            statement_timeout: Duration::from_millis(statement_timeout_ms),
            idle_in_transaction_timeout: Duration::from_millis(idle_in_transaction_ms),
        },
        server,
        default_schema,
        assignments: toml_config.assignments,
        verbose,
        show_secrets,
    })
}

/// Build AppConfig for the `serve` subcommand; bind and rate limit flags
/// override the file.
pub fn load_from_serve_args(
    args: &ServeArgs,
    verbose: bool,
    show_secrets: bool,
    config_path: Option<&PathBuf>,
) -> Result<AppConfig, SandboxError> {
    let mut config =
        load_from_connection_args(&args.connection, verbose, show_secrets, config_path)?;
    if let Some(host) = non_empty(args.bind_host.as_deref()) {
        config.server.host = host.to_string();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(max) = args.rate_limit_max {
        config.server.rate_limit.max_requests = max;
    }
    if let Some(window_ms) = args.rate_limit_window_ms {
        config.server.rate_limit.window = rate_limit_window(window_ms)?;
    }
    Ok(config)
}

/// The restricted credential counts only when both user and password resolve.
fn resolve_sandbox_credentials(
    args: &ConnectionArgs,
    sandbox: &TomlSandbox,
    primary: &Credentials,
) -> Option<Credentials> {
    let user = non_empty(args.sandbox_user.as_deref()).or(non_empty(sandbox.user.as_deref()))?;
    let password = resolve_secret(
        args.sandbox_password.as_deref(),
        sandbox.password_env.as_deref(),
        "DB_SANDBOX_PASSWORD",
    )
    .or_else(|| non_empty(sandbox.password.as_deref()).map(|p| SecretString::from(p.to_string())))?;

    Some(Credentials {
        host: non_empty(args.sandbox_host.as_deref())
            .or(non_empty(sandbox.host.as_deref()))
            .unwrap_or(&primary.host)
            .to_string(),
        port: args.sandbox_port.or(sandbox.port).unwrap_or(primary.port),
        database: non_empty(args.sandbox_database.as_deref())
            .or(non_empty(sandbox.name.as_deref()))
            .unwrap_or(&primary.database)
            .to_string(),
        user: user.to_string(),
        password: Some(password),
    })
}

impl AppConfig {
    /// Render the resolved configuration for display, secrets masked unless
    /// `show_secrets` is set.
    pub fn summary(&self) -> serde_json::Value {
        let db = &self.database;
        let credentials = |c: &Credentials| {
            serde_json::json!({
                "target": describe_target(&c.host, c.port, &c.database, &c.user),
                "password": format_optional_secret(c.password.as_ref(), self.show_secrets),
            })
        };
        serde_json::json!({
            "primary": credentials(&db.primary),
            "sandbox": db.sandbox.as_ref().map(credentials),
            "degraded_sandbox": db.sandbox.is_none(),
            "require_tls": db.require_tls,
            "pools": {
                "primary_max": db.pools.primary_max,
                "restricted_max": db.pools.restricted_max,
                "primary_idle_timeout_secs": db.pools.primary_idle_timeout.as_secs(),
                "connect_timeout_secs": db.pools.connect_timeout.as_secs(),
            },
            "statement_timeout_ms": db.statement_timeout.as_millis() as u64,
            "idle_in_transaction_timeout_ms": db.idle_in_transaction_timeout.as_millis() as u64,
            "default_schema": self.default_schema,
            "assignments": self.assignments,
            "server": format!("{}:{}", self.server.host, self.server.port),
            "rate_limit": {
                "max_requests": self.server.rate_limit.max_requests,
                "window_ms": self.server.rate_limit.window.as_millis() as u64,
            },
        })
    }
}
