use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "sqlsandbox",
    about = "Sandboxed SQL execution against per-assignment Postgres schemas"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short = 'c', long, global = true, env = "SQLSANDBOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log debug diagnostics to stderr
    #[arg(short = 'v', long, global = true, env = "SQLSANDBOX_VERBOSE")]
    pub verbose: bool,

    /// Disable credential masking in `config` output
    #[arg(long, global = true, env = "SQLSANDBOX_SHOW_SECRETS")]
    pub show_secrets: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP execute/validate API
    Serve(ServeArgs),

    /// Check a query against the sandbox rules without touching the database
    Validate(ValidateArgs),

    /// Run one query inside the sandbox and print the result as JSON
    Exec(ExecArgs),

    /// Verify database connectivity for all pools
    Check(ConnectionArgs),

    /// Print the resolved configuration
    Config(ConnectionArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Postgres host
    #[arg(long = "db-host", env = "DB_HOST")]
    pub host: Option<String>,

    /// Postgres port
    #[arg(long = "db-port", env = "DB_PORT")]
    pub port: Option<u16>,

    /// Database name
    #[arg(short = 'd', long = "db-name", env = "DB_NAME")]
    pub database: Option<String>,

    /// Primary (full privilege) user
    #[arg(short = 'u', long = "db-user", env = "DB_USER")]
    pub user: Option<String>,

    /// Primary user password
    #[arg(short = 'p', long = "db-password", env = "DB_PASSWORD")]
    pub password: Option<String>,

    /// Restricted sandbox role
    #[arg(long, env = "DB_SANDBOX_USER")]
    pub sandbox_user: Option<String>,

    /// Sandbox role password
    #[arg(long, env = "DB_SANDBOX_PASSWORD")]
    pub sandbox_password: Option<String>,

    /// Sandbox host (defaults to the primary host)
    #[arg(long, env = "DB_SANDBOX_HOST")]
    pub sandbox_host: Option<String>,

    /// Sandbox port (defaults to the primary port)
    #[arg(long, env = "DB_SANDBOX_PORT")]
    pub sandbox_port: Option<u16>,

    /// Sandbox database (defaults to the primary database)
    #[arg(long, env = "DB_SANDBOX_NAME")]
    pub sandbox_database: Option<String>,

    /// Require TLS for every database connection
    #[arg(long, env = "DB_REQUIRE_TLS")]
    pub require_tls: bool,

    /// Per-statement timeout in milliseconds (default: 5000)
    #[arg(short = 't', long, env = "SQLSANDBOX_STATEMENT_TIMEOUT_MS")]
    pub statement_timeout_ms: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to bind
    #[arg(long = "bind", env = "HOST")]
    pub bind_host: Option<String>,

    /// Port to listen on (default: 5001)
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Requests allowed per client IP and window, 0 disables (default: 100)
    #[arg(long, env = "RATE_LIMIT_MAX")]
    pub rate_limit_max: Option<u32>,

    /// Rate limit window in milliseconds (default: 60000)
    #[arg(long, env = "RATE_LIMIT_WINDOW_MS")]
    pub rate_limit_window_ms: Option<u64>,

    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    /// SQL query text
    pub sql: Option<String>,

    /// Read SQL from file
    #[arg(short = 'f', long = "file", conflicts_with = "sql")]
    pub sql_file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ExecArgs {
    /// SQL query text
    pub sql: Option<String>,

    /// Read SQL from file
    #[arg(short = 'f', long = "file", conflicts_with = "sql")]
    pub sql_file: Option<PathBuf>,

    /// Schema to scope the query to
    #[arg(short = 's', long, conflicts_with = "assignment")]
    pub schema: Option<String>,

    /// Assignment id, resolved through the [assignments] config table
    #[arg(short = 'a', long)]
    pub assignment: Option<String>,

    /// Overall deadline in milliseconds, on top of the statement timeout
    #[arg(long)]
    pub deadline_ms: Option<u64>,

    #[command(flatten)]
    pub connection: ConnectionArgs,
}
