use clap::Parser;
use sqlsandbox::catalog::{AssignmentCatalog, StaticCatalog};
use sqlsandbox::cli::{self, Cli, Command};
use sqlsandbox::error::SandboxError;
use sqlsandbox::executor::SandboxExecutor;
use sqlsandbox::logging::{self, Timer};
use sqlsandbox::pool::PoolManager;
use sqlsandbox::validation::{self, ValidationOutcome};
use sqlsandbox::{config, output, server};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

#[actix_web::main]
async fn main() {
    // Load .env file (optional, ignore if missing)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config_path = cli.config.as_ref();
    let result = match cli.command {
        Command::Serve(ref args) => serve(args, cli.verbose, config_path).await,
        Command::Validate(ref args) => validate(args),
        Command::Exec(ref args) => exec(args, cli.verbose, config_path).await,
        Command::Check(ref args) => check(args, cli.verbose, config_path).await,
        Command::Config(ref args) => show_config(args, cli.verbose, cli.show_secrets, config_path),
    };

    if let Err(err) = result {
        output::print_error(&err);
        process::exit(1);
    }
}

async fn serve(
    args: &cli::ServeArgs,
    verbose: bool,
    config_path: Option<&PathBuf>,
) -> Result<(), SandboxError> {
    let app_config = config::load_from_serve_args(args, verbose, false, config_path)?;
    server::run(app_config).await
}

fn validate(args: &cli::ValidateArgs) -> Result<(), SandboxError> {
    let sql = resolve_sql(args.sql.as_deref(), args.sql_file.as_ref())?;
    match validation::validate(&sql) {
        ValidationOutcome::Admitted => {
            output::print_result("Query is valid");
            Ok(())
        }
        ValidationOutcome::Rejected { reason, category } => Err(SandboxError::Validation {
            reason: format!("{}: {}", category.as_str(), reason),
        }),
    }
}

async fn exec(
    args: &cli::ExecArgs,
    verbose: bool,
    config_path: Option<&PathBuf>,
) -> Result<(), SandboxError> {
    let app_config = config::load_from_connection_args(&args.connection, verbose, false, config_path)?;
    let sql = resolve_sql(args.sql.as_deref(), args.sql_file.as_ref())?;

    log::debug!("validating query...");
    if let ValidationOutcome::Rejected { reason, category } = validation::validate(&sql) {
        return Err(SandboxError::Validation {
            reason: format!("{}: {}", category.as_str(), reason),
        });
    }

    let schema = match (&args.schema, &args.assignment) {
        (Some(schema), _) => schema.clone(),
        (None, Some(assignment)) => {
            let catalog =
                StaticCatalog::new(app_config.assignments.clone(), app_config.default_schema.clone());
            catalog
                .resolve_schema_name(assignment)
                .await
                .ok_or_else(|| SandboxError::NotFound {
                    message: format!("assignment '{}' is not in the [assignments] table", assignment),
                })?
        }
        (None, None) => app_config.default_schema.clone(),
    };

    let pools = PoolManager::connect_lazy(&app_config.database);
    let executor = SandboxExecutor::new(pools.connector_chain(), app_config.database.statement_timeout);

    log::debug!("executing query against schema {}...", schema);
    let timer = Timer::start();
    let outcome = executor
        .execute_with_deadline(&sql, &schema, args.deadline_ms.map(Duration::from_millis))
        .await;
    pools.close().await;

    let result = outcome?;
    log::debug!("query complete ({}ms, {} rows)", timer.elapsed_ms(), result.row_count);
    output::print_result(&output::render_result(&result)?);
    Ok(())
}

async fn check(
    args: &cli::ConnectionArgs,
    verbose: bool,
    config_path: Option<&PathBuf>,
) -> Result<(), SandboxError> {
    let app_config = config::load_from_connection_args(args, verbose, false, config_path)?;
    let pools = PoolManager::connect_lazy(&app_config.database);
    let verified = pools.verify().await;
    let status = pools.status();
    pools.close().await;
    verified?;
    output::print_result(&output::render_json(&status)?);
    Ok(())
}

fn show_config(
    args: &cli::ConnectionArgs,
    verbose: bool,
    show_secrets: bool,
    config_path: Option<&PathBuf>,
) -> Result<(), SandboxError> {
    let app_config = config::load_from_connection_args(args, verbose, show_secrets, config_path)?;
    output::print_result(&output::render_json(&app_config.summary())?);
    Ok(())
}

// --- Helpers ---

fn resolve_sql(sql: Option<&str>, sql_file: Option<&PathBuf>) -> Result<String, SandboxError> {
    if let Some(sql) = sql {
        return Ok(sql.to_string());
    }
    if let Some(path) = sql_file {
        let content = std::fs::read_to_string(path).map_err(|e| SandboxError::Config {
            message: format!("cannot read SQL file {}: {}", path.display(), e),
        })?;
        return Ok(content);
    }
    Err(SandboxError::Config {
        message: "no SQL provided — use positional argument or --file".to_string(),
    })
}
