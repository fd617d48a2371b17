//! HTTP surface: execute and validate endpoints plus health probes.

use crate::catalog::{AssignmentCatalog, StaticCatalog};
use crate::config::AppConfig;
use crate::error::{ExecutionError, SandboxError};
use crate::executor::SandboxExecutor;
use crate::middleware::{security_headers, RateLimit};
use crate::pool::PoolManager;
use crate::validation::{self, RejectionCategory, ValidationOutcome, MAX_QUERY_CHARS};
use actix_cors::Cors;
use actix_web::error::JsonPayloadError;
use actix_web::http::StatusCode;
use actix_web::middleware::Logger;
use actix_web::{get, post, web, App, HttpRequest, HttpResponse, HttpServer};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Request bodies above this size are refused before parsing. Leaves room
/// for a query of `MAX_QUERY_CHARS` characters even when every character is
/// sent as a six-byte `\uXXXX` escape.
pub const JSON_BODY_LIMIT: usize = 6 * MAX_QUERY_CHARS + 4 * 1024;

/// Shared, read-only state handed to every request.
pub struct AppState {
    executor: SandboxExecutor,
    catalog: Arc<dyn AssignmentCatalog>,
    default_schema: String,
    pools: Option<Arc<PoolManager>>,
}

impl AppState {
    pub fn new(
        executor: SandboxExecutor,
        catalog: Arc<dyn AssignmentCatalog>,
        default_schema: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            catalog,
            default_schema: default_schema.into(),
            pools: None,
        }
    }

    pub fn with_pools(mut self, pools: Arc<PoolManager>) -> Self {
        self.pools = Some(pools);
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub assignment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

pub(crate) fn error_response(status: u16, message: impl Into<String>, category: Option<&str>) -> HttpResponse {
    let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let label = if code.is_client_error() { "fail" } else { "error" };
    HttpResponse::build(code).json(ErrorBody {
        status: label.to_string(),
        message: message.into(),
        category: category.map(str::to_string),
    })
}

fn rejection_response(outcome: ValidationOutcome) -> Option<HttpResponse> {
    match outcome {
        ValidationOutcome::Admitted => None,
        ValidationOutcome::Rejected { reason, category } => {
            debug!("query rejected by validator: {}", category.as_str());
            Some(error_response(
                category.http_status(),
                reason,
                Some(category.as_str()),
            ))
        }
    }
}

fn execution_error_response(err: &ExecutionError) -> HttpResponse {
    error_response(
        err.http_status(),
        err.message.clone(),
        Some(err.category.as_str()),
    )
}

#[post("/execute")]
async fn execute(state: web::Data<AppState>, body: web::Json<ExecuteRequest>) -> HttpResponse {
    let request = body.into_inner();

    if let Some(response) = rejection_response(validation::validate(&request.query)) {
        return response;
    }

    let schema = match request.assignment_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => match state.catalog.resolve_schema_name(id).await {
            Some(schema) => schema,
            None => return error_response(404, "Assignment not found", None),
        },
        _ => state.default_schema.clone(),
    };

    match state.executor.execute(&request.query, &schema).await {
        Ok(result) => HttpResponse::Ok().json(json!({
            "status": "success",
            "data": result,
        })),
        Err(err) => execution_error_response(&err),
    }
}

#[post("/validate")]
async fn validate_query(body: web::Json<ValidateRequest>) -> HttpResponse {
    match rejection_response(validation::validate(&body.query)) {
        Some(response) => response,
        None => HttpResponse::Ok().json(json!({
            "status": "success",
            "message": "Query is valid",
        })),
    }
}

#[get("/api/health")]
async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Server is running",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[get("/api/ready")]
async fn ready(state: web::Data<AppState>) -> HttpResponse {
    let Some(pools) = state.pools.as_ref() else {
        return HttpResponse::Ok().json(json!({ "status": "success", "pools": [] }));
    };
    let reachable = pools.ping_primary().await;
    let body = json!({
        "status": if reachable { "success" } else { "error" },
        "degradedSandbox": pools.is_degraded(),
        "pools": pools.status(),
    });
    if reachable {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

/// Fallback for unmatched routes.
pub async fn not_found(req: HttpRequest) -> HttpResponse {
    error_response(
        404,
        format!("Can't find {} on this server!", req.path()),
        None,
    )
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(JSON_BODY_LIMIT)
        .error_handler(|err, _req| {
            let response = match &err {
                // Only a query over the character limit can fill the body.
                JsonPayloadError::Overflow { .. } | JsonPayloadError::OverflowKnownLength { .. } => {
                    let category = RejectionCategory::TooLong;
                    error_response(
                        category.http_status(),
                        format!("Query is too long (limit {MAX_QUERY_CHARS} characters)"),
                        Some(category.as_str()),
                    )
                }
                _ => error_response(400, format!("Invalid request body: {err}"), None),
            };
            actix_web::error::InternalError::from_response(err, response).into()
        })
}

/// Register routes and shared state on an actix `App`.
pub fn routes(
    state: web::Data<AppState>,
) -> impl Fn(&mut web::ServiceConfig) + Clone + Send + 'static {
    move |cfg: &mut web::ServiceConfig| {
        cfg.app_data(state.clone())
            .app_data(json_config())
            .service(web::scope("/api/v1/query").service(execute).service(validate_query))
            .service(health)
            .service(ready);
    }
}

/// Build pools, verify connectivity, serve until shutdown, then drain pools.
pub async fn run(config: AppConfig) -> Result<(), SandboxError> {
    let pools = Arc::new(PoolManager::connect_lazy(&config.database));
    pools.verify().await?;

    let catalog = StaticCatalog::new(config.assignments.clone(), config.default_schema.clone());
    info!("assignment catalog loaded ({} assignments)", catalog.len());

    let executor = SandboxExecutor::new(pools.connector_chain(), config.database.statement_timeout);
    let state = web::Data::new(
        AppState::new(executor, Arc::new(catalog), config.default_schema.clone())
            .with_pools(pools.clone()),
    );

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    info!("starting HTTP server on {bind_addr}");
    info!("endpoints: POST /api/v1/query/execute, POST /api/v1/query/validate, GET /api/health");

    let rate_limit = RateLimit::new(&config.server.rate_limit);
    if config.server.rate_limit.max_requests > 0 {
        info!(
            "rate limit: {} requests per {}ms per client",
            config.server.rate_limit.max_requests,
            config.server.rate_limit.window.as_millis()
        );
    }

    let configure = routes(state);
    HttpServer::new(move || {
        App::new()
            .wrap(rate_limit.clone())
            .wrap(security_headers())
            .wrap(Logger::default())
            .wrap(Cors::permissive())
            .configure(configure.clone())
            .default_service(web::to(not_found))
    })
    .bind(&bind_addr)?
    .run()
    .await?;

    pools.close().await;
    info!("server shutdown complete");
    Ok(())
}
