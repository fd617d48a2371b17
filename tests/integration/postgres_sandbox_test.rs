//! Live-database checks. Skipped unless SQLSANDBOX_TEST_DATABASE_URL points
//! at a Postgres the test may create schemas in.

use sqlsandbox::backend::postgres::PgConnector;
use sqlsandbox::backend::Connector;
use sqlsandbox::error::ErrorCategory;
use sqlsandbox::executor::SandboxExecutor;
use sqlsandbox::pool::ConnectorChain;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SCHEMA: &str = "assignment_1_basic_select";

/// Tests in this file share one seeded schema.
static SEED_LOCK: Mutex<()> = Mutex::new(());

const SEED: &str = r#"
CREATE SCHEMA IF NOT EXISTS assignment_1_basic_select;
DROP TABLE IF EXISTS assignment_1_basic_select.employees;
CREATE TABLE assignment_1_basic_select.employees (
    id SERIAL PRIMARY KEY,
    name VARCHAR(100) NOT NULL,
    email VARCHAR(100),
    department VARCHAR(50),
    salary NUMERIC(10, 2),
    hire_date DATE
);
INSERT INTO assignment_1_basic_select.employees (name, email, department, salary, hire_date) VALUES
    ('John Doe', 'john@example.com', 'Engineering', 75000.00, '2020-01-15'),
    ('Jane Smith', 'jane@example.com', 'Marketing', 65000.00, '2019-03-20'),
    ('Bob Johnson', 'bob@example.com', 'Engineering', 80000.00, '2018-06-10'),
    ('Alice Brown', 'alice@example.com', 'Sales', 55000.00, '2021-02-28'),
    ('Charlie Wilson', 'charlie@example.com', 'Marketing', 60000.00, '2020-11-05');
CREATE OR REPLACE FUNCTION assignment_1_basic_select.hire_intern() RETURNS INTEGER AS $$
BEGIN
    INSERT INTO assignment_1_basic_select.employees (name) VALUES ('Intern');
    RETURN 1;
END;
$$ LANGUAGE plpgsql;
"#;

fn database_url() -> Option<String> {
    match std::env::var("SQLSANDBOX_TEST_DATABASE_URL") {
        Ok(url) if !url.trim().is_empty() => Some(url),
        _ => {
            eprintln!("SQLSANDBOX_TEST_DATABASE_URL not set, skipping live Postgres test");
            None
        }
    }
}

async fn seeded_pool(url: &str) -> PgPool {
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(url)
        .await
        .expect("connect to test database");
    sqlx::raw_sql(SEED).execute(&pool).await.expect("seed schema");
    pool
}

fn executor(pool: &PgPool, statement_timeout: Duration) -> SandboxExecutor {
    let connector: Arc<dyn Connector> = Arc::new(PgConnector::new("sandbox", pool.clone()));
    SandboxExecutor::new(ConnectorChain::new(vec![connector]), statement_timeout)
}

async fn employee_count(pool: &PgPool) -> i64 {
    sqlx::query_scalar("SELECT count(*) FROM assignment_1_basic_select.employees")
        .fetch_one(pool)
        .await
        .expect("count employees")
}

#[tokio::test]
async fn test_select_all_employees() {
    let Some(url) = database_url() else { return };
    let _lock = SEED_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let pool = seeded_pool(&url).await;

    let result = executor(&pool, Duration::from_secs(5))
        .execute("SELECT * FROM employees", SCHEMA)
        .await
        .unwrap();

    assert_eq!(result.row_count, 5);
    assert_eq!(
        result.columns,
        vec!["id", "name", "email", "department", "salary", "hire_date"]
    );
    assert_eq!(result.rows[0]["name"], "John Doe");
    assert_eq!(result.rows[0]["salary"], "75000.00");
    assert_eq!(result.rows[0]["hire_date"], "2020-01-15");
    assert_eq!(result.fields[0].data_type_id, Some(23));
    pool.close().await;
}

#[tokio::test]
async fn test_side_effects_are_rolled_back() {
    let Some(url) = database_url() else { return };
    let _lock = SEED_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let pool = seeded_pool(&url).await;

    let before = employee_count(&pool).await;
    let result = executor(&pool, Duration::from_secs(5))
        .execute("SELECT hire_intern()", SCHEMA)
        .await
        .unwrap();
    assert_eq!(result.row_count, 1);
    assert_eq!(employee_count(&pool).await, before);
    pool.close().await;
}

#[tokio::test]
async fn test_missing_table_is_categorized() {
    let Some(url) = database_url() else { return };
    let _lock = SEED_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let pool = seeded_pool(&url).await;

    let err = executor(&pool, Duration::from_secs(5))
        .execute("SELECT * FROM no_such_table", SCHEMA)
        .await
        .unwrap_err();
    assert_eq!(err.category, ErrorCategory::TableNotFound);
    pool.close().await;
}

#[tokio::test]
async fn test_statement_timeout_cancels_query() {
    let Some(url) = database_url() else { return };
    let _lock = SEED_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let pool = seeded_pool(&url).await;

    let err = executor(&pool, Duration::from_millis(200))
        .execute("SELECT pg_sleep(3)", SCHEMA)
        .await
        .unwrap_err();
    assert_eq!(err.category, ErrorCategory::ExecutionFailure);
    assert!(err.message.contains("time budget"), "Got: {}", err.message);
    pool.close().await;
}

#[tokio::test]
async fn test_rejected_sandbox_role_falls_back() {
    let Some(url) = database_url() else { return };
    let _lock = SEED_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let pool = seeded_pool(&url).await;

    let bad_options = PgConnectOptions::from_str(&url)
        .expect("parse test database url")
        .username("sqlsandbox_no_such_role")
        .password("wrong");
    let bad_pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .connect_lazy_with(bad_options);

    let sandbox: Arc<dyn Connector> = Arc::new(PgConnector::new("sandbox", bad_pool.clone()));
    let fallback: Arc<dyn Connector> = Arc::new(PgConnector::new("fallback", pool.clone()));
    let chain = ConnectorChain::new(vec![sandbox, fallback]);
    let (tx, via) = chain.begin().await.unwrap();
    assert_eq!(via, "fallback");
    tx.rollback().await.unwrap();

    let via_fallback = SandboxExecutor::new(chain, Duration::from_secs(5))
        .execute("SELECT * FROM employees ORDER BY id", SCHEMA)
        .await
        .unwrap();
    let direct = executor(&pool, Duration::from_secs(5))
        .execute("SELECT * FROM employees ORDER BY id", SCHEMA)
        .await
        .unwrap();
    assert_eq!(via_fallback, direct);

    bad_pool.close().await;
    pool.close().await;
}

const SAME_NAME_SEED: &str = r#"
CREATE SCHEMA IF NOT EXISTS sqlsandbox_shape_a;
CREATE SCHEMA IF NOT EXISTS sqlsandbox_shape_b;
DROP TABLE IF EXISTS sqlsandbox_shape_a.items;
DROP TABLE IF EXISTS sqlsandbox_shape_b.items;
CREATE TABLE sqlsandbox_shape_a.items (id INTEGER, label TEXT);
CREATE TABLE sqlsandbox_shape_b.items (sku TEXT, price NUMERIC(8, 2), qty INTEGER);
INSERT INTO sqlsandbox_shape_a.items VALUES (1, 'pen');
INSERT INTO sqlsandbox_shape_b.items VALUES ('A-1', 2.50, 4);
"#;

#[tokio::test]
async fn test_same_query_text_across_schemas_on_one_connection() {
    let Some(url) = database_url() else { return };
    let _lock = SEED_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    // One connection, so the second execution reuses the first's session.
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await
        .expect("connect to test database");
    sqlx::raw_sql(SAME_NAME_SEED)
        .execute(&pool)
        .await
        .expect("seed item schemas");
    let executor = executor(&pool, Duration::from_secs(5));

    let first = executor
        .execute("SELECT * FROM items", "sqlsandbox_shape_a")
        .await
        .unwrap();
    assert_eq!(first.columns, vec!["id", "label"]);
    assert_eq!(first.rows[0]["label"], "pen");

    let second = executor
        .execute("SELECT * FROM items", "sqlsandbox_shape_b")
        .await
        .unwrap();
    assert_eq!(second.columns, vec!["sku", "price", "qty"]);
    assert_eq!(second.rows[0]["sku"], "A-1");
    assert_eq!(second.rows[0]["price"], "2.50");

    let again = executor
        .execute("SELECT * FROM items", "sqlsandbox_shape_a")
        .await
        .unwrap();
    assert_eq!(again, first);

    sqlx::raw_sql("DROP SCHEMA sqlsandbox_shape_a CASCADE; DROP SCHEMA sqlsandbox_shape_b CASCADE;")
        .execute(&pool)
        .await
        .expect("drop item schemas");
    pool.close().await;
}

#[tokio::test]
async fn test_refused_sandbox_host_falls_back() {
    let Some(url) = database_url() else { return };
    let _lock = SEED_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let pool = seeded_pool(&url).await;

    // Nothing listens on port 1.
    let refused_options = PgConnectOptions::from_str(&url)
        .expect("parse test database url")
        .host("127.0.0.1")
        .port(1);
    let refused_pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(2))
        .connect_lazy_with(refused_options);

    let sandbox: Arc<dyn Connector> = Arc::new(PgConnector::new("sandbox", refused_pool.clone()));
    let fallback: Arc<dyn Connector> = Arc::new(PgConnector::new("fallback", pool.clone()));
    let chain = ConnectorChain::new(vec![sandbox, fallback]);

    let (tx, via) = chain.begin().await.unwrap();
    assert_eq!(via, "fallback");
    tx.rollback().await.unwrap();

    let result = SandboxExecutor::new(chain, Duration::from_secs(5))
        .execute("SELECT 1 AS one", "public")
        .await
        .unwrap();
    assert_eq!(result.columns, vec!["one"]);
    assert_eq!(result.rows[0]["one"], 1);

    refused_pool.close().await;
    pool.close().await;
}
