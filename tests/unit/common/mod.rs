//! Scripted in-memory connectors for exercising the executor without Postgres.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlsandbox::backend::{
    Connector, DriverError, DriverErrorKind, FieldMeta, ResultSet, SandboxTransaction,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Ordered record of everything the fakes were asked to do.
#[derive(Default)]
pub struct Journal {
    events: Mutex<Vec<String>>,
}

impl Journal {
    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

/// What a fake connector does when asked to begin, query or roll back.
#[derive(Clone)]
pub struct Script {
    pub begin_error: Option<DriverError>,
    pub existing_schemas: Vec<String>,
    pub result: Result<ResultSet, DriverError>,
    pub fetch_delay: Option<Duration>,
    pub rollback_error: Option<DriverError>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            begin_error: None,
            existing_schemas: vec!["assignment_1_basic_select".to_string()],
            result: Ok(employees()),
            fetch_delay: None,
            rollback_error: None,
        }
    }
}

pub struct FakeConnector {
    label: String,
    script: Script,
    journal: Arc<Journal>,
}

impl FakeConnector {
    pub fn new(label: &str, script: Script, journal: Arc<Journal>) -> Arc<dyn Connector> {
        Arc::new(Self {
            label: label.to_string(),
            script,
            journal,
        })
    }
}

#[async_trait]
impl Connector for FakeConnector {
    fn label(&self) -> &str {
        &self.label
    }

    async fn begin(&self) -> Result<Box<dyn SandboxTransaction>, DriverError> {
        if let Some(err) = &self.script.begin_error {
            self.journal.record(format!("begin-failed:{}", self.label));
            return Err(err.clone());
        }
        self.journal.record(format!("begin:{}", self.label));
        Ok(Box::new(FakeTransaction {
            label: self.label.clone(),
            script: self.script.clone(),
            journal: self.journal.clone(),
        }))
    }
}

pub struct FakeTransaction {
    label: String,
    script: Script,
    journal: Arc<Journal>,
}

#[async_trait]
impl SandboxTransaction for FakeTransaction {
    async fn schema_exists(&mut self, schema: &str) -> Result<bool, DriverError> {
        self.journal.record(format!("schema_exists:{schema}"));
        Ok(self.script.existing_schemas.iter().any(|s| s == schema))
    }

    async fn apply_setting(&mut self, statement: &str) -> Result<(), DriverError> {
        self.journal.record(format!("set:{statement}"));
        Ok(())
    }

    async fn fetch_positional(&mut self, sql: &str) -> Result<ResultSet, DriverError> {
        self.journal.record(format!("fetch:{}:{sql}", self.label));
        if let Some(delay) = self.script.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        self.script.result.clone()
    }

    async fn rollback(self: Box<Self>) -> Result<(), DriverError> {
        self.journal.record("rollback");
        match &self.script.rollback_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

impl Drop for FakeTransaction {
    fn drop(&mut self) {
        self.journal.record(format!("release:{}", self.label));
    }
}

pub fn field(name: &str, oid: u32, type_name: &str) -> FieldMeta {
    FieldMeta {
        name: name.to_string(),
        type_oid: Some(oid),
        type_name: type_name.to_string(),
    }
}

/// The seeded `employees` table of assignment 1.
pub fn employees() -> ResultSet {
    let row = |id: i64, name: &str, email: &str, dept: &str, salary: &str, hired: &str| -> Vec<Value> {
        vec![
            json!(id),
            json!(name),
            json!(email),
            json!(dept),
            json!(salary),
            json!(hired),
        ]
    };
    ResultSet {
        fields: vec![
            field("id", 23, "INT4"),
            field("name", 1043, "VARCHAR"),
            field("email", 1043, "VARCHAR"),
            field("department", 1043, "VARCHAR"),
            field("salary", 1700, "NUMERIC"),
            field("hire_date", 1082, "DATE"),
        ],
        rows: vec![
            row(1, "John Doe", "john@example.com", "Engineering", "75000.00", "2020-01-15"),
            row(2, "Jane Smith", "jane@example.com", "Marketing", "65000.00", "2019-03-20"),
            row(3, "Bob Johnson", "bob@example.com", "Engineering", "80000.00", "2018-06-10"),
            row(4, "Alice Brown", "alice@example.com", "Sales", "55000.00", "2021-02-28"),
            row(5, "Charlie Wilson", "charlie@example.com", "Marketing", "60000.00", "2020-11-05"),
        ],
    }
}

pub fn auth_rejected() -> DriverError {
    DriverError {
        kind: DriverErrorKind::AuthRejected,
        code: Some("28P01".to_string()),
        message: "password authentication failed".to_string(),
    }
}
