use async_trait::async_trait;
use std::collections::BTreeMap;

/// Resolves an assignment to the schema holding its sample data.
#[async_trait]
pub trait AssignmentCatalog: Send + Sync {
    /// `None` when the assignment does not exist.
    async fn resolve_schema_name(&self, assignment_id: &str) -> Option<String>;
}

/// A fixed assignment table, loaded from the `[assignments]` config section.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    schemas: BTreeMap<String, String>,
    default_schema: String,
}

impl StaticCatalog {
    pub fn new(schemas: BTreeMap<String, String>, default_schema: impl Into<String>) -> Self {
        Self {
            schemas,
            default_schema: default_schema.into(),
        }
    }

    pub fn default_schema(&self) -> &str {
        &self.default_schema
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[async_trait]
impl AssignmentCatalog for StaticCatalog {
    async fn resolve_schema_name(&self, assignment_id: &str) -> Option<String> {
        let schema = self.schemas.get(assignment_id)?;
        if schema.trim().is_empty() {
            Some(self.default_schema.clone())
        } else {
            Some(schema.clone())
        }
    }
}
