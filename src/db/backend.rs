use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Result of a read-only query: structured rows plus timing metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Rows as JSON objects keyed by column name.
    pub rows: Vec<Value>,
    pub row_count: usize,
    pub columns: Vec<String>,
    pub execution_time_ms: f64,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self {
            rows: Vec::new(),
            row_count: 0,
            columns: Vec::new(),
            execution_time_ms: 0.0,
        }
    }
}

/// Boundary to the SQL store.
///
/// Implementations are expected to be cheap to share (`Arc`) and safe to
/// call concurrently. `explain_query_plan` must not execute the statement;
/// it exists so the validator can catch syntax errors without side effects.
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Execute an already-validated read-only statement.
    async fn execute_query(&self, statement: &str) -> Result<QueryResult>;

    /// Ask the database to plan the statement without executing it.
    async fn explain_query_plan(&self, statement: &str) -> Result<()>;

    /// Describe tables and row counts for the schema tool.
    async fn describe_schema(&self) -> Result<Value>;
}
