// # SQL Query Tools
//
// The registered database tools: `SQL_QueryReadonly` runs validated
// SELECT statements, `SQL_GetSchema` describes the tables. Both sit on
// the `DatabaseBackend` boundary and every statement passes the
// read-only gate first.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::db::backend::DatabaseBackend;
use crate::db::sql_validator::SqlValidator;
use crate::error::{FactError, Result};
use crate::tools::registry::{ToolDefinition, ToolHandler, ToolRegistry};

/// Read-only query execution tool.
pub struct SqlQueryTool {
    validator: Arc<SqlValidator>,
    backend: Arc<dyn DatabaseBackend>,
}

impl SqlQueryTool {
    pub fn new(validator: Arc<SqlValidator>, backend: Arc<dyn DatabaseBackend>) -> Self {
        Self { validator, backend }
    }
}

#[async_trait]
impl ToolHandler for SqlQueryTool {
    async fn invoke(&self, arguments: Value) -> Result<Value> {
        let statement = arguments
            .get("statement")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                FactError::InvalidArguments("'statement' must be a string".to_string())
            })?;

        self.validator.validate(statement).await?;

        let query_id = format!("query_{}", Uuid::new_v4().simple());
        let result = self.backend.execute_query(statement).await?;

        tracing::info!(
            query_id = %query_id,
            row_count = result.row_count,
            db_time_ms = result.execution_time_ms,
            "sql query executed"
        );

        Ok(json!({
            "query_id": query_id,
            "rows": result.rows,
            "row_count": result.row_count,
            "columns": result.columns,
            "db_execution_time_ms": result.execution_time_ms,
            "statement": truncate_statement(statement),
        }))
    }
}

/// Schema description tool.
pub struct SqlSchemaTool {
    backend: Arc<dyn DatabaseBackend>,
}

impl SqlSchemaTool {
    pub fn new(backend: Arc<dyn DatabaseBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ToolHandler for SqlSchemaTool {
    async fn invoke(&self, _arguments: Value) -> Result<Value> {
        let schema = self.backend.describe_schema().await?;
        Ok(json!({ "schema": schema }))
    }
}

fn truncate_statement(statement: &str) -> String {
    match statement.char_indices().nth(100) {
        Some((i, _)) => format!("{}...", &statement[..i]),
        None => statement.to_string(),
    }
}

/// Register both SQL tools against the given backend.
pub fn register_sql_tools(
    registry: &ToolRegistry,
    validator: Arc<SqlValidator>,
    backend: Arc<dyn DatabaseBackend>,
) -> Result<()> {
    let query_params: Map<String, Value> = json!({
        "statement": {
            "type": "string",
            "description": "SQL SELECT statement to execute",
            "minLength": 1,
        }
    })
    .as_object()
    .cloned()
    .expect("literal object");

    registry.register(
        ToolDefinition::new(
            "SQL_QueryReadonly",
            "Execute SELECT queries against the finance database and return structured rows",
            query_params,
            Arc::new(SqlQueryTool::new(validator, backend.clone())),
        )
        .with_timeout(30),
    )?;

    registry.register(ToolDefinition::new(
        "SQL_GetSchema",
        "Describe the database tables, columns, and row counts",
        Map::new(),
        Arc::new(SqlSchemaTool::new(backend)),
    ))?;

    Ok(())
}
