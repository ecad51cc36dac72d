// # Tool Registry
//
// Versioned map of tool definitions plus the precomputed schemas handed
// to the language model. Re-registration only takes effect with a
// strictly greater version; anything else is a logged no-op.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use parking_lot::RwLock;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::error::{FactError, Result};

lazy_static! {
    /// Tool names the vendor API accepts, further constrained to the
    /// Category_Action convention by the underscore requirement.
    static ref TOOL_NAME_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap();
}

/// A tool body. Synchronous callables use [`SyncTool`] so they never run
/// on the scheduler thread.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, arguments: Value) -> Result<Value>;
}

/// Adapter running a blocking callable on the blocking thread pool.
pub struct SyncTool {
    func: Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>,
}

impl SyncTool {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
        }
    }
}

#[async_trait]
impl ToolHandler for SyncTool {
    async fn invoke(&self, arguments: Value) -> Result<Value> {
        let func = self.func.clone();
        tokio::task::spawn_blocking(move || func(arguments))
            .await
            .map_err(|e| FactError::ToolExecution(format!("blocking tool panicked: {e}")))?
    }
}

/// A registered tool: metadata, parameter schema, and the callable.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-schema-shaped parameter specs keyed by parameter name.
    pub parameters: Map<String, Value>,
    pub version: String,
    pub requires_auth: bool,
    /// Per-tool deadline. Tools without one run under the executor's
    /// `default_timeout`.
    pub timeout_seconds: Option<u64>,
    pub registered_at: DateTime<Utc>,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Map<String, Value>,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            version: "1.0.0".to_string(),
            requires_auth: false,
            timeout_seconds: None,
            registered_at: Utc::now(),
            handler,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_auth_required(mut self, requires_auth: bool) -> Self {
        self.requires_auth = requires_auth;
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("requires_auth", &self.requires_auth)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish_non_exhaustive()
    }
}

struct RegistryInner {
    tools: HashMap<String, Arc<ToolDefinition>>,
    schemas: HashMap<String, Value>,
}

/// Central registry for tool definitions and their exported schemas.
pub struct ToolRegistry {
    inner: RwLock<RegistryInner>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                tools: HashMap::new(),
                schemas: HashMap::new(),
            }),
        }
    }

    /// Register a tool. An existing name is only replaced by a strictly
    /// greater version; same-or-lower registrations are logged and dropped.
    pub fn register(&self, definition: ToolDefinition) -> Result<()> {
        validate_definition(&definition)?;

        let mut inner = self.inner.write();

        if let Some(existing) = inner.tools.get(&definition.name) {
            if !is_newer_version(&definition.version, &existing.version) {
                tracing::warn!(
                    tool_name = %definition.name,
                    existing_version = %existing.version,
                    new_version = %definition.version,
                    "tool registration skipped - same or older version"
                );
                return Ok(());
            }
        }

        let schema = extract_schema(&definition);
        let name = definition.name.clone();
        let version = definition.version.clone();
        inner.schemas.insert(name.clone(), schema);
        inner.tools.insert(name.clone(), Arc::new(definition));

        tracing::info!(tool_name = %name, %version, "tool registered");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<ToolDefinition>> {
        self.inner
            .read()
            .tools
            .get(name)
            .cloned()
            .ok_or_else(|| FactError::ToolNotFound(name.to_string()))
    }

    /// Export every tool schema in the model-facing format. A pure
    /// function of the current registration set.
    pub fn export_all_schemas(&self) -> Vec<Value> {
        let inner = self.inner.read();
        let mut names: Vec<&String> = inner.schemas.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| inner.schemas[name].clone())
            .collect()
    }

    pub fn list_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn tool_count(&self) -> usize {
        self.inner.read().tools.len()
    }
}

fn validate_definition(definition: &ToolDefinition) -> Result<()> {
    let name = definition.name.trim();
    if name.is_empty() {
        return Err(FactError::ToolValidation("tool name cannot be empty".to_string()));
    }
    if !TOOL_NAME_PATTERN.is_match(name) || !name.contains('_') {
        return Err(FactError::ToolValidation(format!(
            "tool name '{name}' does not follow the Category_Action convention"
        )));
    }
    if definition.description.trim().is_empty() {
        return Err(FactError::ToolValidation(
            "tool description cannot be empty".to_string(),
        ));
    }
    if definition.timeout_seconds == Some(0) {
        return Err(FactError::ToolValidation(
            "tool timeout must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

/// Parse a dotted-decimal version into a comparable tuple. Anything that
/// does not parse compares as the zero version.
fn version_key(version: &str) -> Vec<u64> {
    let parts: Option<Vec<u64>> = version.split('.').map(|p| p.parse().ok()).collect();
    parts.unwrap_or_else(|| vec![0, 0, 0])
}

fn is_newer_version(new_version: &str, existing_version: &str) -> bool {
    version_key(new_version) > version_key(existing_version)
}

/// Build the model-facing schema for one tool.
fn extract_schema(definition: &ToolDefinition) -> Value {
    json!({
        "name": definition.name,
        "description": definition.description,
        "input_schema": {
            "type": "object",
            "properties": Value::Object(definition.parameters.clone()),
            "required": required_params(&definition.parameters),
        }
    })
}

/// A parameter is required unless it carries a default or an explicit
/// `required: false`.
fn required_params(parameters: &Map<String, Value>) -> Vec<String> {
    let mut required: Vec<String> = parameters
        .iter()
        .filter(|(_, spec)| {
            spec.as_object()
                .map(|s| {
                    !s.contains_key("default")
                        && s.get("required").and_then(Value::as_bool).unwrap_or(true)
                })
                .unwrap_or(false)
        })
        .map(|(name, _)| name.clone())
        .collect();
    required.sort();
    required
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_handler() -> Arc<dyn ToolHandler> {
        Arc::new(SyncTool::new(|_args| Ok(json!({"ok": true}))))
    }

    fn params(spec: Value) -> Map<String, Value> {
        spec.as_object().cloned().unwrap()
    }

    fn definition(name: &str, version: &str) -> ToolDefinition {
        ToolDefinition::new(
            name,
            "Query the demo database",
            params(json!({
                "statement": {"type": "string", "description": "SQL SELECT statement"}
            })),
            noop_handler(),
        )
        .with_version(version)
    }

    #[test]
    fn test_register_and_get() {
        let registry = ToolRegistry::new();
        registry.register(definition("SQL_QueryReadonly", "1.0.0")).unwrap();

        let def = registry.get("SQL_QueryReadonly").unwrap();
        assert_eq!(def.version, "1.0.0");
        assert!(matches!(
            registry.get("SQL_Missing").unwrap_err(),
            FactError::ToolNotFound(_)
        ));
    }

    #[test]
    fn test_rejects_invalid_names() {
        let registry = ToolRegistry::new();
        for name in ["", "NoUnderscore", "Bad Name_", "SQL_Query;drop"] {
            let def = definition(name, "1.0.0");
            assert!(registry.register(def).is_err(), "{name:?} should be rejected");
        }
    }

    #[test]
    fn test_rejects_empty_description_and_zero_timeout() {
        let registry = ToolRegistry::new();

        let mut def = definition("SQL_QueryReadonly", "1.0.0");
        def.description = "  ".to_string();
        assert!(registry.register(def).is_err());

        let def = definition("SQL_QueryReadonly", "1.0.0").with_timeout(0);
        assert!(registry.register(def).is_err());
    }

    #[test]
    fn test_same_or_lower_version_is_silent_noop() {
        let registry = ToolRegistry::new();
        registry.register(definition("SQL_QueryReadonly", "1.2.0")).unwrap();

        registry.register(definition("SQL_QueryReadonly", "1.2.0")).unwrap();
        registry.register(definition("SQL_QueryReadonly", "1.1.9")).unwrap();
        assert_eq!(registry.get("SQL_QueryReadonly").unwrap().version, "1.2.0");

        registry.register(definition("SQL_QueryReadonly", "1.10.0")).unwrap();
        assert_eq!(registry.get("SQL_QueryReadonly").unwrap().version, "1.10.0");
    }

    #[test]
    fn test_schema_export_shape() {
        let registry = ToolRegistry::new();
        let def = ToolDefinition::new(
            "SQL_QueryReadonly",
            "Execute SELECT queries",
            params(json!({
                "statement": {"type": "string"},
                "limit": {"type": "integer", "default": 100},
                "explain": {"type": "boolean", "required": false}
            })),
            noop_handler(),
        );
        registry.register(def).unwrap();

        let schemas = registry.export_all_schemas();
        assert_eq!(schemas.len(), 1);

        let schema = &schemas[0];
        assert_eq!(schema["name"], "SQL_QueryReadonly");
        assert_eq!(schema["input_schema"]["type"], "object");
        assert!(schema["input_schema"]["properties"]["statement"].is_object());

        // Parameters with a default or `required: false` are optional.
        let required = schema["input_schema"]["required"].as_array().unwrap();
        assert_eq!(required.len(), 1);
        assert_eq!(required[0], "statement");
    }

    #[test]
    fn test_export_reflects_registration_set() {
        let registry = ToolRegistry::new();
        registry.register(definition("SQL_QueryReadonly", "1.0.0")).unwrap();
        registry.register(definition("SQL_GetSchema", "1.0.0")).unwrap();

        let first = registry.export_all_schemas();
        let second = registry.export_all_schemas();
        assert_eq!(first, second);
        assert_eq!(registry.list_tools(), vec!["SQL_GetSchema", "SQL_QueryReadonly"]);
    }

    #[tokio::test]
    async fn test_sync_tool_runs_off_scheduler() {
        let tool = SyncTool::new(|args| Ok(json!({"echo": args})));
        let result = tool.invoke(json!({"x": 1})).await.unwrap();
        assert_eq!(result["echo"]["x"], 1);
    }
}
