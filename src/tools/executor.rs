// # Tool Executor
//
// Turns tool-use requests from the model into normalized results. Every
// call runs the same gauntlet: rate limit, registry lookup, security
// scan, parameter validation, authorization, then dispatch under the
// tool's deadline. Nothing escapes as an error; failures become
// `success = false` results with an HTTP-style status code.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::{FactError, Result};
use crate::monitoring::metrics::MetricsCollector;
use crate::security::auth::AuthorizationManager;
use crate::tools::gateway::ToolGateway;
use crate::tools::registry::ToolRegistry;
use crate::tools::validation::{ParameterValidator, SecurityValidator};

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub enable_rate_limiting: bool,

    /// Per-user call budget over the sliding 60-second window.
    pub max_calls_per_minute: usize,

    /// Deadline, in seconds, for tools whose definition does not carry
    /// its own timeout.
    pub default_timeout: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            enable_rate_limiting: true,
            max_calls_per_minute: 60,
            default_timeout: 30,
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_calls_per_minute == 0 {
            return Err(FactError::Configuration(
                "max_calls_per_minute must be greater than 0".to_string(),
            ));
        }
        if self.default_timeout == 0 {
            return Err(FactError::Configuration(
                "default_timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// A tool call request from the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            arguments,
            user_id: None,
            session_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// The outcome of one tool call.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub execution_time_ms: f64,
    pub status_code: u16,
    pub metadata: Map<String, Value>,
}

impl ToolResult {
    /// Serialize for the transcript: successful data as-is, failures as a
    /// structured error object.
    pub fn content_for_llm(&self) -> String {
        if self.success {
            serde_json::to_string(self.data.as_ref().unwrap_or(&Value::Null))
                .unwrap_or_else(|_| "null".to_string())
        } else {
            json!({
                "error": self.error.clone().unwrap_or_else(|| "unknown error".to_string()),
                "status": "failed",
                "execution_time_ms": self.execution_time_ms,
            })
            .to_string()
        }
    }

    /// The role/tool_call_id/content envelope consumed by chat transports.
    pub fn format_for_llm(&self) -> Value {
        json!({
            "role": "tool",
            "tool_call_id": self.call_id,
            "name": self.tool_name,
            "content": self.content_for_llm(),
        })
    }
}

/// Per-user sliding-window rate limiter.
///
/// Each user's window holds at most `max_calls` timestamps, so memory is
/// bounded by the call budget rather than the request rate.
pub struct RateLimiter {
    max_calls: usize,
    window_seconds: u64,
    buckets: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize) -> Self {
        Self {
            max_calls,
            window_seconds: 60,
            buckets: DashMap::new(),
        }
    }

    /// Admit and record one call, or refuse it.
    pub fn try_acquire(&self, user_id: &str) -> bool {
        let now = Instant::now();
        let mut bucket = self.buckets.entry(user_id.to_string()).or_default();

        while let Some(front) = bucket.front() {
            if now.duration_since(*front).as_secs() >= self.window_seconds {
                bucket.pop_front();
            } else {
                break;
            }
        }

        if bucket.len() < self.max_calls {
            bucket.push_back(now);
            true
        } else {
            false
        }
    }
}

/// The tool execution engine.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    gateway: ToolGateway,
    parameter_validator: ParameterValidator,
    security_validator: SecurityValidator,
    auth_manager: Arc<AuthorizationManager>,
    metrics: Arc<MetricsCollector>,
    rate_limiter: Option<RateLimiter>,
    default_timeout: u64,
}

impl ToolExecutor {
    pub fn new(
        config: ExecutorConfig,
        registry: Arc<ToolRegistry>,
        gateway: ToolGateway,
        auth_manager: Arc<AuthorizationManager>,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Self> {
        config.validate()?;
        let rate_limiter = config
            .enable_rate_limiting
            .then(|| RateLimiter::new(config.max_calls_per_minute));

        Ok(Self {
            registry,
            gateway,
            parameter_validator: ParameterValidator::new(),
            security_validator: SecurityValidator::new(),
            auth_manager,
            metrics,
            rate_limiter,
            default_timeout: config.default_timeout,
        })
    }

    /// Execute one call. Never fails; errors are folded into the result.
    pub async fn execute(&self, call: ToolCall) -> ToolResult {
        let start = Instant::now();
        let outcome = self.execute_inner(&call).await;
        let execution_time_ms = start.elapsed().as_secs_f64() * 1000.0;

        let mut metadata = Map::new();
        if let Some(user_id) = &call.user_id {
            metadata.insert("user_id".to_string(), json!(user_id));
        }
        if let Some(session_id) = &call.session_id {
            metadata.insert("session_id".to_string(), json!(session_id));
        }
        metadata.insert("timestamp".to_string(), json!(call.timestamp.to_rfc3339()));

        let result = match outcome {
            Ok(mut data) => {
                if let Some(object) = data.as_object_mut() {
                    object.insert("execution_time_ms".to_string(), json!(execution_time_ms));
                    object.insert("status".to_string(), json!("success"));
                }
                tracing::info!(
                    tool_name = %call.name,
                    call_id = %call.id,
                    execution_time_ms,
                    "tool executed"
                );
                self.metrics
                    .record_tool_execution(&call.name, true, execution_time_ms, None);

                ToolResult {
                    call_id: call.id,
                    tool_name: call.name,
                    success: true,
                    data: Some(data),
                    error: None,
                    execution_time_ms,
                    status_code: 200,
                    metadata,
                }
            }
            Err(e) => {
                let category = e.category();
                tracing::error!(
                    tool_name = %call.name,
                    call_id = %call.id,
                    error = %e,
                    category = category.as_str(),
                    "tool execution failed"
                );
                self.metrics.record_tool_execution(
                    &call.name,
                    false,
                    execution_time_ms,
                    Some(category.as_str()),
                );
                metadata.insert("error_category".to_string(), json!(category.as_str()));

                ToolResult {
                    call_id: call.id,
                    tool_name: call.name,
                    success: false,
                    data: None,
                    error: Some(e.to_string()),
                    execution_time_ms,
                    status_code: e.status_code(),
                    metadata,
                }
            }
        };

        result
    }

    /// Execute a batch concurrently. Results come back in input order and
    /// one failure never cancels its peers.
    pub async fn execute_batch(&self, calls: Vec<ToolCall>) -> Vec<ToolResult> {
        if calls.is_empty() {
            return Vec::new();
        }

        tracing::info!(count = calls.len(), "executing tool call batch");
        join_all(calls.into_iter().map(|call| self.execute(call))).await
    }

    async fn execute_inner(&self, call: &ToolCall) -> Result<Value> {
        if let Some(limiter) = &self.rate_limiter {
            let user_key = call.user_id.as_deref().unwrap_or("anonymous");
            if !limiter.try_acquire(user_key) {
                return Err(FactError::RateLimited(
                    "too many tool calls per minute".to_string(),
                ));
            }
        }

        let definition = self.registry.get(&call.name)?;

        self.security_validator
            .validate_tool_call(&call.name, &call.arguments)?;

        self.parameter_validator
            .validate(&call.arguments, &definition.parameters)?;

        if definition.requires_auth {
            let user_id = call
                .user_id
                .as_deref()
                .filter(|u| !u.is_empty())
                .ok_or_else(|| {
                    FactError::Unauthorized(
                        "user authentication required for this tool".to_string(),
                    )
                })?;
            self.auth_manager
                .validate_authorization(user_id, &call.name)?;
        }

        let timeout = Duration::from_secs(
            definition.timeout_seconds.unwrap_or(self.default_timeout),
        );
        let value = self
            .gateway
            .execute(&definition, call.arguments.clone(), timeout)
            .await?;

        // Non-object results are wrapped so the envelope stays uniform.
        Ok(match value {
            Value::Object(_) => value,
            other => json!({ "result": other }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::registry::{SyncTool, ToolDefinition, ToolHandler};

    fn params(spec: Value) -> Map<String, Value> {
        spec.as_object().cloned().unwrap()
    }

    fn echo_definition() -> ToolDefinition {
        let handler: Arc<dyn ToolHandler> =
            Arc::new(SyncTool::new(|args| Ok(json!({ "echo": args }))));
        ToolDefinition::new(
            "Demo_Echo",
            "Echo the arguments back",
            params(json!({"text": {"type": "string"}})),
            handler,
        )
    }

    fn scalar_definition() -> ToolDefinition {
        let handler: Arc<dyn ToolHandler> = Arc::new(SyncTool::new(|_| Ok(json!(42))));
        ToolDefinition::new(
            "Demo_Scalar",
            "Return a bare number",
            Map::new(),
            handler,
        )
    }

    fn executor(config: ExecutorConfig) -> (ToolExecutor, Arc<AuthorizationManager>) {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(echo_definition()).unwrap();
        registry.register(scalar_definition()).unwrap();
        registry
            .register(
                echo_definition()
                    .with_version("1.0.1")
                    .with_auth_required(true),
            )
            .unwrap();

        let auth = Arc::new(AuthorizationManager::new());
        let executor = ToolExecutor::new(
            config,
            registry,
            ToolGateway::local_only(),
            auth.clone(),
            Arc::new(MetricsCollector::new(30.0, 120.0)),
        )
        .unwrap();
        (executor, auth)
    }

    fn open_executor() -> ToolExecutor {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(echo_definition()).unwrap();
        registry.register(scalar_definition()).unwrap();
        ToolExecutor::new(
            ExecutorConfig::default(),
            registry,
            ToolGateway::local_only(),
            Arc::new(AuthorizationManager::new()),
            Arc::new(MetricsCollector::new(30.0, 120.0)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_successful_execution_is_normalized() {
        let executor = open_executor();
        let result = executor
            .execute(ToolCall::new("Demo_Echo", json!({"text": "hello"})))
            .await;

        assert!(result.success);
        assert_eq!(result.status_code, 200);
        let data = result.data.unwrap();
        assert_eq!(data["echo"]["text"], "hello");
        assert_eq!(data["status"], "success");
        assert!(data["execution_time_ms"].is_number());
    }

    #[tokio::test]
    async fn test_scalar_result_is_wrapped() {
        let executor = open_executor();
        let result = executor.execute(ToolCall::new("Demo_Scalar", json!({}))).await;
        assert_eq!(result.data.unwrap()["result"], 42);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_404() {
        let executor = open_executor();
        let result = executor.execute(ToolCall::new("Demo_Missing", json!({}))).await;
        assert!(!result.success);
        assert_eq!(result.status_code, 404);
    }

    #[tokio::test]
    async fn test_parameter_violation_is_400() {
        let executor = open_executor();
        let result = executor.execute(ToolCall::new("Demo_Echo", json!({}))).await;
        assert!(!result.success);
        assert_eq!(result.status_code, 400);
        assert!(result.error.unwrap().contains("missing required parameter"));
    }

    #[tokio::test]
    async fn test_hostile_argument_is_403_without_invocation() {
        let executor = open_executor();
        let result = executor
            .execute(ToolCall::new(
                "Demo_Echo",
                json!({"text": "x; DROP TABLE users"}),
            ))
            .await;
        assert!(!result.success);
        assert_eq!(result.status_code, 403);
    }

    #[tokio::test]
    async fn test_auth_required_without_user_is_401() {
        let (executor, auth) = executor(ExecutorConfig::default());

        let result = executor
            .execute(ToolCall::new("Demo_Echo", json!({"text": "hi"})))
            .await;
        assert!(!result.success);
        assert_eq!(result.status_code, 401);

        // A live grant turns the same call into a success.
        auth.grant_for("alice", "Demo_Echo", "tok", 3_600);
        let result = executor
            .execute(ToolCall::new("Demo_Echo", json!({"text": "hi"})).with_user("alice"))
            .await;
        assert!(result.success, "{:?}", result.error);
    }

    #[tokio::test]
    async fn test_rate_limit_returns_429() {
        let (executor, _) = executor(ExecutorConfig {
            max_calls_per_minute: 5,
            ..Default::default()
        });

        let mut statuses = Vec::new();
        for _ in 0..6 {
            let result = executor
                .execute(ToolCall::new("Demo_Scalar", json!({})).with_user("u"))
                .await;
            statuses.push((result.success, result.status_code));
        }

        let successes = statuses.iter().filter(|(ok, _)| *ok).count();
        assert_eq!(successes, 5);
        assert_eq!(statuses.last().unwrap().1, 429);
    }

    #[tokio::test]
    async fn test_default_timeout_covers_tools_without_their_own() {
        struct SlowTool;

        #[async_trait::async_trait]
        impl crate::tools::registry::ToolHandler for SlowTool {
            async fn invoke(&self, _arguments: Value) -> crate::error::Result<Value> {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok(json!({}))
            }
        }

        let registry = Arc::new(ToolRegistry::new());
        // No per-tool timeout: the executor's default applies.
        registry
            .register(ToolDefinition::new(
                "Demo_Slow",
                "Sleep longer than the default deadline",
                Map::new(),
                Arc::new(SlowTool),
            ))
            .unwrap();

        let executor = ToolExecutor::new(
            ExecutorConfig {
                default_timeout: 1,
                ..Default::default()
            },
            registry,
            ToolGateway::local_only(),
            Arc::new(AuthorizationManager::new()),
            Arc::new(MetricsCollector::new(30.0, 120.0)),
        )
        .unwrap();

        let started = Instant::now();
        let result = executor.execute(ToolCall::new("Demo_Slow", json!({}))).await;
        assert!(!result.success);
        assert_eq!(result.status_code, 500);
        assert!(result.error.unwrap().contains("timed out after 1s"));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_batch_preserves_input_order() {
        let executor = open_executor();
        let calls = vec![
            ToolCall::new("Demo_Echo", json!({"text": "a"})).with_id("call-1"),
            ToolCall::new("Demo_Missing", json!({})).with_id("call-2"),
            ToolCall::new("Demo_Scalar", json!({})).with_id("call-3"),
        ];

        let results = executor.execute_batch(calls).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].call_id, "call-1");
        assert_eq!(results[1].call_id, "call-2");
        assert_eq!(results[2].call_id, "call-3");
        assert!(results[0].success);
        assert!(!results[1].success);
        assert!(results[2].success);
    }

    #[tokio::test]
    async fn test_llm_formatting() {
        let executor = open_executor();
        let result = executor
            .execute(ToolCall::new("Demo_Echo", json!({"text": "hi"})).with_id("c9"))
            .await;

        let formatted = result.format_for_llm();
        assert_eq!(formatted["role"], "tool");
        assert_eq!(formatted["tool_call_id"], "c9");
        assert_eq!(formatted["name"], "Demo_Echo");
        let content: Value =
            serde_json::from_str(formatted["content"].as_str().unwrap()).unwrap();
        assert_eq!(content["echo"]["text"], "hi");
    }
}
