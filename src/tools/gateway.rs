// # Tool Dispatch Gateway
//
// Routes each tool invocation to the local handler or a configured remote
// executor. The preferred path runs first; when fallback is enabled the
// other path gets exactly one chance after a failure.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{FactError, Result};
use crate::tools::registry::ToolDefinition;

/// Remote execution surface (a sandbox host, a tool platform, ...).
/// Interface only; the engine ships no HTTP client.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute_tool(
        &self,
        tool_name: &str,
        arguments: &Value,
        timeout: Duration,
    ) -> Result<Value>;
}

/// Which path to try first when both are available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutePreference {
    #[default]
    PreferLocal,
    PreferRemote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Local,
    Remote,
}

/// Dispatch router with at-most-one retry across the local/remote choice.
pub struct ToolGateway {
    remote: Option<Arc<dyn RemoteExecutor>>,
    preference: RoutePreference,
    enable_fallback: bool,
}

impl Default for ToolGateway {
    fn default() -> Self {
        Self::local_only()
    }
}

impl ToolGateway {
    pub fn local_only() -> Self {
        Self {
            remote: None,
            preference: RoutePreference::PreferLocal,
            enable_fallback: false,
        }
    }

    pub fn new(
        remote: Option<Arc<dyn RemoteExecutor>>,
        preference: RoutePreference,
        enable_fallback: bool,
    ) -> Self {
        Self {
            remote,
            preference,
            enable_fallback,
        }
    }

    /// Execute the tool body under the resolved deadline, trying routes
    /// in preference order.
    pub async fn execute(
        &self,
        definition: &ToolDefinition,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let routes = self.route_order();

        let mut last_error: Option<FactError> = None;
        let attempted = routes.len();

        for route in routes {
            let attempt = match route {
                Route::Local => self.execute_locally(definition, arguments.clone(), timeout).await,
                Route::Remote => self.execute_remotely(definition, &arguments, timeout).await,
            };

            match attempt {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(
                        tool_name = %definition.name,
                        route = ?route,
                        error = %e,
                        "tool dispatch route failed"
                    );
                    if !self.enable_fallback {
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }
        }

        let last = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no execution route available".to_string());
        if attempted > 1 {
            Err(FactError::RetriesExhausted(format!(
                "tool execution failed on all routes: {last}"
            )))
        } else {
            Err(FactError::ToolExecution(last))
        }
    }

    fn route_order(&self) -> Vec<Route> {
        match (self.preference, self.remote.is_some()) {
            (RoutePreference::PreferRemote, true) => {
                if self.enable_fallback {
                    vec![Route::Remote, Route::Local]
                } else {
                    vec![Route::Remote]
                }
            }
            _ => {
                if self.enable_fallback && self.remote.is_some() {
                    vec![Route::Local, Route::Remote]
                } else {
                    vec![Route::Local]
                }
            }
        }
    }

    async fn execute_locally(
        &self,
        definition: &ToolDefinition,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value> {
        tokio::time::timeout(timeout, definition.handler.invoke(arguments))
            .await
            .map_err(|_| {
                FactError::Timeout(format!(
                    "tool '{}' timed out after {}s",
                    definition.name,
                    timeout.as_secs()
                ))
            })?
    }

    async fn execute_remotely(
        &self,
        definition: &ToolDefinition,
        arguments: &Value,
        timeout: Duration,
    ) -> Result<Value> {
        let remote = self
            .remote
            .as_ref()
            .ok_or_else(|| FactError::ToolExecution("no remote executor configured".to_string()))?;

        remote
            .execute_tool(&definition.name, arguments, timeout)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::tools::registry::{SyncTool, ToolHandler};

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    struct CountingRemote {
        calls: AtomicUsize,
        healthy: bool,
    }

    #[async_trait]
    impl RemoteExecutor for CountingRemote {
        async fn execute_tool(
            &self,
            _tool_name: &str,
            _arguments: &Value,
            _timeout: Duration,
        ) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.healthy {
                Ok(json!({"source": "remote"}))
            } else {
                Err(FactError::Connectivity("gateway unreachable".into()))
            }
        }
    }

    fn local_definition() -> ToolDefinition {
        let handler: Arc<dyn ToolHandler> =
            Arc::new(SyncTool::new(|_| Ok(json!({"source": "local"}))));
        ToolDefinition::new(
            "Demo_Tool",
            "demo",
            serde_json::Map::new(),
            handler,
        )
    }

    fn failing_definition() -> ToolDefinition {
        let handler: Arc<dyn ToolHandler> =
            Arc::new(SyncTool::new(|_| {
                Err(FactError::ToolExecution("local boom".into()))
            }));
        ToolDefinition::new("Demo_Tool", "demo", serde_json::Map::new(), handler)
    }

    #[tokio::test]
    async fn test_local_only_dispatch() {
        let gateway = ToolGateway::local_only();
        let value = gateway
            .execute(&local_definition(), json!({}), TEST_TIMEOUT)
            .await.unwrap();
        assert_eq!(value["source"], "local");
    }

    #[tokio::test]
    async fn test_prefer_remote_uses_remote() {
        let remote = Arc::new(CountingRemote {
            calls: AtomicUsize::new(0),
            healthy: true,
        });
        let gateway = ToolGateway::new(
            Some(remote.clone()),
            RoutePreference::PreferRemote,
            true,
        );

        let value = gateway
            .execute(&local_definition(), json!({}), TEST_TIMEOUT)
            .await.unwrap();
        assert_eq!(value["source"], "remote");
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back_to_local() {
        let remote = Arc::new(CountingRemote {
            calls: AtomicUsize::new(0),
            healthy: false,
        });
        let gateway = ToolGateway::new(
            Some(remote.clone()),
            RoutePreference::PreferRemote,
            true,
        );

        let value = gateway
            .execute(&local_definition(), json!({}), TEST_TIMEOUT)
            .await.unwrap();
        assert_eq!(value["source"], "local");
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_fallback_propagates_first_error() {
        let remote = Arc::new(CountingRemote {
            calls: AtomicUsize::new(0),
            healthy: false,
        });
        let gateway = ToolGateway::new(Some(remote), RoutePreference::PreferRemote, false);

        let err = gateway
            .execute(&local_definition(), json!({}), TEST_TIMEOUT)
            .await.unwrap_err();
        assert!(matches!(err, FactError::Connectivity(_)));
    }

    #[tokio::test]
    async fn test_all_routes_failing_exhausts_retries() {
        let remote = Arc::new(CountingRemote {
            calls: AtomicUsize::new(0),
            healthy: false,
        });
        let gateway = ToolGateway::new(Some(remote), RoutePreference::PreferLocal, true);

        let err = gateway
            .execute(&failing_definition(), json!({}), TEST_TIMEOUT)
            .await.unwrap_err();
        assert!(matches!(err, FactError::RetriesExhausted(_)));
        assert_eq!(err.status_code(), 503);
    }

    #[tokio::test]
    async fn test_local_timeout() {
        let handler: Arc<dyn ToolHandler> = Arc::new(SlowTool);
        let definition =
            ToolDefinition::new("Demo_Slow", "demo", serde_json::Map::new(), handler);

        // Deadline of 1s against a 2s body: dispatch must give up first.
        let gateway = ToolGateway::local_only();
        let started = std::time::Instant::now();
        let err = gateway
            .execute(&definition, json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, FactError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    struct SlowTool;

    #[async_trait]
    impl ToolHandler for SlowTool {
        async fn invoke(&self, _arguments: Value) -> Result<Value> {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(json!({}))
        }
    }
}
