// # Query Driver
//
// The central orchestrator. One `process_query` call is one conversation
// turn: probe the cache, on a miss run the tool-augmented LLM loop, then
// store the answer back. Cache trouble never reaches the user; classified
// errors degrade into canned text.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::circuit_breaker::{CircuitBreaker, CircuitBreakerMetrics};
use crate::cache::manager::{spawn_maintenance, CacheManager, MaintenanceHandle};
use crate::cache::metrics::CacheMetrics;
use crate::cache::resilient::ResilientCache;
use crate::config::Config;
use crate::db::backend::DatabaseBackend;
use crate::db::sql_validator::SqlValidator;
use crate::error::{graceful_degradation_message, ErrorCategory, FactError, Result};
use crate::llm::client::LlmClient;
use crate::llm::types::{ChatMessage, ContentBlock, LlmRequest, LlmResponse};
use crate::monitoring::metrics::{MetricsCollector, SystemMetrics};
use crate::security::auth::AuthorizationManager;
use crate::tools::connectors::sql::register_sql_tools;
use crate::tools::executor::{ToolCall, ToolExecutor};
use crate::tools::gateway::ToolGateway;
use crate::tools::registry::ToolRegistry;

/// Hard cap on follow-up LLM calls inside the tool loop.
pub const MAX_TOOL_ITERATIONS: usize = 5;

/// Returned when the loop ends without any text content.
const FALLBACK_RESPONSE: &str = "I apologize, but I was unable to generate a proper response. \
                                 Please try rephrasing your question.";

/// Interval of the background cache expiry sweep.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(300);

/// Interval of the cache health probe.
const HEALTH_PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Aggregated health snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverMetrics {
    pub system: SystemMetrics,
    pub cache: CacheMetrics,
    pub circuit_breaker: CircuitBreakerMetrics,
}

/// The conversation-turn orchestrator.
///
/// Every collaborator is injected; tests wire their own. `initialize`
/// builds the standard production wiring.
pub struct Driver {
    config: Config,
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    executor: Arc<ToolExecutor>,
    cache: Arc<ResilientCache>,
    metrics: Arc<MetricsCollector>,
    maintenance: Mutex<Option<MaintenanceHandle>>,
}

impl Driver {
    /// Fully-injected constructor.
    pub fn new(
        config: Config,
        llm: Arc<dyn LlmClient>,
        registry: Arc<ToolRegistry>,
        executor: Arc<ToolExecutor>,
        cache: Arc<ResilientCache>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            config,
            llm,
            registry,
            executor,
            cache,
            metrics,
            maintenance: Mutex::new(None),
        }
    }

    /// Standard wiring: cache behind a breaker with health probe and
    /// expiry sweep, SQL tools registered over `backend`, local dispatch.
    /// Must run inside the runtime; it spawns the background tasks.
    pub async fn initialize(
        config: Config,
        llm: Arc<dyn LlmClient>,
        backend: Arc<dyn DatabaseBackend>,
    ) -> Result<Self> {
        config.validate()?;

        let cache_manager = CacheManager::new(config.cache.clone())?;
        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone())?);
        let cache = Arc::new(ResilientCache::new(cache_manager.clone(), breaker));
        cache.start_monitoring(HEALTH_PROBE_INTERVAL);

        let registry = Arc::new(ToolRegistry::new());
        let validator = Arc::new(SqlValidator::new(
            config.sql_validator.clone(),
            backend.clone(),
        ));
        register_sql_tools(&registry, validator, backend)?;

        let metrics = Arc::new(MetricsCollector::new(
            config.cache.hit_target_ms,
            config.cache.miss_target_ms,
        ));
        let executor = Arc::new(ToolExecutor::new(
            config.executor.clone(),
            registry.clone(),
            ToolGateway::local_only(),
            Arc::new(AuthorizationManager::new()),
            metrics.clone(),
        )?);

        let driver = Self::new(config, llm, registry, executor, cache, metrics);
        *driver.maintenance.lock() =
            Some(spawn_maintenance(&cache_manager, MAINTENANCE_INTERVAL));

        tracing::info!(
            tools = driver.registry.tool_count(),
            "query driver initialized"
        );
        Ok(driver)
    }

    /// Process one user query and return the response text.
    ///
    /// This never returns an error: failures are classified and folded
    /// into user-safe text.
    pub async fn process_query(&self, user_input: &str) -> String {
        let start = Instant::now();

        match self.process_turn(user_input, start).await {
            Ok(text) => text,
            Err(e) => {
                let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                let category = e.category();

                tracing::error!(
                    error = %e,
                    category = category.as_str(),
                    latency_ms,
                    query = truncate(user_input),
                    "query turn failed"
                );
                self.metrics.record_tool_execution(
                    "fact_query",
                    false,
                    latency_ms,
                    Some(category.as_str()),
                );

                match category {
                    ErrorCategory::Connectivity | ErrorCategory::ToolExecution => {
                        graceful_degradation_message(category)
                    }
                    _ => e.user_friendly_message(),
                }
            }
        }
    }

    async fn process_turn(&self, user_input: &str, start: Instant) -> Result<String> {
        // Phase 1: cache probe. Any cache error means "proceed without".
        let query_hash = self.cache.generate_hash(user_input);

        match self.cache.get(&query_hash).await {
            Ok(Some(entry)) => {
                let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                self.metrics.record_query_turn(true, latency_ms);
                tracing::info!(latency_ms, "cache hit - returning cached response");
                return Ok(entry.content);
            }
            Ok(None) => {}
            Err(FactError::CircuitOpen) => {
                tracing::info!("cache circuit breaker active - proceeding without cache");
            }
            Err(e) => {
                tracing::warn!(error = %e, "cache probe failed - continuing without cache");
            }
        }

        // Phase 2: tool-augmented LLM loop.
        tracing::info!(query = truncate(user_input), "cache miss - querying model");
        let tool_schemas = self.registry.export_all_schemas();
        let mut messages = vec![ChatMessage::user_text(user_input)];

        let mut response = self.call_llm(messages.clone(), &tool_schemas).await?;
        let mut iterations = 0;

        while response.has_tool_use() && iterations < MAX_TOOL_ITERATIONS {
            let calls = extract_tool_calls(&response);
            tracing::info!(count = calls.len(), iteration = iterations, "processing tool calls");

            messages.push(ChatMessage::assistant(response.content.clone()));

            let results = self.executor.execute_batch(calls).await;
            let result_blocks = results
                .iter()
                .map(|result| ContentBlock::ToolResult {
                    tool_use_id: result.call_id.clone(),
                    content: result.content_for_llm(),
                })
                .collect();
            messages.push(ChatMessage::tool_results(result_blocks));

            response = self.call_llm(messages.clone(), &tool_schemas).await?;
            iterations += 1;
        }

        if response.has_tool_use() {
            tracing::warn!(
                iterations,
                "tool loop cap reached with tool calls still pending"
            );
        }

        let mut response_text = response.text();
        if response_text.is_empty() {
            tracing::warn!("no text content in model response");
            response_text = FALLBACK_RESPONSE.to_string();
        }

        // Phase 3: store on miss. Policy rejections and an open circuit
        // are silent; anything else is logged.
        match self.cache.store(&query_hash, &response_text).await {
            Ok(_) => tracing::debug!("response stored in cache"),
            Err(FactError::CircuitOpen) => {
                tracing::debug!("cache store skipped - circuit breaker active");
            }
            Err(FactError::InsufficientTokens { .. }) => {
                tracing::debug!("response not suitable for caching");
            }
            Err(e) => tracing::warn!(error = %e, "cache store failed"),
        }

        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.metrics.record_query_turn(false, latency_ms);
        tracing::info!(
            latency_ms,
            response_length = response_text.len(),
            "query processed"
        );

        Ok(response_text)
    }

    async fn call_llm(&self, messages: Vec<ChatMessage>, tools: &[Value]) -> Result<LlmResponse> {
        let request = LlmRequest {
            model: self.config.llm.model.clone(),
            system: self.config.llm.system_prompt.clone(),
            messages,
            tools: tools.to_vec(),
            max_tokens: self.config.llm.max_tokens,
        };

        let deadline = Duration::from_secs(self.config.llm.request_timeout_seconds);
        match tokio::time::timeout(deadline, self.llm.complete(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e @ FactError::Connectivity(_))) => Err(e),
            Ok(Err(e)) => Err(FactError::Connectivity(format!("LLM call failed: {e}"))),
            Err(_) => Err(FactError::Connectivity(format!(
                "LLM request timed out after {}s",
                self.config.llm.request_timeout_seconds
            ))),
        }
    }

    pub fn get_metrics(&self) -> DriverMetrics {
        let resilient = self.cache.get_metrics();
        DriverMetrics {
            system: self.metrics.get_system_metrics(),
            cache: resilient.cache,
            circuit_breaker: resilient.circuit_breaker,
        }
    }

    /// Stop background tasks. Idempotent.
    pub async fn shutdown(&self) {
        tracing::info!("shutting down query driver");
        self.cache.stop_monitoring().await;
        let maintenance = self.maintenance.lock().take();
        if let Some(handle) = maintenance {
            handle.stop().await;
        }
    }
}

fn extract_tool_calls(response: &LlmResponse) -> Vec<ToolCall> {
    response
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => {
                Some(ToolCall::new(name.clone(), input.clone()).with_id(id.clone()))
            }
            _ => None,
        })
        .collect()
}

fn truncate(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(100)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    &text[..end]
}
