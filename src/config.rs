// # Configuration
//
// One struct tree for the whole engine, assembled from defaults or the
// environment. Component configs live next to their components; this
// module composes and validates them.

use std::env;
use std::str::FromStr;

use serde_json::{json, Value};

use crate::cache::{CacheConfig, CircuitBreakerConfig};
use crate::db::SqlValidatorConfig;
use crate::error::{FactError, Result};
use crate::tools::ExecutorConfig;

const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a finance assistant with access to SQL database tools. You MUST use tools to answer \
questions about financial data.

When users ask for data, immediately execute the appropriate SQL query using the tools. Do not \
just describe what you would do - actually do it.

Available tools:
- SQL_QueryReadonly: Execute SELECT queries to retrieve data
- SQL_GetSchema: Get database schema information

Process:
1. If you need schema info, call SQL_GetSchema
2. Execute the appropriate SQL query with SQL_QueryReadonly
3. Present the actual results to the user

Always show real data, not placeholders or descriptions of what you would do.";

/// Language model settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub model: String,
    pub max_tokens: u32,
    pub request_timeout_seconds: u64,
    pub max_retries: u32,
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "claude-3-haiku-20240307".to_string(),
            max_tokens: 4_096,
            request_timeout_seconds: 30,
            max_retries: 3,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl LlmConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(FactError::Configuration("model cannot be empty".to_string()));
        }
        if self.max_tokens == 0 {
            return Err(FactError::Configuration(
                "max_tokens must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout_seconds == 0 {
            return Err(FactError::Configuration(
                "request_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub cache: CacheConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub executor: ExecutorConfig,
    pub sql_validator: SqlValidatorConfig,
    pub llm: LlmConfig,
}

impl Config {
    /// Build from environment variables, falling back to defaults for
    /// anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            cache: CacheConfig {
                prefix: env_or("CACHE_PREFIX", defaults.cache.prefix),
                min_tokens: env_or("CACHE_MIN_TOKENS", defaults.cache.min_tokens),
                max_size_bytes: env_or("CACHE_MAX_SIZE_BYTES", defaults.cache.max_size_bytes),
                max_entry_bytes: env_or("CACHE_MAX_ENTRY_BYTES", defaults.cache.max_entry_bytes),
                ttl_seconds: env_or("CACHE_TTL_SECONDS", defaults.cache.ttl_seconds),
                hit_target_ms: env_or("CACHE_HIT_TARGET_MS", defaults.cache.hit_target_ms),
                miss_target_ms: env_or("CACHE_MISS_TARGET_MS", defaults.cache.miss_target_ms),
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: env_or(
                    "CIRCUIT_FAILURE_THRESHOLD",
                    defaults.circuit_breaker.failure_threshold,
                ),
                success_threshold: env_or(
                    "CIRCUIT_SUCCESS_THRESHOLD",
                    defaults.circuit_breaker.success_threshold,
                ),
                timeout_seconds: env_or(
                    "CIRCUIT_TIMEOUT_SECONDS",
                    defaults.circuit_breaker.timeout_seconds,
                ),
                rolling_window_seconds: env_or(
                    "CIRCUIT_ROLLING_WINDOW_SECONDS",
                    defaults.circuit_breaker.rolling_window_seconds,
                ),
                recovery_factor: env_or(
                    "CIRCUIT_RECOVERY_FACTOR",
                    defaults.circuit_breaker.recovery_factor,
                ),
            },
            executor: ExecutorConfig {
                enable_rate_limiting: env_or(
                    "TOOL_RATE_LIMITING",
                    defaults.executor.enable_rate_limiting,
                ),
                max_calls_per_minute: env_or(
                    "MAX_CALLS_PER_MINUTE",
                    defaults.executor.max_calls_per_minute,
                ),
                default_timeout: env_or("TOOL_DEFAULT_TIMEOUT", defaults.executor.default_timeout),
            },
            sql_validator: SqlValidatorConfig {
                max_statement_length: env_or(
                    "SQL_MAX_STATEMENT_LENGTH",
                    defaults.sql_validator.max_statement_length,
                ),
                max_nested_selects: env_or(
                    "SQL_MAX_NESTED_SELECTS",
                    defaults.sql_validator.max_nested_selects,
                ),
                validation_cache_size: env_or(
                    "SQL_VALIDATION_CACHE_SIZE",
                    defaults.sql_validator.validation_cache_size,
                ),
            },
            llm: LlmConfig {
                model: env_or("CLAUDE_MODEL", defaults.llm.model),
                max_tokens: env_or("LLM_MAX_TOKENS", defaults.llm.max_tokens),
                request_timeout_seconds: env_or(
                    "REQUEST_TIMEOUT",
                    defaults.llm.request_timeout_seconds,
                ),
                max_retries: env_or("MAX_RETRIES", defaults.llm.max_retries),
                system_prompt: env_or("SYSTEM_PROMPT", defaults.llm.system_prompt),
            },
        };

        tracing::info!(summary = %config.summary(), "configuration loaded");
        config
    }

    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.circuit_breaker.validate()?;
        self.executor.validate()?;
        self.sql_validator.validate()?;
        self.llm.validate()?;
        Ok(())
    }

    /// Loggable summary. Keep anything sensitive out of here.
    pub fn summary(&self) -> Value {
        json!({
            "cache": {
                "prefix": self.cache.prefix,
                "min_tokens": self.cache.min_tokens,
                "max_size_bytes": self.cache.max_size_bytes,
                "ttl_seconds": self.cache.ttl_seconds,
            },
            "circuit_breaker": {
                "failure_threshold": self.circuit_breaker.failure_threshold,
                "timeout_seconds": self.circuit_breaker.timeout_seconds,
            },
            "executor": {
                "max_calls_per_minute": self.executor.max_calls_per_minute,
                "default_timeout": self.executor.default_timeout,
            },
            "llm": {
                "model": self.llm.model,
                "max_tokens": self.llm.max_tokens,
                "request_timeout_seconds": self.llm.request_timeout_seconds,
            },
        })
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}
