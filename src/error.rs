use thiserror::Error;

#[derive(Error, Debug)]
pub enum FactError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connectivity(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Tool validation error: {0}")]
    ToolValidation(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Security violation: {0}")]
    Security(String),

    #[error("Invalid SQL: {0}")]
    InvalidSql(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Retries exhausted: {0}")]
    RetriesExhausted(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Cache full")]
    CacheFull,

    #[error("Response below minimum token count: {token_count} < {min_tokens}")]
    InsufficientTokens { token_count: usize, min_tokens: usize },

    #[error("Cache entry too large: {byte_size} > {max_bytes} bytes")]
    Oversize { byte_size: usize, max_bytes: usize },

    #[error("Cache circuit breaker open")]
    CircuitOpen,

    #[error("Tool loop exceeded maximum iterations")]
    MaxIterationsExceeded,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, FactError>;

/// Coarse error category used for handling strategy at the driver boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Connectivity,
    Authentication,
    Validation,
    Security,
    ToolExecution,
    Database,
    Cache,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Connectivity => "connectivity",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Security => "security",
            ErrorCategory::ToolExecution => "tool_execution",
            ErrorCategory::Database => "database",
            ErrorCategory::Cache => "cache",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl FactError {
    /// Classify the error for the driver's handling strategy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            FactError::Configuration(_) => ErrorCategory::Configuration,
            FactError::Connectivity(_) | FactError::RetriesExhausted(_) => {
                ErrorCategory::Connectivity
            }
            FactError::Authentication(_) | FactError::Unauthorized(_) => {
                ErrorCategory::Authentication
            }
            FactError::Validation(_) | FactError::InvalidArguments(_) => ErrorCategory::Validation,
            FactError::Security(_) | FactError::InvalidSql(_) => ErrorCategory::Security,
            FactError::ToolValidation(_)
            | FactError::ToolNotFound(_)
            | FactError::ToolExecution(_)
            | FactError::RateLimited(_)
            | FactError::Timeout(_)
            | FactError::MaxIterationsExceeded => ErrorCategory::ToolExecution,
            FactError::Database(_) => ErrorCategory::Database,
            FactError::Cache(_)
            | FactError::CacheFull
            | FactError::InsufficientTokens { .. }
            | FactError::Oversize { .. }
            | FactError::CircuitOpen => ErrorCategory::Cache,
            FactError::Serialization(_) | FactError::Internal(_) => ErrorCategory::Unknown,
        }
    }

    /// HTTP-style status code attached to tool results.
    pub fn status_code(&self) -> u16 {
        match self {
            FactError::ToolNotFound(_) => 404,
            FactError::Validation(_)
            | FactError::ToolValidation(_)
            | FactError::InvalidArguments(_) => 400,
            FactError::Authentication(_) | FactError::Unauthorized(_) => 401,
            FactError::Security(_) | FactError::InvalidSql(_) => 403,
            FactError::RateLimited(_) => 429,
            FactError::RetriesExhausted(_) => 503,
            _ => 500,
        }
    }

    /// A message safe to show to the user. Internal details stay in the logs.
    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => {
                "System configuration error. Please check your setup.".to_string()
            }
            ErrorCategory::Connectivity => {
                "Connection error. Please check your internet connection and try again.".to_string()
            }
            ErrorCategory::Authentication => {
                "Authentication failed. Please check your API credentials.".to_string()
            }
            ErrorCategory::Validation => format!("Input validation error: {self}"),
            ErrorCategory::Security => {
                "Security violation detected. Operation blocked for safety.".to_string()
            }
            ErrorCategory::ToolExecution => {
                "Tool execution failed. The requested operation could not be completed.".to_string()
            }
            ErrorCategory::Database => "Database error. Please try again later.".to_string(),
            ErrorCategory::Cache => {
                "Cache operation failed. Continuing without cache optimization.".to_string()
            }
            ErrorCategory::Unknown => {
                "An unexpected error occurred. Please try again later.".to_string()
            }
        }
    }
}

/// Canned response when a component is down and the turn cannot complete.
pub fn graceful_degradation_message(category: ErrorCategory) -> String {
    let message = match category {
        ErrorCategory::Cache => "Cache unavailable, processing without cache optimization",
        ErrorCategory::ToolExecution => {
            "I'm sorry, I can't access live data right now. Please try again later."
        }
        ErrorCategory::Database => "Database is temporarily unavailable. Please contact support.",
        ErrorCategory::Connectivity => {
            "The language model service is temporarily unavailable. Please try again later."
        }
        _ => "System is experiencing issues. Please try again later.",
    };

    tracing::warn!(category = category.as_str(), message, "graceful degradation activated");
    message.to_string()
}

impl From<serde_json::Error> for FactError {
    fn from(e: serde_json::Error) -> Self {
        FactError::Serialization(e.to_string())
    }
}
