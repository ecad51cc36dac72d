// # Tool Execution Engine
//
// Versioned tool registry, schema and security validation, and the
// concurrent executor that turns LLM tool-use requests into results.
//
// Execution path for one call:
//
// ```text
// ToolCall -> rate limit -> registry lookup -> security scan
//          -> parameter validation -> authorization -> gateway dispatch
//          -> normalized ToolResult
// ```

pub mod connectors;
pub mod executor;
pub mod gateway;
pub mod registry;
pub mod validation;

pub use executor::{ExecutorConfig, ToolCall, ToolExecutor, ToolResult};
pub use gateway::{RemoteExecutor, RoutePreference, ToolGateway};
pub use registry::{SyncTool, ToolDefinition, ToolHandler, ToolRegistry};
pub use validation::{ParameterValidator, SecurityValidator};
