// Runtime metrics for query turns and tool executions.

pub mod metrics;

pub use metrics::{MetricsCollector, SystemMetrics, ToolMetrics};
