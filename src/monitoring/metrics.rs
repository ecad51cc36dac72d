// # Metrics Collection
//
// Aggregate counters for tool executions and query turns. Cheap atomic
// updates on the hot path; snapshots are assembled on demand.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Bounded number of latency samples retained per phase.
const LATENCY_WINDOW: usize = 1_000;

#[derive(Debug, Default)]
struct ToolCounters {
    executions: AtomicU64,
    failures: AtomicU64,
    total_time_us: AtomicU64,
}

/// Per-tool execution statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetrics {
    pub tool_name: String,
    pub executions: u64,
    pub failures: u64,
    pub avg_execution_time_ms: f64,
}

/// System-wide snapshot for health reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub total_executions: u64,
    pub failed_executions: u64,
    pub error_rate: f64,
    pub total_turns: u64,
    pub cache_hit_turns: u64,
    pub avg_hit_latency_ms: f64,
    pub avg_miss_latency_ms: f64,
    /// Configured latency targets the averages are reported against.
    pub hit_target_ms: f64,
    pub miss_target_ms: f64,
}

/// Collector shared by the driver and the tool executor.
pub struct MetricsCollector {
    hit_target_ms: f64,
    miss_target_ms: f64,

    total_executions: AtomicU64,
    failed_executions: AtomicU64,
    tool_counters: DashMap<String, ToolCounters>,

    total_turns: AtomicU64,
    cache_hit_turns: AtomicU64,
    hit_latencies: Mutex<VecDeque<f64>>,
    miss_latencies: Mutex<VecDeque<f64>>,
}

impl MetricsCollector {
    pub fn new(hit_target_ms: f64, miss_target_ms: f64) -> Self {
        Self {
            hit_target_ms,
            miss_target_ms,
            total_executions: AtomicU64::new(0),
            failed_executions: AtomicU64::new(0),
            tool_counters: DashMap::new(),
            total_turns: AtomicU64::new(0),
            cache_hit_turns: AtomicU64::new(0),
            hit_latencies: Mutex::new(VecDeque::new()),
            miss_latencies: Mutex::new(VecDeque::new()),
        }
    }

    /// Record one tool execution.
    pub fn record_tool_execution(
        &self,
        tool_name: &str,
        success: bool,
        execution_time_ms: f64,
        error_kind: Option<&str>,
    ) {
        self.total_executions.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_executions.fetch_add(1, Ordering::Relaxed);
        }

        let counters = self
            .tool_counters
            .entry(tool_name.to_string())
            .or_default();
        counters.executions.fetch_add(1, Ordering::Relaxed);
        if !success {
            counters.failures.fetch_add(1, Ordering::Relaxed);
        }
        counters
            .total_time_us
            .fetch_add((execution_time_ms * 1000.0) as u64, Ordering::Relaxed);

        if let Some(kind) = error_kind {
            tracing::debug!(tool_name, error_kind = kind, "tool execution error recorded");
        }
    }

    /// Record one completed query turn and its end-to-end latency.
    pub fn record_query_turn(&self, cache_hit: bool, latency_ms: f64) {
        self.total_turns.fetch_add(1, Ordering::Relaxed);
        let samples = if cache_hit {
            self.cache_hit_turns.fetch_add(1, Ordering::Relaxed);
            &self.hit_latencies
        } else {
            &self.miss_latencies
        };

        let mut samples = samples.lock();
        samples.push_back(latency_ms);
        if samples.len() > LATENCY_WINDOW {
            samples.pop_front();
        }
    }

    pub fn get_system_metrics(&self) -> SystemMetrics {
        let total = self.total_executions.load(Ordering::Relaxed);
        let failed = self.failed_executions.load(Ordering::Relaxed);

        SystemMetrics {
            total_executions: total,
            failed_executions: failed,
            error_rate: if total == 0 {
                0.0
            } else {
                failed as f64 / total as f64
            },
            total_turns: self.total_turns.load(Ordering::Relaxed),
            cache_hit_turns: self.cache_hit_turns.load(Ordering::Relaxed),
            avg_hit_latency_ms: average(&self.hit_latencies.lock()),
            avg_miss_latency_ms: average(&self.miss_latencies.lock()),
            hit_target_ms: self.hit_target_ms,
            miss_target_ms: self.miss_target_ms,
        }
    }

    pub fn get_tool_metrics(&self) -> Vec<ToolMetrics> {
        let mut metrics: Vec<ToolMetrics> = self
            .tool_counters
            .iter()
            .map(|entry| {
                let executions = entry.executions.load(Ordering::Relaxed);
                let total_us = entry.total_time_us.load(Ordering::Relaxed);
                ToolMetrics {
                    tool_name: entry.key().clone(),
                    executions,
                    failures: entry.failures.load(Ordering::Relaxed),
                    avg_execution_time_ms: if executions == 0 {
                        0.0
                    } else {
                        total_us as f64 / 1000.0 / executions as f64
                    },
                }
            })
            .collect();
        metrics.sort_by(|a, b| a.tool_name.cmp(&b.tool_name));
        metrics
    }
}

fn average(samples: &VecDeque<f64>) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_rate() {
        let collector = MetricsCollector::new(30.0, 120.0);
        collector.record_tool_execution("SQL_QueryReadonly", true, 10.0, None);
        collector.record_tool_execution("SQL_QueryReadonly", false, 5.0, Some("security"));

        let metrics = collector.get_system_metrics();
        assert_eq!(metrics.total_executions, 2);
        assert_eq!(metrics.failed_executions, 1);
        assert!((metrics.error_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_per_tool_breakdown() {
        let collector = MetricsCollector::new(30.0, 120.0);
        collector.record_tool_execution("SQL_QueryReadonly", true, 10.0, None);
        collector.record_tool_execution("SQL_QueryReadonly", true, 20.0, None);
        collector.record_tool_execution("SQL_GetSchema", true, 2.0, None);

        let tools = collector.get_tool_metrics();
        assert_eq!(tools.len(), 2);
        let query = tools.iter().find(|t| t.tool_name == "SQL_QueryReadonly").unwrap();
        assert_eq!(query.executions, 2);
        assert!((query.avg_execution_time_ms - 15.0).abs() < 0.01);
    }

    #[test]
    fn test_turn_latency_split() {
        let collector = MetricsCollector::new(30.0, 120.0);
        collector.record_query_turn(true, 12.0);
        collector.record_query_turn(false, 200.0);
        collector.record_query_turn(false, 100.0);

        let metrics = collector.get_system_metrics();
        assert_eq!(metrics.total_turns, 3);
        assert_eq!(metrics.cache_hit_turns, 1);
        assert!((metrics.avg_hit_latency_ms - 12.0).abs() < f64::EPSILON);
        assert!((metrics.avg_miss_latency_ms - 150.0).abs() < f64::EPSILON);
    }
}
