// # Cache Circuit Breaker
//
// Three-state failure isolation for cache operations. A burst of cache
// failures opens the circuit and every call fails fast; after a cooldown
// a fraction of traffic is re-admitted to probe recovery.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{FactError, Result};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Requests flow normally; failures are counted in a rolling window.
    Closed,

    /// Requests fail fast until the cooldown elapses.
    Open,

    /// A fraction of requests is admitted to test recovery.
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures within the rolling window before the circuit opens.
    pub failure_threshold: u64,

    /// Consecutive half-open successes before the circuit closes.
    pub success_threshold: u64,

    /// Cooldown before an open circuit admits trial traffic.
    pub timeout_seconds: u64,

    /// Length of the failure-counting window.
    pub rolling_window_seconds: u64,

    /// Fraction of half-open traffic admitted, in (0.0, 1.0].
    pub recovery_factor: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout_seconds: 60,
            rolling_window_seconds: 300,
            recovery_factor: 0.5,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(FactError::Configuration(
                "failure_threshold must be greater than 0".to_string(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(FactError::Configuration(
                "success_threshold must be greater than 0".to_string(),
            ));
        }
        if !(self.recovery_factor > 0.0 && self.recovery_factor <= 1.0) {
            return Err(FactError::Configuration(
                "recovery_factor must be in (0.0, 1.0]".to_string(),
            ));
        }
        Ok(())
    }
}

struct BreakerInner {
    state: CircuitState,
    opened_at: Option<Instant>,
    /// Failure timestamps inside the rolling window (Closed state only).
    failures: VecDeque<Instant>,
    /// Consecutive successes while half-open.
    half_open_successes: u64,
}

/// Metrics snapshot for health reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub successes: u64,
    pub failures: u64,
    pub rejected_calls: u64,
    pub state_changes: u64,
    pub failure_rate: f64,
}

/// Circuit breaker for async cache operations.
///
/// State checks are non-blocking; only the wrapped operation is awaited.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    successes: AtomicU64,
    failures: AtomicU64,
    rejected_calls: AtomicU64,
    state_changes: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                opened_at: None,
                failures: VecDeque::new(),
                half_open_successes: 0,
            }),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            state_changes: AtomicU64::new(0),
        })
    }

    /// Run a cache operation under the breaker.
    ///
    /// Policy rejections from the cache (insufficient tokens, oversize)
    /// mean the cache is healthy; they propagate to the caller but are
    /// recorded as successes.
    pub async fn call<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if !self.allow_request() {
            self.rejected_calls.fetch_add(1, Ordering::Relaxed);
            return Err(FactError::CircuitOpen);
        }

        let result = operation.await;
        match &result {
            Ok(_)
            | Err(FactError::InsufficientTokens { .. })
            | Err(FactError::Oversize { .. }) => self.on_success(),
            Err(_) => self.on_failure(),
        }

        result
    }

    /// Current state, without side effects.
    pub fn get_state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn get_metrics(&self) -> CircuitBreakerMetrics {
        let successes = self.successes.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let total = successes + failures;

        CircuitBreakerMetrics {
            state: self.get_state(),
            successes,
            failures,
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
            state_changes: self.state_changes.load(Ordering::Relaxed),
            failure_rate: if total == 0 {
                0.0
            } else {
                failures as f64 / total as f64
            },
        }
    }

    /// Force the circuit open. Manual intervention and tests.
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Open);
    }

    /// Force the circuit closed.
    pub fn force_close(&self) {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Closed);
    }

    fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooldown = Duration::from_secs(self.config.timeout_seconds);
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= cooldown {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                rand::rng().random::<f64>() < self.config.recovery_factor
            }
        }
    }

    fn on_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => {
                // A success also ages out failures that left the window.
                self.prune_window(&mut inner);
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => {
                inner.failures.push_back(Instant::now());
                self.prune_window(&mut inner);
                if inner.failures.len() as u64 >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                // Any failure during recovery reopens the circuit.
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    fn prune_window(&self, inner: &mut BreakerInner) {
        let window = Duration::from_secs(self.config.rolling_window_seconds);
        let now = Instant::now();
        while let Some(front) = inner.failures.front() {
            if now.duration_since(*front) > window {
                inner.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn transition(&self, inner: &mut BreakerInner, next: CircuitState) {
        if inner.state == next {
            return;
        }

        let previous = inner.state;
        inner.state = next;
        self.state_changes.fetch_add(1, Ordering::Relaxed);

        match next {
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
                inner.half_open_successes = 0;
                tracing::warn!(?previous, "cache circuit breaker opened");
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes = 0;
                tracing::info!("cache circuit breaker half-open, testing recovery");
            }
            CircuitState::Closed => {
                inner.opened_at = None;
                inner.failures.clear();
                inner.half_open_successes = 0;
                tracing::info!(?previous, "cache circuit breaker closed");
            }
        }
    }
}
