// # Resilient Cache Wrapper
//
// Composes the cache with the circuit breaker: every operation the driver
// issues goes through the breaker, and an optional background probe keeps
// feeding the breaker so a dead cache can re-close even without traffic.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cache::circuit_breaker::{CircuitBreaker, CircuitBreakerMetrics, CircuitState};
use crate::cache::manager::{CacheEntry, CacheManager};
use crate::cache::metrics::CacheMetrics;
use crate::error::Result;

/// Storage seam between the resilient wrapper and the cache proper.
///
/// `CacheManager` is the in-process implementation; a remote store would
/// implement the same surface. Operations are non-blocking.
pub trait CacheStore: Send + Sync {
    fn generate_hash(&self, query: &str) -> String;
    fn get(&self, hash: &str) -> Result<Option<CacheEntry>>;
    fn store(&self, hash: &str, content: &str) -> Result<CacheEntry>;
    fn get_metrics(&self) -> CacheMetrics;
}

impl CacheStore for CacheManager {
    fn generate_hash(&self, query: &str) -> String {
        CacheManager::generate_hash(self, query)
    }

    fn get(&self, hash: &str) -> Result<Option<CacheEntry>> {
        Ok(CacheManager::get(self, hash))
    }

    fn store(&self, hash: &str, content: &str) -> Result<CacheEntry> {
        CacheManager::store(self, hash, content)
    }

    fn get_metrics(&self) -> CacheMetrics {
        CacheManager::get_metrics(self)
    }
}

/// Combined health snapshot for reporting.
#[derive(Debug, Clone)]
pub struct ResilientCacheMetrics {
    pub cache: CacheMetrics,
    pub circuit_breaker: CircuitBreakerMetrics,
}

/// The driver's only path to the cache.
pub struct ResilientCache {
    store: Arc<dyn CacheStore>,
    breaker: Arc<CircuitBreaker>,
    probe: parking_lot::Mutex<Option<ProbeHandle>>,
}

struct ProbeHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ResilientCache {
    pub fn new(store: Arc<dyn CacheStore>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            store,
            breaker,
            probe: parking_lot::Mutex::new(None),
        }
    }

    pub fn generate_hash(&self, query: &str) -> String {
        self.store.generate_hash(query)
    }

    pub async fn get(&self, hash: &str) -> Result<Option<CacheEntry>> {
        let store = self.store.clone();
        let hash = hash.to_string();
        self.breaker.call(async move { store.get(&hash) }).await
    }

    pub async fn store(&self, hash: &str, content: &str) -> Result<CacheEntry> {
        let store = self.store.clone();
        let hash = hash.to_string();
        let content = content.to_string();
        self.breaker
            .call(async move { store.store(&hash, &content) })
            .await
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.get_state()
    }

    pub fn get_metrics(&self) -> ResilientCacheMetrics {
        ResilientCacheMetrics {
            cache: self.store.get_metrics(),
            circuit_breaker: self.breaker.get_metrics(),
        }
    }

    /// Start the background health probe: a sentinel `get` at a fixed
    /// interval whose outcome feeds the breaker, so recovery is observed
    /// even when no queries arrive.
    pub fn start_monitoring(&self, interval: Duration) {
        let mut slot = self.probe.lock();
        if slot.is_some() {
            return;
        }

        let store = self.store.clone();
        let breaker = self.breaker.clone();
        let sentinel = store.generate_hash("__fact_cache_health_probe__");
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        let store = store.clone();
                        let hash = sentinel.clone();
                        // A sentinel miss is still a healthy response.
                        let _ = breaker.call(async move { store.get(&hash) }).await;
                    }
                }
            }
        });

        *slot = Some(ProbeHandle { shutdown, task });
        tracing::debug!(interval_ms = interval.as_millis() as u64, "cache health probe started");
    }

    /// Stop the health probe if it is running.
    pub async fn stop_monitoring(&self) {
        let handle = self.probe.lock().take();
        if let Some(handle) = handle {
            let _ = handle.shutdown.send(true);
            let _ = handle.task.await;
            tracing::debug!("cache health probe stopped");
        }
    }
}
