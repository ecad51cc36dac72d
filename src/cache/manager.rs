// # Response Cache
//
// Content-addressed store for generated responses. Keys are SHA-256
// fingerprints of the normalized query; entries carry token and byte
// accounting so the driver can make storage decisions. Eviction combines
// TTL expiry with LRU under a byte cap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cache::metrics::CacheMetrics;
use crate::error::{FactError, Result};

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Namespace label carried in logs and health reports.
    pub prefix: String,

    /// Minimum token estimate for an entry to be admitted.
    pub min_tokens: usize,

    /// Total resident byte budget.
    pub max_size_bytes: usize,

    /// Largest single entry accepted.
    pub max_entry_bytes: usize,

    /// Entry lifetime in seconds.
    pub ttl_seconds: u64,

    /// Latency target for hits, milliseconds. Reported against, not enforced.
    pub hit_target_ms: f64,

    /// Latency target for misses, milliseconds.
    pub miss_target_ms: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: "fact_v1".to_string(),
            min_tokens: 50,
            max_size_bytes: 10 * 1024 * 1024,
            max_entry_bytes: 1024 * 1024,
            ttl_seconds: 3_600,
            hit_target_ms: 30.0,
            miss_target_ms: 120.0,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_size_bytes == 0 {
            return Err(FactError::Configuration(
                "max_size_bytes must be greater than 0".to_string(),
            ));
        }
        if self.max_entry_bytes > self.max_size_bytes {
            return Err(FactError::Configuration(
                "max_entry_bytes cannot exceed max_size_bytes".to_string(),
            ));
        }
        if self.ttl_seconds == 0 {
            return Err(FactError::Configuration(
                "ttl_seconds must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// One cached response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// 64-hex-char content fingerprint of the normalized query.
    pub hash: String,

    /// The response text.
    pub content: String,

    /// Deterministic token estimate for the content.
    pub token_count: usize,

    /// UTF-8 byte length of the content.
    pub byte_size: usize,

    /// Wall-clock creation time.
    pub created_at: DateTime<Utc>,

    /// Wall-clock time of the most recent access.
    pub last_access_at: DateTime<Utc>,

    /// Number of hits served from this entry.
    pub access_count: u64,

    created: Instant,
    last_access: Instant,
}

impl CacheEntry {
    fn new(hash: String, content: String, token_count: usize) -> Self {
        let byte_size = content.len();
        let now = Instant::now();
        let wall = Utc::now();
        Self {
            hash,
            content,
            token_count,
            byte_size,
            created_at: wall,
            last_access_at: wall,
            access_count: 0,
            created: now,
            last_access: now,
        }
    }

    /// Tokens per KiB of content.
    pub fn token_efficiency(&self) -> f64 {
        if self.byte_size == 0 {
            0.0
        } else {
            self.token_count as f64 / (self.byte_size as f64 / 1024.0)
        }
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.created.elapsed() > ttl
    }

    fn mark_accessed(&mut self) {
        self.access_count += 1;
        self.last_access = Instant::now();
        self.last_access_at = Utc::now();
    }
}

/// Deterministic token estimate: whitespace-delimited word count.
pub fn estimate_tokens(content: &str) -> usize {
    content.split_whitespace().count()
}

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    bytes_resident: usize,
}

/// Content-addressed response cache with TTL and LRU eviction.
///
/// All operations take a single lock; `get` is atomic with respect to its
/// access-count update.
pub struct CacheManager {
    config: CacheConfig,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    evictions: AtomicU64,
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                bytes_resident: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stores: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Canonical fingerprint: SHA-256 of the lowercased, trimmed query.
    /// Stable for the process lifetime.
    pub fn generate_hash(&self, query: &str) -> String {
        let normalized = query.trim().to_lowercase();
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Look up an entry. A hit bumps `access_count` and the last-access
    /// timestamps atomically; an expired entry counts as a miss and is
    /// removed.
    pub fn get(&self, hash: &str) -> Option<CacheEntry> {
        let ttl = Duration::from_secs(self.config.ttl_seconds);
        let mut state = self.state.lock();

        let expired = match state.entries.get(hash) {
            Some(entry) => entry.is_expired(ttl),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if expired {
            if let Some(old) = state.entries.remove(hash) {
                state.bytes_resident = state.bytes_resident.saturating_sub(old.byte_size);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let entry = state.entries.get_mut(hash).expect("entry checked above");
        entry.mark_accessed();
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.clone())
    }

    /// Admit a response. Rejects content below the token floor or above the
    /// per-entry byte cap; evicts least-recently-used entries until the new
    /// entry fits. Storing under an existing hash replaces the old entry.
    pub fn store(&self, hash: &str, content: &str) -> Result<CacheEntry> {
        let token_count = estimate_tokens(content);
        if token_count < self.config.min_tokens {
            return Err(FactError::InsufficientTokens {
                token_count,
                min_tokens: self.config.min_tokens,
            });
        }

        let byte_size = content.len();
        if byte_size == 0 {
            return Err(FactError::Cache("refusing to store empty content".to_string()));
        }
        if byte_size > self.config.max_entry_bytes {
            return Err(FactError::Oversize {
                byte_size,
                max_bytes: self.config.max_entry_bytes,
            });
        }

        let ttl = Duration::from_secs(self.config.ttl_seconds);
        let mut state = self.state.lock();

        // Replacing an existing entry releases its bytes first.
        if let Some(old) = state.entries.remove(hash) {
            state.bytes_resident = state.bytes_resident.saturating_sub(old.byte_size);
        }

        self.sweep_expired_locked(&mut state, ttl);

        while state.bytes_resident + byte_size > self.config.max_size_bytes {
            if !self.evict_one_locked(&mut state) {
                return Err(FactError::CacheFull);
            }
        }

        let entry = CacheEntry::new(hash.to_string(), content.to_string(), token_count);
        state.bytes_resident += byte_size;
        state.entries.insert(hash.to_string(), entry.clone());
        self.stores.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            hash = %&hash[..hash.len().min(12)],
            token_count,
            byte_size,
            "response cached"
        );

        Ok(entry)
    }

    /// Remove expired entries. Used by the background sweep.
    pub fn remove_expired(&self) -> usize {
        let ttl = Duration::from_secs(self.config.ttl_seconds);
        let mut state = self.state.lock();
        self.sweep_expired_locked(&mut state, ttl)
    }

    pub fn get_metrics(&self) -> CacheMetrics {
        let state = self.state.lock();
        let tokens_resident = state.entries.values().map(|e| e.token_count).sum();

        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries_resident: state.entries.len(),
            bytes_resident: state.bytes_resident,
            tokens_resident,
        }
    }

    fn sweep_expired_locked(&self, state: &mut CacheState, ttl: Duration) -> usize {
        let expired: Vec<String> = state
            .entries
            .values()
            .filter(|e| e.is_expired(ttl))
            .map(|e| e.hash.clone())
            .collect();

        for hash in &expired {
            if let Some(old) = state.entries.remove(hash) {
                state.bytes_resident = state.bytes_resident.saturating_sub(old.byte_size);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        expired.len()
    }

    /// Evict the least-recently-accessed entry. Ties go to the lower
    /// access count, then the older creation time.
    fn evict_one_locked(&self, state: &mut CacheState) -> bool {
        let victim = state
            .entries
            .values()
            .min_by(|a, b| {
                a.last_access
                    .cmp(&b.last_access)
                    .then(a.access_count.cmp(&b.access_count))
                    .then(a.created.cmp(&b.created))
            })
            .map(|e| e.hash.clone());

        match victim {
            Some(hash) => {
                if let Some(old) = state.entries.remove(&hash) {
                    state.bytes_resident = state.bytes_resident.saturating_sub(old.byte_size);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                true
            }
            None => false,
        }
    }
}

/// Handle for the background expiry sweep.
pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Spawn the periodic expiry sweep. The task holds only a weak handle and
/// exits when the cache is dropped or the shutdown signal fires.
pub fn spawn_maintenance(cache: &Arc<CacheManager>, interval: Duration) -> MaintenanceHandle {
    let weak: Weak<CacheManager> = Arc::downgrade(cache);
    let (shutdown, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = ticker.tick() => {
                    let Some(cache) = weak.upgrade() else { break };
                    let removed = cache.remove_expired();
                    if removed > 0 {
                        tracing::debug!(removed, "expired cache entries swept");
                    }
                }
            }
        }
    });

    MaintenanceHandle { shutdown, task }
}
