// # Cache Metrics
//
// Derived counters for the response cache. Nothing here is stored with
// the entries; snapshots are computed on demand.

use serde::{Deserialize, Serialize};

/// Point-in-time cache performance snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheMetrics {
    /// Total number of cache hits
    pub hits: u64,

    /// Total number of cache misses
    pub misses: u64,

    /// Total number of successful stores
    pub stores: u64,

    /// Total number of evicted entries (TTL and capacity combined)
    pub evictions: u64,

    /// Entries currently resident
    pub entries_resident: usize,

    /// Bytes currently resident
    pub bytes_resident: usize,

    /// Token estimate summed over resident entries
    pub tokens_resident: usize,
}

impl CacheMetrics {
    /// Hit rate in [0.0, 1.0]; 0.0 when no requests have been served.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Tokens per KiB of resident content. Higher is cheaper to re-serve.
    pub fn token_efficiency(&self) -> f64 {
        if self.bytes_resident == 0 {
            0.0
        } else {
            self.tokens_resident as f64 / (self.bytes_resident as f64 / 1024.0)
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses
    }
}
