// # Resilient Response Cache
//
// Content-addressed caching for generated responses, wrapped in a circuit
// breaker so a degraded cache slows nothing down.
//
// ## Overview
//
// - **CacheManager**: SHA-256 fingerprinted store with TTL expiry, a byte
//   cap with LRU eviction, and token accounting
// - **CircuitBreaker**: Closed / Open / HalfOpen failure isolation with a
//   rolling failure window and gradual re-admission
// - **ResilientCache**: the composition the driver talks to, plus an
//   optional background health probe
//
// ## Data flow
//
// ```text
// Driver ──> ResilientCache ──> CircuitBreaker ──> CacheManager
//                 │                                    │
//            health probe                     TTL + LRU eviction
// ```
//
// The cache is process-local. Nothing here survives a restart, and two
// concurrent turns with the same fingerprint may both compute; the second
// store simply refreshes the entry.

pub mod circuit_breaker;
pub mod manager;
pub mod metrics;
pub mod resilient;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use manager::{
    estimate_tokens, spawn_maintenance, CacheConfig, CacheEntry, CacheManager, MaintenanceHandle,
};
pub use metrics::CacheMetrics;
pub use resilient::{CacheStore, ResilientCache, ResilientCacheMetrics};
