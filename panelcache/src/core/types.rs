use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Cached value with freshness metadata
#[derive(Debug)]
pub struct CacheEntry<V> {
    /// Logical cache key
    pub key: String,
    /// Shared value handed out to every reader
    pub value: Arc<V>,
    /// When the value was stored (monotonic)
    pub stored_at: Instant,
    /// When the value was stored (wall clock, diagnostics only)
    pub stored_at_utc: DateTime<Utc>,
    /// Time-to-live for this entry
    pub ttl: Duration,
    /// Sequence number of the fetch that produced the value
    pub fetch_seq: u64,
}

impl<V> CacheEntry<V> {
    /// Age of the entry
    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.stored_at)
    }

    /// Fresh iff `now - stored_at < ttl`
    pub fn is_fresh(&self) -> bool {
        self.age() < self.ttl
    }
}

impl<V> Clone for CacheEntry<V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            value: Arc::clone(&self.value),
            stored_at: self.stored_at,
            stored_at_utc: self.stored_at_utc,
            ttl: self.ttl,
            fetch_seq: self.fetch_seq,
        }
    }
}

/// Configuration for a cache service
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long a caller joining an in-flight fetch waits before fetching itself
    pub max_wait: Duration,
    /// Per-source deadline inside composite fetches
    pub source_timeout: Option<Duration>,
    /// TTL used for keys without an override
    pub default_ttl: Duration,
    /// Per-key TTL overrides
    pub ttl_overrides: HashMap<String, Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(3),
            source_timeout: None,
            default_ttl: Duration::from_secs(300),
            ttl_overrides: HashMap::new(),
        }
    }
}

impl CacheConfig {
    /// Set the bounded wait for joiners
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Set the per-source deadline
    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = Some(timeout);
        self
    }

    /// Set the default TTL
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Override the TTL of one key
    pub fn with_ttl(mut self, key: impl Into<String>, ttl: Duration) -> Self {
        self.ttl_overrides.insert(key.into(), ttl);
        self
    }

    /// TTL configured for a key
    pub fn ttl_for(&self, key: &str) -> Duration {
        self.ttl_overrides
            .get(key)
            .copied()
            .unwrap_or(self.default_ttl)
    }
}

/// Counters for one cache service
#[derive(Debug, Default, Clone, Serialize)]
pub struct CacheStats {
    /// Reads served from a fresh entry
    pub hits: u64,
    /// Reads that found no entry or a stale one
    pub misses: u64,
    /// Fetches actually started
    pub fetches: u64,
    /// Reads that joined an in-flight fetch instead of starting one
    pub coalesced: u64,
    /// Fetches that ended in an error
    pub fetch_failures: u64,
    /// Joiners that gave up waiting and fetched themselves
    pub wait_timeouts: u64,
    /// Explicit invalidations (single key or all)
    pub invalidations: u64,
}

impl CacheStats {
    /// Calculate hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Introspection record for one key, see `CacheService::info`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyInfo {
    pub has_data: bool,
    pub age_seconds: Option<u64>,
    pub is_fresh: bool,
    pub ttl_seconds: Option<u64>,
    pub in_flight: bool,
    /// How long the running fetch has been in flight
    pub in_flight_for_ms: Option<u64>,
    pub stored_at: Option<DateTime<Utc>>,
}
