use super::types::CacheEntry;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Keyed storage of cache entries with lazy freshness evaluation.
///
/// Entries are never swept in the background: a stale entry stays in place
/// until it is overwritten by the next successful fetch or explicitly
/// invalidated.
pub struct CacheStore<V> {
    inner: Arc<RwLock<StoreInner<V>>>,
    /// Monotonic counter ordering fetches against invalidations
    seq: Arc<AtomicU64>,
}

struct StoreInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Per-key invalidation marks; fetches started before them are not stored
    floors: HashMap<String, u64>,
    /// Invalidation mark of the last `clear`
    floor_all: u64,
}

impl<V> CacheStore<V> {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner {
                entries: HashMap::new(),
                floors: HashMap::new(),
                floor_all: 0,
            })),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Next sequence number, strictly increasing
    pub(crate) fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Look up an entry, fresh or stale
    pub fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        self.inner.read().entries.get(key).cloned()
    }

    /// Store a value, overwriting any prior entry
    pub fn set(&self, key: &str, value: V, ttl: Duration) -> Arc<V> {
        let value = Arc::new(value);
        let seq = self.next_seq();
        let mut inner = self.inner.write();
        inner
            .entries
            .insert(key.to_string(), Self::entry(key, Arc::clone(&value), ttl, seq));
        debug!("STORE SET key={}, ttl={:?}", key, ttl);
        value
    }

    /// Store the result of a fetch that started at `seq`.
    ///
    /// Rejected when the key was invalidated after the fetch started, or when
    /// the current entry comes from a fetch that started later.
    pub(crate) fn set_from_fetch(&self, key: &str, value: Arc<V>, ttl: Duration, seq: u64) -> bool {
        let mut inner = self.inner.write();

        let floor = inner
            .floors
            .get(key)
            .copied()
            .unwrap_or(0)
            .max(inner.floor_all);
        if seq < floor {
            debug!("STORE REJECT key={} (invalidated after fetch {} started)", key, seq);
            return false;
        }
        if inner
            .entries
            .get(key)
            .is_some_and(|existing| existing.fetch_seq > seq)
        {
            debug!("STORE REJECT key={} (newer fetch already stored)", key);
            return false;
        }

        inner
            .entries
            .insert(key.to_string(), Self::entry(key, value, ttl, seq));
        debug!("STORE SET key={}, ttl={:?}, fetch={}", key, ttl, seq);
        true
    }

    /// Invalidation mark currently applying to `key`; fetches with a lower
    /// sequence number will not be stored
    pub(crate) fn invalidated_at(&self, key: &str) -> u64 {
        let inner = self.inner.read();
        inner
            .floors
            .get(key)
            .copied()
            .unwrap_or(0)
            .max(inner.floor_all)
    }

    /// `false` if absent, else `now - stored_at < ttl`
    pub fn is_fresh(&self, key: &str) -> bool {
        self.inner
            .read()
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_fresh())
    }

    /// Drop one entry; fetches already running for it will not be stored
    pub fn delete(&self, key: &str) -> bool {
        let mark = self.next_seq();
        let mut inner = self.inner.write();
        inner.floors.insert(key.to_string(), mark);
        let removed = inner.entries.remove(key).is_some();
        debug!("STORE DELETE key={}, removed={}", key, removed);
        removed
    }

    /// Drop every entry; fetches already running will not be stored
    pub fn clear(&self) -> usize {
        let mark = self.next_seq();
        let mut inner = self.inner.write();
        let count = inner.entries.len();
        inner.entries.clear();
        inner.floors.clear();
        inner.floor_all = mark;
        debug!("STORE CLEAR ({} entries)", count);
        count
    }

    /// All keys currently holding an entry
    pub fn keys(&self) -> Vec<String> {
        self.inner.read().entries.keys().cloned().collect()
    }

    /// Snapshot of every entry
    pub fn entries(&self) -> Vec<CacheEntry<V>> {
        self.inner.read().entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    fn entry(key: &str, value: Arc<V>, ttl: Duration, seq: u64) -> CacheEntry<V> {
        CacheEntry {
            key: key.to_string(),
            value,
            stored_at: Instant::now(),
            stored_at_utc: Utc::now(),
            ttl,
            fetch_seq: seq,
        }
    }
}

impl<V> Default for CacheStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Clone for CacheStore<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            seq: Arc::clone(&self.seq),
        }
    }
}
