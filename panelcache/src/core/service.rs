use super::aggregator::{Aggregator, Composite, CompositeResult, Source};
use super::error::{CacheError, Result};
use super::flight::FetchCoordinator;
use super::store::CacheStore;
use super::types::{CacheConfig, CacheStats, KeyInfo};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

enum Lookup<V> {
    Fresh(Arc<V>),
    Stale(Arc<V>),
    Missing,
}

/// Read-through cache with per-key TTL and single-flight fetches.
///
/// Each instance owns its store, flight table and counters; construct one
/// per consumer group (or per test) instead of sharing process-wide state.
/// Cloning is cheap and shares the same state.
pub struct CacheService<V> {
    store: CacheStore<V>,
    coordinator: FetchCoordinator<V>,
    aggregator: Aggregator,
    config: Arc<CacheConfig>,
    stats: Arc<RwLock<CacheStats>>,
}

impl<V> CacheService<V>
where
    V: Send + Sync + 'static,
{
    /// Create a new cache service with the given configuration
    pub fn new(config: CacheConfig) -> Self {
        info!(
            "Initializing cache service with max_wait={:?}, default_ttl={:?}, source_timeout={:?}",
            config.max_wait, config.default_ttl, config.source_timeout
        );

        let store = CacheStore::new();
        let stats = Arc::new(RwLock::new(CacheStats::default()));
        let coordinator = FetchCoordinator::new(store.clone(), Arc::clone(&stats), config.max_wait);

        Self {
            store,
            coordinator,
            aggregator: Aggregator::new(config.source_timeout),
            config: Arc::new(config),
            stats,
        }
    }

    /// TTL configured for `key`
    pub fn ttl_for(&self, key: &str) -> Duration {
        self.config.ttl_for(key)
    }

    /// Return the fresh cached value for `key`, or fetch it (once, however
    /// many callers ask concurrently) and cache it for `ttl`.
    pub async fn get<F, Fut>(&self, key: &str, fetch: F, ttl: Duration) -> Result<Arc<V>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        match self.lookup(key) {
            Lookup::Fresh(value) => Ok(value),
            Lookup::Stale(_) | Lookup::Missing => {
                self.coordinator.run_exclusive(key, ttl, fetch).await
            }
        }
    }

    /// Drop `key` and fetch it again. Concurrent refreshes of one key share
    /// a single fetch.
    pub async fn refresh<F, Fut>(&self, key: &str, fetch: F, ttl: Duration) -> Result<Arc<V>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        self.begin_refresh(key);
        self.get(key, fetch, ttl).await
    }

    /// Invalidate `key` ahead of a reload, unless a fetch that started after
    /// the last invalidation is already running; the reload then joins it.
    ///
    /// Returns `true` if the key was invalidated.
    pub fn begin_refresh(&self, key: &str) -> bool {
        match self.coordinator.invalidate_or_join(key) {
            Some(seq) => {
                debug!("REFRESH key={} joins running fetch {}", key, seq);
                false
            }
            None => {
                self.stats.write().invalidations += 1;
                info!("Invalidated key={} for refresh", key);
                true
            }
        }
    }

    /// Fetch several sources concurrently under one key.
    ///
    /// Same TTL and single-flight contract as [`get`](Self::get). Failed
    /// sources are recorded in the composite; when the key is refetched
    /// after going stale, a failed source keeps its previous value. The
    /// fetch fails only when every source failed.
    pub async fn get_composite<T>(
        &self,
        key: &str,
        sources: Vec<Source<T>>,
        ttl: Duration,
    ) -> Result<Arc<V>>
    where
        T: Clone + Send + Sync + 'static,
        V: Composite<T>,
    {
        let previous = match self.lookup(key) {
            Lookup::Fresh(value) => return Ok(value),
            Lookup::Stale(value) => value.as_composite().cloned(),
            Lookup::Missing => None,
        };

        let aggregator = self.aggregator.clone();
        let owned_key = key.to_string();
        let fetch = move || async move {
            let count = sources.len();
            let mut result = aggregator.fetch_all(sources).await;
            if result.all_failed() {
                return Err(anyhow::Error::new(CacheError::AllSourcesFailed {
                    key: owned_key,
                    count,
                }));
            }
            if let Some(previous) = previous.as_ref() {
                result.carry_forward(previous);
            }
            Ok(V::from_composite(result))
        };

        self.coordinator.run_exclusive(key, ttl, fetch).await
    }

    /// Cached value for `key` whether fresh or stale; never fetches
    pub fn peek(&self, key: &str) -> Option<Arc<V>> {
        self.store.get(key).map(|entry| entry.value)
    }

    /// Drop `key`; the next `get` fetches. A fetch already running for the
    /// key still answers its own waiters but is not cached.
    pub fn invalidate(&self, key: &str) -> bool {
        let (removed, detached) = self.coordinator.invalidate(key);
        self.stats.write().invalidations += 1;

        info!(
            "Invalidated key={} (had_data={}, detached_fetch={})",
            key, removed, detached
        );
        removed
    }

    /// Drop every key
    pub fn invalidate_all(&self) -> usize {
        let (count, detached) = self.coordinator.invalidate_all();
        self.stats.write().invalidations += 1;

        info!(
            "Invalidated all keys ({} entries, {} running fetches detached)",
            count, detached
        );
        count
    }

    /// Per-key diagnostics; never fetches
    pub fn info(&self) -> BTreeMap<String, KeyInfo> {
        let mut info = BTreeMap::new();

        for entry in self.store.entries() {
            let in_flight_for = self.coordinator.in_flight_for(&entry.key);
            info.insert(
                entry.key.clone(),
                KeyInfo {
                    has_data: true,
                    age_seconds: Some(entry.age().as_secs()),
                    is_fresh: entry.is_fresh(),
                    ttl_seconds: Some(entry.ttl.as_secs()),
                    in_flight: in_flight_for.is_some(),
                    in_flight_for_ms: in_flight_for.map(|d| d.as_millis() as u64),
                    stored_at: Some(entry.stored_at_utc),
                },
            );
        }

        for (key, running) in self.coordinator.in_flight() {
            info.entry(key).or_insert(KeyInfo {
                has_data: false,
                age_seconds: None,
                is_fresh: false,
                ttl_seconds: None,
                in_flight: true,
                in_flight_for_ms: Some(running.as_millis() as u64),
                stored_at: None,
            });
        }

        info
    }

    /// Get statistics
    pub fn stats(&self) -> CacheStats {
        self.stats.read().clone()
    }

    fn lookup(&self, key: &str) -> Lookup<V> {
        let lookup = match self.store.get(key) {
            Some(entry) if entry.is_fresh() => Lookup::Fresh(entry.value),
            Some(entry) => {
                debug!("STALE key={}, age={:?}, ttl={:?}", key, entry.age(), entry.ttl);
                Lookup::Stale(entry.value)
            }
            None => Lookup::Missing,
        };

        let mut stats = self.stats.write();
        match lookup {
            Lookup::Fresh(_) => {
                stats.hits += 1;
                debug!("HIT key={}", key);
            }
            Lookup::Stale(_) | Lookup::Missing => {
                stats.misses += 1;
                debug!("MISS key={}", key);
            }
        }
        lookup
    }
}

impl<V> Clone for CacheService<V> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            coordinator: self.coordinator.clone(),
            aggregator: self.aggregator.clone(),
            config: Arc::clone(&self.config),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<V> Default for CacheService<V>
where
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl FnOnce() -> std::future::Ready<anyhow::Result<u32>> + Send + 'static {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(value))
        }
    }

    #[tokio::test]
    async fn test_get_caches_value() {
        let cache = CacheService::<u32>::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(60);

        let first = cache.get("kpi", counted(&calls, 1), ttl).await.unwrap();
        let second = cache.get("kpi", counted(&calls, 2), ttl).await.unwrap();

        assert_eq!(*first, 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.fetches, 1);
    }

    #[tokio::test]
    async fn test_refresh_always_fetches() {
        let cache = CacheService::<u32>::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(60);

        cache.get("kpi", counted(&calls, 1), ttl).await.unwrap();
        let refreshed = cache.refresh("kpi", counted(&calls, 2), ttl).await.unwrap();

        assert_eq!(*refreshed, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_peek_never_fetches() {
        let cache = CacheService::<u32>::default();
        assert!(cache.peek("kpi").is_none());

        cache
            .get("kpi", || async { anyhow::Ok(3) }, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.peek("kpi").as_deref(), Some(&3));
        assert_eq!(cache.stats().fetches, 1);
    }

    #[tokio::test]
    async fn test_info_reports_entries_without_fetching() {
        let cache = CacheService::<u32>::default();
        assert!(cache.info().is_empty());

        cache
            .get("dashboard.orders", || async { anyhow::Ok(1) }, Duration::from_secs(120))
            .await
            .unwrap();

        let info = cache.info();
        let orders = &info["dashboard.orders"];
        assert!(orders.has_data);
        assert!(orders.is_fresh);
        assert!(!orders.in_flight);
        assert_eq!(orders.ttl_seconds, Some(120));
        assert_eq!(orders.age_seconds, Some(0));
        assert!(orders.stored_at.is_some());
        assert_eq!(cache.stats().fetches, 1);
    }

    #[tokio::test]
    async fn test_invalidate_all() {
        let cache = CacheService::<u32>::default();
        let ttl = Duration::from_secs(60);

        cache.get("a", || async { anyhow::Ok(1) }, ttl).await.unwrap();
        cache.get("b", || async { anyhow::Ok(2) }, ttl).await.unwrap();

        assert_eq!(cache.invalidate_all(), 2);
        assert!(cache.info().is_empty());
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[tokio::test]
    async fn test_all_failed_composite_is_not_cached() {
        let cache = CacheService::<CompositeResult<u32>>::default();

        let result = cache
            .get_composite(
                "kpi",
                vec![
                    Source::new("orders", || async { Err::<u32, _>(anyhow::anyhow!("down")) }),
                    Source::new("tasks", || async { Err::<u32, _>(anyhow::anyhow!("down")) }),
                ],
                Duration::from_secs(60),
            )
            .await;

        assert_eq!(
            result.unwrap_err(),
            CacheError::AllSourcesFailed {
                key: "kpi".into(),
                count: 2
            }
        );
        assert!(cache.peek("kpi").is_none());
    }
}
