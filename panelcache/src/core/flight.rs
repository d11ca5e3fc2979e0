//! Single-flight fetch coordination
//!
//! At most one fetch runs per key. Callers arriving while it runs join it
//! through a `watch` channel and receive the same result. A joiner waits at
//! most `max_wait`; after that the flight is treated as abandoned and the
//! joiner fetches on its own.

use super::error::{CacheError, Result};
use super::store::CacheStore;
use super::types::CacheStats;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// `None` until the owning fetch settles
type Outcome<V> = Option<Result<Arc<V>>>;

type FlightTable<V> = Arc<Mutex<HashMap<String, Flight<V>>>>;

/// An in-flight fetch for one key
struct Flight<V> {
    seq: u64,
    started_at: Instant,
    rx: watch::Receiver<Outcome<V>>,
}

enum Claim<V> {
    /// A fresh value landed while we were deciding
    Fresh(Arc<V>),
    /// Another caller owns the fetch
    Joined {
        seq: u64,
        rx: watch::Receiver<Outcome<V>>,
    },
    /// We own the fetch and must launch it
    Owned {
        seq: u64,
        tx: watch::Sender<Outcome<V>>,
        rx: watch::Receiver<Outcome<V>>,
    },
}

/// Clears the flight entry when the fetch task ends, including by panic
struct FlightGuard<V> {
    flights: FlightTable<V>,
    key: String,
    seq: u64,
}

impl<V> Drop for FlightGuard<V> {
    fn drop(&mut self) {
        let mut flights = self.flights.lock();
        if flights.get(&self.key).is_some_and(|f| f.seq == self.seq) {
            flights.remove(&self.key);
        }
    }
}

/// Per-key single-flight coordinator.
///
/// The coordinator is the only writer of flight state and the only component
/// that stores fetched values into the [`CacheStore`].
pub struct FetchCoordinator<V> {
    flights: FlightTable<V>,
    store: CacheStore<V>,
    stats: Arc<RwLock<CacheStats>>,
    max_wait: Duration,
}

impl<V> FetchCoordinator<V>
where
    V: Send + Sync + 'static,
{
    /// Create a coordinator writing into `store`
    pub fn new(store: CacheStore<V>, stats: Arc<RwLock<CacheStats>>, max_wait: Duration) -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
            store,
            stats,
            max_wait,
        }
    }

    /// Run `fetch` for `key` unless a fetch is already in flight, in which
    /// case wait for that one instead.
    ///
    /// The fetch runs on its own task: it completes (and stores its value
    /// with `ttl`) even if every caller stops waiting.
    pub async fn run_exclusive<F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        loop {
            match self.claim(key) {
                Claim::Fresh(value) => return Ok(value),
                Claim::Owned { seq, tx, rx } => {
                    self.launch(key, ttl, seq, tx, fetch);
                    return Self::wait(key, rx).await;
                }
                Claim::Joined { seq, rx } => {
                    self.stats.write().coalesced += 1;
                    debug!("JOIN key={}, fetch={}", key, seq);

                    match tokio::time::timeout(self.max_wait, Self::wait(key, rx)).await {
                        Ok(outcome) => return outcome,
                        Err(_) => {
                            warn!(
                                "Fetch {} for key={} still running after {:?}, fetching independently",
                                seq, key, self.max_wait
                            );
                            self.stats.write().wait_timeouts += 1;
                            self.abandon(key, seq);
                        }
                    }
                }
            }
        }
    }

    /// How long the fetch for `key` has been running
    pub fn in_flight_for(&self, key: &str) -> Option<Duration> {
        self.flights
            .lock()
            .get(key)
            .map(|flight| Instant::now().saturating_duration_since(flight.started_at))
    }

    /// Keys with a fetch running, and for how long
    pub fn in_flight(&self) -> Vec<(String, Duration)> {
        let now = Instant::now();
        self.flights
            .lock()
            .iter()
            .map(|(key, flight)| (key.clone(), now.saturating_duration_since(flight.started_at)))
            .collect()
    }

    /// Drop the entry for `key` and forget its running fetch; the next
    /// caller starts a new one. Callers already waiting on the old fetch
    /// still receive its result, which is not stored.
    ///
    /// Returns `(had_entry, detached_fetch)`.
    pub fn invalidate(&self, key: &str) -> (bool, bool) {
        let mut flights = self.flights.lock();
        let removed = self.store.delete(key);
        let detached = flights.remove(key).is_some();
        (removed, detached)
    }

    /// Drop every entry and forget every running fetch.
    ///
    /// Returns `(entries, detached_fetches)`.
    pub fn invalidate_all(&self) -> (usize, usize) {
        let mut flights = self.flights.lock();
        let count = self.store.clear();
        let detached = flights.len();
        flights.clear();
        (count, detached)
    }

    /// Invalidate `key` unless a fetch that started after its last
    /// invalidation is already running; in that case return the sequence
    /// number of that fetch so the caller can join it.
    pub fn invalidate_or_join(&self, key: &str) -> Option<u64> {
        let mut flights = self.flights.lock();

        let mark = self.store.invalidated_at(key);
        match flights.get(key).map(|flight| flight.seq) {
            Some(seq) if seq > mark => return Some(seq),
            Some(seq) => {
                debug!("DETACH key={}, fetch={} (before mark {})", key, seq, mark);
                flights.remove(key);
            }
            None => {}
        }
        self.store.delete(key);
        None
    }

    fn claim(&self, key: &str) -> Claim<V> {
        let mut flights = self.flights.lock();

        if let Some(flight) = flights.get(key) {
            return Claim::Joined {
                seq: flight.seq,
                rx: flight.rx.clone(),
            };
        }

        // A fetch may have finished between the caller's store lookup and now
        if let Some(entry) = self.store.get(key) {
            if entry.is_fresh() {
                return Claim::Fresh(entry.value);
            }
        }

        let seq = self.store.next_seq();
        let (tx, rx) = watch::channel(None);
        flights.insert(
            key.to_string(),
            Flight {
                seq,
                started_at: Instant::now(),
                rx: rx.clone(),
            },
        );
        self.stats.write().fetches += 1;
        debug!("FETCH START key={}, fetch={}", key, seq);

        Claim::Owned { seq, tx, rx }
    }

    fn launch<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        seq: u64,
        tx: watch::Sender<Outcome<V>>,
        fetch: F,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let guard = FlightGuard {
            flights: Arc::clone(&self.flights),
            key: key.to_string(),
            seq,
        };
        let store = self.store.clone();
        let stats = Arc::clone(&self.stats);

        tokio::spawn(async move {
            let key = guard.key.clone();
            let started = Instant::now();

            let outcome = match fetch().await {
                Ok(value) => {
                    let value = Arc::new(value);
                    let stored = store.set_from_fetch(&key, Arc::clone(&value), ttl, seq);
                    debug!(
                        "FETCH DONE key={}, fetch={}, took={:?}, stored={}",
                        key,
                        seq,
                        started.elapsed(),
                        stored
                    );
                    Ok(value)
                }
                Err(err) => {
                    stats.write().fetch_failures += 1;
                    warn!("Fetch {} for key={} failed: {:#}", seq, key, err);
                    Err(CacheError::fetch_failed(&key, &err))
                }
            };

            // Back to idle before waking waiters
            drop(guard);
            let _ = tx.send(Some(outcome));
        });
    }

    async fn wait(key: &str, mut rx: watch::Receiver<Outcome<V>>) -> Result<Arc<V>> {
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            // Sender dropped without a result: the fetch task panicked
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| Err(CacheError::FlightAbandoned(key.to_string())))
    }

    fn abandon(&self, key: &str, seq: u64) {
        let mut flights = self.flights.lock();
        if flights.get(key).is_some_and(|f| f.seq == seq) {
            flights.remove(key);
        }
    }
}

impl<V> Clone for FetchCoordinator<V> {
    fn clone(&self) -> Self {
        Self {
            flights: Arc::clone(&self.flights),
            store: self.store.clone(),
            stats: Arc::clone(&self.stats),
            max_wait: self.max_wait,
        }
    }
}
