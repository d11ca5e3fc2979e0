//! Composite fetches over several independent sources
//!
//! Every source runs on its own task. A source that fails, times out or
//! panics is recorded in the [`CompositeResult`] and never fails its
//! siblings.

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

type SourceFn<T> = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<T>> + Send>;

/// One named slice of a composite fetch
pub struct Source<T> {
    name: String,
    fetch: SourceFn<T>,
}

impl<T> Source<T> {
    /// Wrap a fetch function under `name`; names must be unique per composite
    pub fn new<F, Fut>(name: impl Into<String>, fetch: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            name: name.into(),
            fetch: Box::new(move || fetch().boxed()),
        }
    }
}

impl<T> std::fmt::Debug for Source<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source").field("name", &self.name).finish()
    }
}

/// Outcome of one source inside a composite fetch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceResult<T> {
    pub source: String,
    pub value: Option<T>,
    pub error: Option<String>,
    /// `value` comes from the previous composite because this fetch failed
    pub carried_forward: bool,
}

impl<T> SourceResult<T> {
    pub fn ok(source: impl Into<String>, value: T) -> Self {
        Self {
            source: source.into(),
            value: Some(value),
            error: None,
            carried_forward: false,
        }
    }

    pub fn failed(source: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            value: None,
            error: Some(error.into()),
            carried_forward: false,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-source results of a composite fetch, keyed by source name
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CompositeResult<T> {
    results: BTreeMap<String, SourceResult<T>>,
}

impl<T> Default for CompositeResult<T> {
    fn default() -> Self {
        Self {
            results: BTreeMap::new(),
        }
    }
}

impl<T> CompositeResult<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the result of one source
    pub fn insert(&mut self, result: SourceResult<T>) {
        self.results.insert(result.source.clone(), result);
    }

    pub fn get(&self, source: &str) -> Option<&SourceResult<T>> {
        self.results.get(source)
    }

    /// Value of a source; `None` means "currently unavailable"
    pub fn value(&self, source: &str) -> Option<&T> {
        self.results.get(source).and_then(|r| r.value.as_ref())
    }

    /// Error recorded for a source, if it failed
    pub fn error(&self, source: &str) -> Option<&str> {
        self.results.get(source).and_then(|r| r.error.as_deref())
    }

    /// Names of the sources that failed in this fetch
    pub fn failed_sources(&self) -> Vec<&str> {
        self.results
            .values()
            .filter(|r| !r.is_ok())
            .map(|r| r.source.as_str())
            .collect()
    }

    /// Every source succeeded
    pub fn is_complete(&self) -> bool {
        self.results.values().all(SourceResult::is_ok)
    }

    /// At least one source and none of them succeeded
    pub fn all_failed(&self) -> bool {
        !self.results.is_empty() && self.results.values().all(|r| !r.is_ok())
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceResult<T>> {
        self.results.values()
    }
}

impl<T: Clone> CompositeResult<T> {
    /// Keep the previous value of every source that failed this time.
    ///
    /// The error stays on the result so consumers can tell the value is old.
    pub fn carry_forward(&mut self, previous: &CompositeResult<T>) {
        for result in self.results.values_mut() {
            if result.value.is_some() {
                continue;
            }
            if let Some(old) = previous.value(&result.source) {
                result.value = Some(old.clone());
                result.carried_forward = true;
            }
        }
    }
}

/// A cached value that can be built from, and inspected as, a composite.
///
/// Lets one cache hold composite and plain panels side by side.
pub trait Composite<T>: Sized {
    fn from_composite(result: CompositeResult<T>) -> Self;

    fn as_composite(&self) -> Option<&CompositeResult<T>>;
}

impl<T> Composite<T> for CompositeResult<T> {
    fn from_composite(result: CompositeResult<T>) -> Self {
        result
    }

    fn as_composite(&self) -> Option<&CompositeResult<T>> {
        Some(self)
    }
}

/// Runs sources concurrently and collects every outcome
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    source_timeout: Option<Duration>,
}

impl Aggregator {
    pub fn new(source_timeout: Option<Duration>) -> Self {
        Self { source_timeout }
    }

    /// Launch every source and wait for all of them; never fails
    pub async fn fetch_all<T>(&self, sources: Vec<Source<T>>) -> CompositeResult<T>
    where
        T: Send + 'static,
    {
        let limit = self.source_timeout;
        debug!("AGGREGATE {} sources", sources.len());

        let pending = sources.into_iter().map(|source| {
            let Source { name, fetch } = source;
            let handle = tokio::spawn(async move {
                match limit {
                    Some(limit) => match tokio::time::timeout(limit, fetch()).await {
                        Ok(result) => result,
                        Err(_) => Err(anyhow::anyhow!("timed out after {:?}", limit)),
                    },
                    None => fetch().await,
                }
            });
            async move { (name, handle.await) }
        });

        let mut composite = CompositeResult::new();
        for (name, joined) in join_all(pending).await {
            let result = match joined {
                Ok(Ok(value)) => SourceResult::ok(name, value),
                Ok(Err(err)) => {
                    warn!("Source {} failed: {:#}", name, err);
                    SourceResult::failed(name, format!("{:#}", err))
                }
                Err(join_err) => {
                    warn!("Source {} task failed: {}", name, join_err);
                    SourceResult::failed(name, format!("source task failed: {}", join_err))
                }
            };
            if composite.get(&result.source).is_some() {
                warn!("Duplicate source name {}, keeping the last result", result.source);
            }
            composite.insert(result);
        }

        composite
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn source(name: &str, delay_ms: u64, value: Option<u32>) -> Source<u32> {
        Source::new(name, move || async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            value.ok_or_else(|| anyhow::anyhow!("upstream query failed"))
        })
    }

    fn exploding() -> anyhow::Result<u32> {
        panic!("source exploded")
    }

    #[tokio::test]
    async fn test_one_failing_source_is_isolated() {
        let aggregator = Aggregator::default();

        let result = aggregator
            .fetch_all(vec![
                source("orders", 5, Some(10)),
                source("inventory", 1, None),
                source("tasks", 3, Some(4)),
            ])
            .await;

        assert_eq!(result.len(), 3);
        assert_eq!(result.value("orders"), Some(&10));
        assert_eq!(result.value("tasks"), Some(&4));
        assert_eq!(result.value("inventory"), None);
        assert!(result.error("inventory").unwrap().contains("upstream query failed"));
        assert_eq!(result.failed_sources(), vec!["inventory"]);
        assert!(!result.is_complete());
        assert!(!result.all_failed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sources_run_concurrently() {
        let aggregator = Aggregator::default();
        let started = tokio::time::Instant::now();

        let result = aggregator
            .fetch_all(vec![
                source("a", 200, Some(1)),
                source("b", 200, Some(2)),
                source("c", 200, Some(3)),
            ])
            .await;

        assert!(result.is_complete());
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_source_times_out() {
        let aggregator = Aggregator::new(Some(Duration::from_millis(100)));

        let result = aggregator
            .fetch_all(vec![source("fast", 10, Some(1)), source("slow", 5_000, Some(2))])
            .await;

        assert_eq!(result.value("fast"), Some(&1));
        assert!(result.error("slow").unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_panicking_source_is_isolated() {
        let aggregator = Aggregator::default();

        let result = aggregator
            .fetch_all(vec![
                source("ok", 1, Some(1)),
                Source::new("boom", || async { exploding() }),
            ])
            .await;

        assert_eq!(result.value("ok"), Some(&1));
        assert!(result.error("boom").is_some());
    }

    #[tokio::test]
    async fn test_all_failed() {
        let aggregator = Aggregator::default();

        let result = aggregator
            .fetch_all(vec![source("a", 1, None), source("b", 1, None)])
            .await;

        assert!(result.all_failed());
        assert!(!CompositeResult::<u32>::new().all_failed());
    }

    #[tokio::test]
    async fn test_every_source_is_invoked_once() {
        let aggregator = Aggregator::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let sources = (0..5)
            .map(|i| {
                let calls = Arc::clone(&calls);
                Source::new(format!("s{}", i), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(i)
                })
            })
            .collect();

        let result = aggregator.fetch_all(sources).await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(result.value("s3"), Some(&3));
    }

    #[test]
    fn test_carry_forward_keeps_previous_value_and_error() {
        let mut previous = CompositeResult::new();
        previous.insert(SourceResult::ok("orders", 10u32));
        previous.insert(SourceResult::ok("inventory", 7u32));

        let mut current = CompositeResult::new();
        current.insert(SourceResult::ok("orders", 12u32));
        current.insert(SourceResult::failed("inventory", "timeout"));
        current.insert(SourceResult::failed("tasks", "timeout"));

        current.carry_forward(&previous);

        assert_eq!(current.value("orders"), Some(&12));
        assert_eq!(current.value("inventory"), Some(&7));
        assert_eq!(current.error("inventory"), Some("timeout"));
        assert!(current.get("inventory").unwrap().carried_forward);
        assert_eq!(current.value("tasks"), None);
        assert!(!current.get("tasks").unwrap().carried_forward);
    }
}
