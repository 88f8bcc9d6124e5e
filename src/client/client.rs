use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;

use super::gc::GcScheduler;
use super::QueryClientBuilder;
use super::QueryMatcher;
use super::QueryObserver;
use crate::query::QueryEntry;
use crate::CacheValue;
use crate::ClientConfig;
use crate::ConfigurationError;
use crate::Query;
use crate::QueryOptions;
use crate::Result;
use crate::QUERY_GC_EVICTED_TOTAL;

/// Registry of queries, keyed by query key
///
/// Cloning is cheap and every clone addresses the same registry. Construct one
/// per application and hand clones to whoever needs it.
///
/// # Example
/// ```ignore
/// let client = QueryClient::new()?;
///
/// let options = QueryOptions::new("answer", || async { Ok::<_, String>(42) })
///     .stale_time(Duration::from_secs(10));
///
/// assert_eq!(client.fetch_query(options.clone()).await?, Some(42));
/// // Fresh: served from cache
/// assert_eq!(client.fetch_query(options).await?, Some(42));
///
/// client.shutdown();
/// ```
#[derive(Clone, Debug)]
pub struct QueryClient {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    config: ClientConfig,
    queries: DashMap<String, Arc<dyn QueryEntry>>,
    next_query_id: AtomicU64,
    gc: Arc<GcScheduler>,
    runtime: Handle,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl std::fmt::Debug for ClientInner {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ClientInner")
            .field("config", &self.config)
            .field("queries", &self.queries.len())
            .field("gc_timers", &self.gc.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl ClientInner {
    fn evict_if_unused(
        &self,
        key: &str,
        query_id: u64,
    ) {
        match self
            .queries
            .remove_if(key, |_, query| query.id() == query_id && query.subscriber_count() == 0)
        {
            Some((key, _)) => {
                QUERY_GC_EVICTED_TOTAL.inc();
                debug!(key = %key, "query evicted by gc");
            }
            None => trace!(key = %key, "gc timer fired for a query in use, replaced or removed"),
        }
    }
}

impl QueryClient {
    /// Build a client with default configuration on the current runtime
    pub fn new() -> Result<Self> {
        QueryClientBuilder::new().build()
    }

    pub fn builder() -> QueryClientBuilder {
        QueryClientBuilder::new()
    }

    pub(crate) fn from_parts(
        config: ClientConfig,
        runtime: Handle,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let gc = Arc::new(GcScheduler::new(shutdown.child_token()));
        Self {
            inner: Arc::new(ClientInner {
                config,
                queries: DashMap::new(),
                next_query_id: AtomicU64::new(1),
                gc,
                runtime,
                shutdown,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ConfigurationError::ClientClosed.into());
        }
        Ok(())
    }

    /// Return the query for `options.query_key`, creating it on first use
    ///
    /// The first caller's options win: later calls with the same key get the
    /// existing query whatever options they pass. Asking for a key with a
    /// different data or error type than it was created with is an error.
    pub fn ensure_query<T, E>(
        &self,
        options: QueryOptions<T, E>,
    ) -> Result<Arc<Query<T, E>>>
    where
        T: CacheValue,
        E: CacheValue,
    {
        self.ensure_open()?;

        let key = options.query_key.clone();
        let entry = Arc::clone(
            self.inner
                .queries
                .entry(key)
                .or_insert_with(|| {
                    let (key, config) = options.into_config(&self.inner.config);
                    debug!(key = %key, ?config, "query created");
                    Query::new(
                        self.inner.next_query_id.fetch_add(1, Ordering::Relaxed),
                        key,
                        config,
                        Arc::clone(&self.inner.gc),
                        self.inner.runtime.clone(),
                        self.inner.shutdown.child_token(),
                    ) as Arc<dyn QueryEntry>
                })
                .value(),
        );

        downcast(entry)
    }

    /// Look up a query without creating it
    pub fn get_query<T, E>(
        &self,
        key: &str,
    ) -> Result<Option<Arc<Query<T, E>>>>
    where
        T: CacheValue,
        E: CacheValue,
    {
        self.ensure_open()?;
        let entry = self.inner.queries.get(key).map(|entry| Arc::clone(entry.value()));
        entry.map(downcast::<T, E>).transpose()
    }

    /// Cached data for `key`, without fetching
    pub fn get_query_data<T, E>(
        &self,
        key: &str,
    ) -> Result<Option<T>>
    where
        T: CacheValue,
        E: CacheValue,
    {
        Ok(self.get_query::<T, E>(key)?.and_then(|query| query.state().data))
    }

    /// Ensure the query, await one round of fetch work, return its data
    ///
    /// A failed fetch is not an error here: the result is whatever data the
    /// query holds afterwards (`None` if it never succeeded). Inspect
    /// [`Query::state`] for the failure.
    pub async fn fetch_query<T, E>(
        &self,
        options: QueryOptions<T, E>,
    ) -> Result<Option<T>>
    where
        T: CacheValue,
        E: CacheValue,
    {
        let query = self.ensure_query(options)?;
        query.fetch().await;
        Ok(query.state().data)
    }

    /// Attach an observer: a subscription mirrored into a watch channel that
    /// fetches on attach when the data is missing or stale
    pub fn observe<T, E>(
        &self,
        options: QueryOptions<T, E>,
    ) -> Result<QueryObserver<T, E>>
    where
        T: CacheValue,
        E: CacheValue,
    {
        let query = self.ensure_query(options)?;
        Ok(QueryObserver::attach(self.clone(), query))
    }

    /// Mark every matching query stale. Does not refetch.
    ///
    /// Returns the number of queries invalidated.
    pub fn invalidate_queries(
        &self,
        matcher: impl Into<QueryMatcher>,
    ) -> Result<usize> {
        self.ensure_open()?;
        let matcher = matcher.into();

        // Collect first: listeners run inside invalidate() and may call back
        // into the client.
        let matched: Vec<Arc<dyn QueryEntry>> = self
            .inner
            .queries
            .iter()
            .filter(|entry| matcher.matches(entry.key()))
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for query in &matched {
            query.invalidate();
        }

        debug!(?matcher, count = matched.len(), "queries invalidated");
        Ok(matched.len())
    }

    /// Remove every matching query now, regardless of subscribers
    ///
    /// Pending gc timers for removed keys are cancelled. Returns the number of
    /// queries removed.
    pub fn remove_queries(
        &self,
        matcher: impl Into<QueryMatcher>,
    ) -> Result<usize> {
        self.ensure_open()?;
        let matcher = matcher.into();

        let keys: Vec<String> = self
            .inner
            .queries
            .iter()
            .filter(|entry| matcher.matches(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in &keys {
            self.inner.gc.cancel(key);
            if self.inner.queries.remove(key).is_some() {
                removed += 1;
            }
        }

        debug!(?matcher, count = removed, "queries removed");
        Ok(removed)
    }

    /// Schedule eviction for every query without subscribers
    ///
    /// Each unused query without a pending timer gets one that fires after its
    /// `cache_time`. On firing the query is removed only if it still has no
    /// subscribers. Returns the number of timers armed by this sweep.
    pub fn gc(&self) -> Result<usize> {
        self.ensure_open()?;

        // Phase 1: collect candidates (drop the map iterator before taking
        // the timer lock, which eviction callbacks hold while touching the map)
        let candidates: Vec<Arc<dyn QueryEntry>> = self
            .inner
            .queries
            .iter()
            .filter(|entry| entry.value().subscriber_count() == 0)
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        // Phase 2: arm timers
        let mut scheduled = 0;
        for entry in &candidates {
            let weak = Arc::downgrade(&self.inner);
            let query_id = entry.id();
            let armed = self.inner.gc.schedule(&self.inner.runtime, entry, move |key| {
                if let Some(inner) = weak.upgrade() {
                    inner.evict_if_unused(key, query_id);
                }
            });
            if armed {
                scheduled += 1;
            }
        }

        trace!(candidates = candidates.len(), scheduled, "gc sweep");
        Ok(scheduled)
    }

    /// True while a gc timer is pending for `key`
    pub fn is_gc_scheduled(
        &self,
        key: &str,
    ) -> bool {
        self.inner.gc.is_scheduled(key)
    }

    pub fn contains_query(
        &self,
        key: &str,
    ) -> bool {
        self.inner.queries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.queries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.queries.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Tear the client down
    ///
    /// Cancels every gc timer and every in-flight fetch loop (each settles
    /// its shared future with `is_fetching` cleared), then drops all queries.
    /// Every later operation fails with [`ConfigurationError::ClientClosed`].
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.inner.gc.shutdown();
        self.inner.shutdown.cancel();

        let dropped = self.inner.queries.len();
        self.inner.queries.clear();

        info!(queries = dropped, "query client shut down");
    }
}

fn downcast<T, E>(entry: Arc<dyn QueryEntry>) -> Result<Arc<Query<T, E>>>
where
    T: CacheValue,
    E: CacheValue,
{
    let key = entry.key().to_string();
    entry.into_any().downcast::<Query<T, E>>().map_err(|_| {
        ConfigurationError::TypeMismatch {
            key,
            requested: std::any::type_name::<Query<T, E>>(),
        }
        .into()
    })
}
