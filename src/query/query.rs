//! Per-key query state machine and fetch coordinator
//!
//! # Fetch lifecycle
//!
//! ```text
//! fetch() ──► in flight? ──yes──► join the shared future
//!               │ no
//!               ▼
//!         fresh success? ──yes──► resolved future, no fetch
//!               │ no
//!               ▼
//!   {pending, is_fetching} + notify
//!               │
//!               ▼   (spawned task)
//!   attempt 1..=max_retries+1 ── ok ──► {success} + notify
//!               │ err, retries left: sleep(retry_delay(attempt))
//!               │ err, exhausted ─────► {error} + notify
//!               ▼
//!   {is_fetching: false} + notify, settle the shared future
//! ```
//!
//! The fetch loop runs on its own task, so dropping the future returned by
//! [`Query::fetch`] never cancels the work. Only client shutdown ends a loop
//! early. A loop that ends without a result (shutdown, a panicking query
//! function, or a task dropped by a runtime going away) puts back the status
//! and error the query had before the fetch, so `pending` never outlives the
//! fetch that set it. Once the client is shut down `fetch` resolves
//! immediately and leaves the state alone.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use futures::future;
use futures::future::BoxFuture;
use futures::future::Shared;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use super::QueryConfig;
use super::QueryState;
use super::QueryStatus;
use super::Subscription;
use super::Unsubscribe;
use crate::client::gc::GcScheduler;
use crate::QUERY_DEDUPE_TOTAL;
use crate::QUERY_FETCH_TOTAL;
use crate::QUERY_FRESH_HIT_TOTAL;
use crate::QUERY_RETRY_TOTAL;

/// Bound shared by cached data and error types
pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<V> CacheValue for V where V: Clone + Send + Sync + 'static {}

/// State-change listener. Receives the state as of the mutation that fired it.
pub type Listener<T, E> = Arc<dyn Fn(&QueryState<T, E>) + Send + Sync>;

/// Awaitable handle for one round of fetch work
///
/// Always resolves to `()`: fetch failures are reported through
/// [`QueryState::error`], never through this future.
pub type FetchFuture = Shared<BoxFuture<'static, ()>>;

struct QueryInner<T, E> {
    state: QueryState<T, E>,
    in_flight: Option<FetchFuture>,
}

pub struct Query<T, E> {
    id: u64,
    key: String,
    config: QueryConfig<T, E>,
    inner: Mutex<QueryInner<T, E>>,
    subscribers: Mutex<Vec<(u64, Listener<T, E>)>>,
    next_subscriber_id: AtomicU64,
    gc: Arc<GcScheduler>,
    runtime: Handle,
    shutdown: CancellationToken,
}

impl<T: CacheValue, E: CacheValue> Query<T, E> {
    pub(crate) fn new(
        id: u64,
        key: String,
        config: QueryConfig<T, E>,
        gc: Arc<GcScheduler>,
        runtime: Handle,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            key,
            config,
            inner: Mutex::new(QueryInner {
                state: QueryState::default(),
                in_flight: None,
            }),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(1),
            gc,
            runtime,
            shutdown,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn config(&self) -> &QueryConfig<T, E> {
        &self.config
    }

    /// Snapshot of the current state
    pub fn state(&self) -> QueryState<T, E> {
        self.inner.lock().state.clone()
    }

    pub fn is_fetching(&self) -> bool {
        self.inner.lock().state.is_fetching
    }

    /// True when invalidated, never fetched successfully, or older than `stale_time`
    pub fn is_stale(&self) -> bool {
        let inner = self.inner.lock();
        self.is_stale_state(&inner.state)
    }

    fn is_stale_state(
        &self,
        state: &QueryState<T, E>,
    ) -> bool {
        if state.invalidated {
            return true;
        }
        match state.last_updated {
            None => true,
            Some(updated) => Instant::now().saturating_duration_since(updated) > self.config.stale_time,
        }
    }

    /// Mark data stale without refetching
    pub fn invalidate(&self) {
        trace!(key = %self.key, "query invalidated");
        self.update(|state| state.invalidated = true);
    }

    /// Write data directly, as if a fetch had just succeeded
    ///
    /// Leaves `is_fetching` and any in-flight loop untouched.
    pub fn set_data(
        &self,
        data: T,
    ) {
        self.update(move |state| {
            state.status = QueryStatus::Success;
            state.data = Some(data);
            state.error = None;
            state.last_updated = Some(Instant::now());
            state.invalidated = false;
        });
    }

    /// Register a listener, called synchronously after every state change
    ///
    /// Attaching a listener cancels any pending gc timer for this key.
    pub fn subscribe<F>(
        self: &Arc<Self>,
        listener: F,
    ) -> Subscription
    where
        F: Fn(&QueryState<T, E>) + Send + Sync + 'static,
    {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, Arc::new(listener)));

        if self.gc.cancel_for(&self.key, self.id) {
            debug!(key = %self.key, "pending gc cancelled by new subscriber");
        }
        trace!(key = %self.key, subscriber_id = id, "listener subscribed");

        let target: Weak<dyn Unsubscribe> = Arc::downgrade(self) as Weak<dyn Unsubscribe>;
        Subscription::new(id, self.key.clone(), target)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Start (or join) a fetch
    ///
    /// - An in-flight fetch is shared: the same future is returned and the
    ///   query function is not called again.
    /// - A fresh success returns an already resolved future.
    /// - Otherwise the query moves to `pending` and a fetch loop is spawned.
    /// - After client shutdown nothing happens and a resolved future is returned.
    ///
    /// Must be called from within the client's tokio runtime context or with
    /// the runtime still alive; the loop is spawned on the client's runtime.
    pub fn fetch(self: &Arc<Self>) -> FetchFuture {
        if self.shutdown.is_cancelled() {
            trace!(key = %self.key, "client shut down, fetch skipped");
            return future::ready(()).boxed().shared();
        }

        let (snapshot, round, shared) = {
            let mut inner = self.inner.lock();

            if let Some(in_flight) = &inner.in_flight {
                QUERY_DEDUPE_TOTAL.inc();
                trace!(key = %self.key, "joining in-flight fetch");
                return in_flight.clone();
            }

            if inner.state.status == QueryStatus::Success && !self.is_stale_state(&inner.state) {
                QUERY_FRESH_HIT_TOTAL.inc();
                trace!(key = %self.key, "data is fresh, skipping fetch");
                return future::ready(()).boxed().shared();
            }

            let (done_tx, done_rx) = oneshot::channel::<()>();
            let shared = async move {
                let _ = done_rx.await;
            }
            .boxed()
            .shared();

            let round = FetchRound {
                query: Arc::clone(self),
                prior: Some((inner.state.status, inner.state.error.take())),
                done: Some(done_tx),
            };

            inner.in_flight = Some(shared.clone());
            inner.state.status = QueryStatus::Pending;
            inner.state.is_fetching = true;

            (inner.state.clone(), round, shared)
        };

        self.notify(&snapshot);

        self.runtime.spawn(round.run());

        shared
    }

    async fn run_fetch_loop(&self) {
        debug!(key = %self.key, "fetch started");

        let settled = AssertUnwindSafe(async {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    debug!(key = %self.key, "fetch abandoned, client shut down");
                }
                _ = self.retry_until_settled() => {}
            }
        })
        .catch_unwind()
        .await;

        if settled.is_err() {
            error!(key = %self.key, "query function panicked");
        }
    }

    /// End a fetch round: clear the in-flight slot and `is_fetching`, and
    /// restore `prior` if the round never reached success or error
    fn settle(
        &self,
        prior: (QueryStatus, Option<E>),
    ) {
        let snapshot = {
            let mut inner = self.inner.lock();
            inner.in_flight = None;
            inner.state.is_fetching = false;
            if inner.state.status == QueryStatus::Pending {
                let (status, error) = prior;
                trace!(key = %self.key, status = status.as_str(), "fetch ended without a result");
                inner.state.status = status;
                if inner.state.error.is_none() {
                    inner.state.error = error;
                }
            }
            inner.state.clone()
        };
        self.notify(&snapshot);
    }

    async fn retry_until_settled(&self) {
        let max_retries = self.config.retry.max_retries();
        let mut attempt: u32 = 1;

        loop {
            match (self.config.query_fn)().await {
                Ok(data) => {
                    debug!(key = %self.key, attempt, "fetch succeeded");
                    QUERY_FETCH_TOTAL.with_label_values(&["success"]).inc();
                    self.update(move |state| {
                        state.status = QueryStatus::Success;
                        state.data = Some(data);
                        state.error = None;
                        state.last_updated = Some(Instant::now());
                        state.invalidated = false;
                    });
                    return;
                }
                Err(err) => {
                    if attempt > max_retries {
                        warn!(key = %self.key, attempt, "fetch failed, retries exhausted");
                        QUERY_FETCH_TOTAL.with_label_values(&["error"]).inc();
                        self.update(move |state| {
                            state.status = QueryStatus::Error;
                            state.error = Some(err);
                        });
                        return;
                    }

                    let delay = self.config.retry_delay.delay_for(attempt);
                    debug!(
                        key = %self.key,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "fetch failed, backing off"
                    );
                    QUERY_RETRY_TOTAL.inc();
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn update<F>(
        &self,
        mutate: F,
    ) where
        F: FnOnce(&mut QueryState<T, E>),
    {
        let snapshot = {
            let mut inner = self.inner.lock();
            mutate(&mut inner.state);
            inner.state.clone()
        };
        self.notify(&snapshot);
    }

    /// Call every listener registered when the round starts, in order.
    /// No lock is held while listeners run.
    fn notify(
        &self,
        state: &QueryState<T, E>,
    ) {
        let listeners: Vec<Listener<T, E>> =
            self.subscribers.lock().iter().map(|(_, listener)| Arc::clone(listener)).collect();

        for listener in listeners {
            listener(state);
        }
    }
}

/// One spawned fetch round
///
/// Settles the query when dropped, whether the loop ran to completion or the
/// task was dropped before finishing, then resolves the shared future.
struct FetchRound<T: CacheValue, E: CacheValue> {
    query: Arc<Query<T, E>>,
    prior: Option<(QueryStatus, Option<E>)>,
    done: Option<oneshot::Sender<()>>,
}

impl<T: CacheValue, E: CacheValue> FetchRound<T, E> {
    async fn run(self) {
        self.query.run_fetch_loop().await;
    }
}

impl<T: CacheValue, E: CacheValue> Drop for FetchRound<T, E> {
    fn drop(&mut self) {
        if let Some(prior) = self.prior.take() {
            self.query.settle(prior);
        }
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

impl<T, E> Unsubscribe for Query<T, E>
where
    T: CacheValue,
    E: CacheValue,
{
    fn unsubscribe(
        &self,
        id: u64,
    ) {
        self.subscribers.lock().retain(|(subscriber_id, _)| *subscriber_id != id);
    }
}

impl<T, E> fmt::Debug for Query<T, E> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Query")
            .field("key", &self.key)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Type-erased view of a query, as stored in the client's map
pub(crate) trait QueryEntry: Send + Sync {
    /// Unique per created query, distinguishes entries that reuse a key
    fn id(&self) -> u64;

    fn key(&self) -> &str;

    fn invalidate(&self);

    fn subscriber_count(&self) -> usize;

    fn cache_time(&self) -> Duration;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T, E> QueryEntry for Query<T, E>
where
    T: CacheValue,
    E: CacheValue,
{
    fn id(&self) -> u64 {
        self.id
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn invalidate(&self) {
        Query::invalidate(self)
    }

    fn subscriber_count(&self) -> usize {
        Query::subscriber_count(self)
    }

    fn cache_time(&self) -> Duration {
        self.config.cache_time
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
