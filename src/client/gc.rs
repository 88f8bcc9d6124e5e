//! Deferred eviction timers
//!
//! One timer per unused query key. A timer is a spawned task sleeping for the
//! query's `cache_time`, raced against a cancellation token derived from the
//! client's shutdown token.
//!
//! # Races
//!
//! - `schedule` re-checks the subscriber count under the timer lock, and
//!   `Query::subscribe` cancels under the same lock after adding its
//!   listener. A subscriber therefore either prevents the timer or cancels it.
//! - Each timer records the id of the query it was armed for. A query that was
//!   removed from the client still shares this scheduler, so a subscriber on
//!   it only cancels a timer carrying its own id, never the timer of a newer
//!   query registered under the same key.
//! - A timer whose sleep finishes just as it is cancelled compares its id with
//!   the registered one before running its callback, so a cancelled (or
//!   replaced) timer never evicts.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::query::QueryEntry;

#[derive(Debug)]
struct GcTimer {
    id: u64,
    query_id: u64,
    token: CancellationToken,
}

#[derive(Debug)]
pub(crate) struct GcScheduler {
    timers: Mutex<HashMap<String, GcTimer>>,
    next_id: AtomicU64,
    root: CancellationToken,
}

impl GcScheduler {
    pub(crate) fn new(root: CancellationToken) -> Self {
        Self {
            timers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            root,
        }
    }

    /// Arm an eviction timer for `entry` after its `cache_time`
    ///
    /// Returns false without scheduling when a timer is already pending for
    /// the key or the entry has subscribers. `on_fire` runs with the timer
    /// lock held, so it must not call back into the scheduler.
    pub(crate) fn schedule<F>(
        self: &Arc<Self>,
        runtime: &Handle,
        entry: &Arc<dyn QueryEntry>,
        on_fire: F,
    ) -> bool
    where
        F: FnOnce(&str) + Send + 'static,
    {
        if self.root.is_cancelled() {
            return false;
        }

        let key = entry.key().to_string();
        let after = entry.cache_time();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();

        {
            let mut timers = self.timers.lock();
            if timers.contains_key(&key) || entry.subscriber_count() > 0 {
                return false;
            }
            timers.insert(
                key.clone(),
                GcTimer {
                    id,
                    query_id: entry.id(),
                    token: token.clone(),
                },
            );
        }

        trace!(
            key = %key,
            timer_id = id,
            after_ms = u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
            "gc timer armed"
        );

        let scheduler = Arc::downgrade(self);
        runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = sleep(after) => {}
            }

            let Some(scheduler) = scheduler.upgrade() else {
                return;
            };

            let mut timers = scheduler.timers.lock();
            match timers.get(&key) {
                Some(timer) if timer.id == id => {}
                _ => {
                    trace!(key = %key, timer_id = id, "gc timer superseded");
                    return;
                }
            }

            on_fire(&key);
            timers.remove(&key);
        });

        true
    }

    /// Cancel the pending timer for `key`, if any
    pub(crate) fn cancel(
        &self,
        key: &str,
    ) -> bool {
        match self.timers.lock().remove(key) {
            Some(timer) => {
                timer.token.cancel();
                trace!(key = %key, timer_id = timer.id, "gc timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel the pending timer for `key` only if it was armed for `query_id`
    pub(crate) fn cancel_for(
        &self,
        key: &str,
        query_id: u64,
    ) -> bool {
        let mut timers = self.timers.lock();
        match timers.get(key) {
            Some(timer) if timer.query_id == query_id => {}
            _ => return false,
        }
        match timers.remove(key) {
            Some(timer) => {
                timer.token.cancel();
                trace!(key = %key, timer_id = timer.id, query_id, "gc timer cancelled");
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_scheduled(
        &self,
        key: &str,
    ) -> bool {
        self.timers.lock().contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.timers.lock().len()
    }

    /// Cancel every timer and refuse new ones
    pub(crate) fn shutdown(&self) {
        self.root.cancel();
        self.timers.lock().clear();
    }
}
