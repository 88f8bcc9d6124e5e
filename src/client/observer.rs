use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::trace;

use super::QueryClient;
use crate::CacheValue;
use crate::FetchFuture;
use crate::Query;
use crate::QueryState;
use crate::Subscription;

/// Live view of one query
///
/// On attach the observer subscribes to the query and, when the query is not
/// already fetching and is idle or stale, starts a fetch. Every notification is
/// mirrored into a watch channel. Dropping the observer unsubscribes and runs
/// a gc sweep so the query can be evicted once nobody observes it.
pub struct QueryObserver<T: CacheValue, E: CacheValue> {
    client: QueryClient,
    query: Arc<Query<T, E>>,
    receiver: watch::Receiver<QueryState<T, E>>,
    subscription: Option<Subscription>,
}

impl<T: CacheValue, E: CacheValue> QueryObserver<T, E> {
    pub(crate) fn attach(
        client: QueryClient,
        query: Arc<Query<T, E>>,
    ) -> Self {
        let (sender, receiver) = watch::channel(query.state());
        let subscription = query.subscribe(move |state| {
            sender.send_replace(state.clone());
        });

        let state = query.state();
        if !state.is_fetching && (state.is_idle() || query.is_stale()) {
            trace!(key = %query.key(), status = state.status.as_str(), "observer triggered fetch");
            let _ = query.fetch();
        }

        Self {
            client,
            query,
            receiver,
            subscription: Some(subscription),
        }
    }

    /// Latest state seen by this observer
    pub fn state(&self) -> QueryState<T, E> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next notification and return the state it carried
    pub async fn changed(&mut self) -> QueryState<T, E> {
        let _ = self.receiver.changed().await;
        self.receiver.borrow_and_update().clone()
    }

    /// Fetch regardless of observer state (still deduped and freshness-checked)
    pub fn refetch(&self) -> FetchFuture {
        self.query.fetch()
    }

    pub fn query(&self) -> &Arc<Query<T, E>> {
        &self.query
    }
}

impl<T: CacheValue, E: CacheValue> Drop for QueryObserver<T, E> {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        if let Err(e) = self.client.gc() {
            trace!(key = %self.query.key(), error = %e, "skipping gc on observer drop");
        }
    }
}

impl<T: CacheValue, E: CacheValue> fmt::Debug for QueryObserver<T, E> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("QueryObserver")
            .field("key", &self.query.key())
            .field("subscription", &self.subscription)
            .finish_non_exhaustive()
    }
}
