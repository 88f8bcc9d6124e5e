use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::QueryClient;
use crate::QueryOptions;
use crate::QueryState;
use crate::QueryStatus;

/// Shared call counter for query functions
#[derive(Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hit(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn test_client() -> QueryClient {
    QueryClient::new().expect("client should build inside a runtime")
}

/// Resolves to `value` after `latency`
pub fn resolving(
    key: &str,
    value: u32,
    latency: Duration,
    calls: &CallCounter,
) -> QueryOptions<u32, String> {
    let calls = calls.clone();
    QueryOptions::new(key, move || {
        let calls = calls.clone();
        async move {
            calls.hit();
            tokio::time::sleep(latency).await;
            Ok(value)
        }
    })
}

/// Returns the call number as data (1, 2, 3, ...)
pub fn numbering(
    key: &str,
    calls: &CallCounter,
) -> QueryOptions<u32, String> {
    let calls = calls.clone();
    QueryOptions::new(key, move || {
        let calls = calls.clone();
        async move { Ok(calls.hit() as u32) }
    })
}

/// Fails every call with "boom #<n>"
pub fn always_failing(
    key: &str,
    calls: &CallCounter,
) -> QueryOptions<u32, String> {
    let calls = calls.clone();
    QueryOptions::new(key, move || {
        let calls = calls.clone();
        async move { Err(format!("boom #{}", calls.hit())) }
    })
    .retry_delay(Duration::from_millis(10))
}

/// Fails the first `failures` calls, then resolves to `value`
pub fn failing_then_ok(
    key: &str,
    failures: usize,
    value: u32,
    calls: &CallCounter,
) -> QueryOptions<u32, String> {
    let calls = calls.clone();
    QueryOptions::new(key, move || {
        let calls = calls.clone();
        async move {
            let n = calls.hit();
            if n <= failures {
                Err(format!("boom #{n}"))
            } else {
                Ok(value)
            }
        }
    })
    .retry_delay(Duration::from_millis(10))
}

/// Records every state a listener receives
#[derive(Clone, Default)]
pub struct NotificationLog {
    states: Arc<Mutex<Vec<QueryState<u32, String>>>>,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listener(&self) -> impl Fn(&QueryState<u32, String>) + Send + Sync + 'static {
        let states = Arc::clone(&self.states);
        move |state| states.lock().push(state.clone())
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn statuses(&self) -> Vec<(QueryStatus, bool)> {
        self.states.lock().iter().map(|s| (s.status, s.is_fetching)).collect()
    }

    pub fn states(&self) -> Vec<QueryState<u32, String>> {
        self.states.lock().clone()
    }
}
