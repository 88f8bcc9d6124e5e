use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::ClientConfig;

/// Type-erased async fetch function
pub type QueryFn<T, E> = Arc<dyn Fn() -> BoxFuture<'static, std::result::Result<T, E>> + Send + Sync>;

/// How many times a failed fetch is retried
///
/// `Enabled(true)` means 3 retries and `Enabled(false)` means none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    Enabled(bool),
    Count(u32),
}

impl Retry {
    /// Normalized retry count
    pub fn max_retries(&self) -> u32 {
        match *self {
            Retry::Enabled(true) => 3,
            Retry::Enabled(false) => 0,
            Retry::Count(n) => n,
        }
    }
}

impl Default for Retry {
    fn default() -> Self {
        Retry::Count(3)
    }
}

impl From<bool> for Retry {
    fn from(enabled: bool) -> Self {
        Retry::Enabled(enabled)
    }
}

impl From<u32> for Retry {
    fn from(count: u32) -> Self {
        Retry::Count(count)
    }
}

/// Delay applied before retry `attempt` (1-based: the delay after the first
/// failure is `delay_for(1)`)
#[derive(Clone)]
pub enum RetryDelay {
    /// Same delay before every retry
    Fixed(Duration),
    /// `min(base * 2^(attempt - 1), max)`
    Exponential { base: Duration, max: Duration },
    /// Caller-supplied function of the attempt number
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl RetryDelay {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        RetryDelay::Custom(Arc::new(f))
    }

    pub fn delay_for(
        &self,
        attempt: u32,
    ) -> Duration {
        match self {
            RetryDelay::Fixed(delay) => *delay,
            RetryDelay::Exponential { base, max } => {
                let shift = attempt.saturating_sub(1).min(31);
                base.checked_mul(1u32 << shift).map_or(*max, |d| d.min(*max))
            }
            RetryDelay::Custom(f) => f(attempt),
        }
    }
}

impl Default for RetryDelay {
    fn default() -> Self {
        RetryDelay::Exponential {
            base: Duration::from_millis(1000),
            max: Duration::from_millis(30_000),
        }
    }
}

impl From<Duration> for RetryDelay {
    fn from(delay: Duration) -> Self {
        RetryDelay::Fixed(delay)
    }
}

impl fmt::Debug for RetryDelay {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            RetryDelay::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            RetryDelay::Exponential { base, max } => f
                .debug_struct("Exponential")
                .field("base", base)
                .field("max", max)
                .finish(),
            RetryDelay::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Everything needed to create a query
///
/// Unset fields inherit the client's [`ClientConfig`] when the query is first
/// created. Options passed for a key that already exists are ignored: the
/// first caller's options win.
///
/// ```ignore
/// let options = QueryOptions::new("todos", || async { load_todos().await })
///     .stale_time(Duration::from_secs(10))
///     .retry(false);
/// ```
pub struct QueryOptions<T, E> {
    pub(crate) query_key: String,
    pub(crate) query_fn: QueryFn<T, E>,
    pub(crate) stale_time: Option<Duration>,
    pub(crate) cache_time: Option<Duration>,
    pub(crate) retry: Option<Retry>,
    pub(crate) retry_delay: Option<RetryDelay>,
}

impl<T, E> QueryOptions<T, E> {
    pub fn new<F, Fut>(
        query_key: impl Into<String>,
        query_fn: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        Self {
            query_key: query_key.into(),
            query_fn: Arc::new(move || query_fn().boxed()),
            stale_time: None,
            cache_time: None,
            retry: None,
            retry_delay: None,
        }
    }

    pub fn query_key(&self) -> &str {
        &self.query_key
    }

    /// Set how long fetched data stays fresh (default: 0)
    pub fn stale_time(
        mut self,
        stale_time: Duration,
    ) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    /// Set how long an unused query survives a gc sweep (default: 5 min)
    pub fn cache_time(
        mut self,
        cache_time: Duration,
    ) -> Self {
        self.cache_time = Some(cache_time);
        self
    }

    /// Set retry count, or `true`/`false` for 3/0 (default: 3)
    pub fn retry(
        mut self,
        retry: impl Into<Retry>,
    ) -> Self {
        self.retry = Some(retry.into());
        self
    }

    /// Set the backoff between retries (default: exponential, 1s doubling up to 30s)
    pub fn retry_delay(
        mut self,
        retry_delay: impl Into<RetryDelay>,
    ) -> Self {
        self.retry_delay = Some(retry_delay.into());
        self
    }

    /// Resolve unset fields against client defaults
    pub(crate) fn into_config(
        self,
        defaults: &ClientConfig,
    ) -> (String, QueryConfig<T, E>) {
        let config = QueryConfig {
            query_fn: self.query_fn,
            stale_time: self.stale_time.unwrap_or_else(|| defaults.defaults.stale_time()),
            cache_time: self.cache_time.unwrap_or_else(|| defaults.defaults.cache_time()),
            retry: self.retry.unwrap_or(Retry::Count(defaults.retry.max_retries)),
            retry_delay: self.retry_delay.unwrap_or_else(|| RetryDelay::Exponential {
                base: defaults.retry.base_delay(),
                max: defaults.retry.max_delay(),
            }),
        };
        (self.query_key, config)
    }
}

impl<T, E> Clone for QueryOptions<T, E> {
    fn clone(&self) -> Self {
        Self {
            query_key: self.query_key.clone(),
            query_fn: Arc::clone(&self.query_fn),
            stale_time: self.stale_time,
            cache_time: self.cache_time,
            retry: self.retry,
            retry_delay: self.retry_delay.clone(),
        }
    }
}

impl<T, E> fmt::Debug for QueryOptions<T, E> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("query_key", &self.query_key)
            .field("stale_time", &self.stale_time)
            .field("cache_time", &self.cache_time)
            .field("retry", &self.retry)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

/// Resolved, immutable configuration of a live query
pub struct QueryConfig<T, E> {
    pub(crate) query_fn: QueryFn<T, E>,
    pub stale_time: Duration,
    pub cache_time: Duration,
    pub retry: Retry,
    pub retry_delay: RetryDelay,
}

impl<T, E> fmt::Debug for QueryConfig<T, E> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("QueryConfig")
            .field("stale_time", &self.stale_time)
            .field("cache_time", &self.cache_time)
            .field("retry", &self.retry)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}
