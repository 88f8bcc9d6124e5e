use tokio::time::Instant;

/// Lifecycle position of a query
///
/// `Idle → Pending → {Success, Error}`, and back to `Pending` on every
/// subsequent fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryStatus {
    /// Never fetched
    #[default]
    Idle,
    /// A fetch loop has started and not yet produced a result
    Pending,
    /// The last fetch loop resolved with data
    Success,
    /// The last fetch loop exhausted its retries
    Error,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Idle => "idle",
            QueryStatus::Pending => "pending",
            QueryStatus::Success => "success",
            QueryStatus::Error => "error",
        }
    }
}

/// Snapshot of a query's state
///
/// Returned by value from [`Query::state`](crate::Query::state). A snapshot
/// never updates itself; call the accessor again after any await point.
#[derive(Debug, Clone)]
pub struct QueryState<T, E> {
    pub status: QueryStatus,
    /// True while a fetch loop is in flight
    pub is_fetching: bool,
    /// Last successfully fetched data. Kept across later failures.
    pub data: Option<T>,
    /// Error from the last exhausted fetch loop
    pub error: Option<E>,
    /// When `data` was last written
    pub last_updated: Option<Instant>,
    /// Set by `invalidate()`, cleared only by a successful fetch
    pub invalidated: bool,
}

impl<T, E> Default for QueryState<T, E> {
    fn default() -> Self {
        Self {
            status: QueryStatus::Idle,
            is_fetching: false,
            data: None,
            error: None,
            last_updated: None,
            invalidated: false,
        }
    }
}

impl<T, E> QueryState<T, E> {
    pub fn is_idle(&self) -> bool {
        self.status == QueryStatus::Idle
    }

    pub fn is_pending(&self) -> bool {
        self.status == QueryStatus::Pending
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }
}
