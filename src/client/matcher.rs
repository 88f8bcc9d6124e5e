use std::fmt;
use std::sync::Arc;

/// Selects queries for bulk operations
///
/// ```ignore
/// client.invalidate_queries(QueryMatcher::All)?;
/// client.invalidate_queries("todos")?;                 // every key containing "todos"
/// client.remove_queries(QueryMatcher::predicate(|k| k.ends_with(":draft")))?;
/// ```
#[derive(Clone, Default)]
pub enum QueryMatcher {
    /// Every query
    #[default]
    All,
    /// Queries whose key contains this substring
    Exact(String),
    /// Queries whose key satisfies the predicate
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl QueryMatcher {
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        QueryMatcher::Predicate(Arc::new(f))
    }

    pub fn matches(
        &self,
        key: &str,
    ) -> bool {
        match self {
            QueryMatcher::All => true,
            QueryMatcher::Exact(fragment) => key.contains(fragment.as_str()),
            QueryMatcher::Predicate(f) => f(key),
        }
    }
}

impl From<&str> for QueryMatcher {
    fn from(fragment: &str) -> Self {
        QueryMatcher::Exact(fragment.to_string())
    }
}

impl From<String> for QueryMatcher {
    fn from(fragment: String) -> Self {
        QueryMatcher::Exact(fragment)
    }
}

impl fmt::Debug for QueryMatcher {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            QueryMatcher::All => f.write_str("All"),
            QueryMatcher::Exact(fragment) => f.debug_tuple("Exact").field(fragment).finish(),
            QueryMatcher::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}
