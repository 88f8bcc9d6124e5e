//! Query cache error hierarchy
//!
//! Fetch failures are not part of this hierarchy: they are values of the
//! query's own error type and only ever show up in
//! [`QueryState::error`](crate::QueryState). The errors below describe
//! structural misuse of the cache and surface immediately to the caller.

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Settings loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The client was used in a way it cannot recover from
    #[error(transparent)]
    Setup(#[from] ConfigurationError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// Client construction requires an active tokio runtime
    #[error("QueryClient must be constructed inside a tokio runtime")]
    NoRuntime,

    /// Operation issued after `QueryClient::shutdown`
    #[error("QueryClient has been shut down")]
    ClientClosed,

    /// A key was requested with a data/error type it was not created with
    #[error("Query {key} is cached with a different data or error type (requested {requested})")]
    TypeMismatch {
        key: String,
        requested: &'static str,
    },
}

impl Error {
    /// True for misuse of a client that has already been torn down
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Setup(ConfigurationError::ClientClosed))
    }
}
