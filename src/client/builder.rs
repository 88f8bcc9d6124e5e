use std::time::Duration;

use tokio::runtime::Handle;

use super::QueryClient;
use crate::ClientConfig;
use crate::ConfigurationError;
use crate::Result;
use crate::RetryPolicy;

pub struct QueryClientBuilder {
    config: ClientConfig,
    runtime: Option<Handle>,
}

impl QueryClientBuilder {
    /// Create a new builder with default config
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            runtime: None,
        }
    }

    /// Set the default stale time for new queries (default: 0)
    pub fn stale_time(
        mut self,
        stale_time: Duration,
    ) -> Self {
        self.config.defaults.stale_time_ms = u64::try_from(stale_time.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the default cache time for new queries (default: 5 min)
    pub fn cache_time(
        mut self,
        cache_time: Duration,
    ) -> Self {
        self.config.defaults.cache_time_ms = u64::try_from(cache_time.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the default retry policy for new queries
    pub fn retry_policy(
        mut self,
        retry: RetryPolicy,
    ) -> Self {
        self.config.retry = retry;
        self
    }

    /// Completely replaces the default configuration
    ///
    /// # Warning: Configuration Override
    /// This discards all previous settings configured through individual
    /// methods like [`stale_time`](QueryClientBuilder::stale_time).
    ///
    /// # Example
    /// ```ignore
    /// let client = QueryClient::builder()
    ///     .set_config(ClientConfig::new()?)
    ///     .build()?;
    /// ```
    pub fn set_config(
        mut self,
        config: ClientConfig,
    ) -> Self {
        self.config = config;
        self
    }

    /// Spawn fetch loops and gc timers on this runtime instead of the
    /// current one
    pub fn runtime(
        mut self,
        handle: Handle,
    ) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Validate the configuration and build the client
    ///
    /// Fails with [`ConfigurationError::NoRuntime`] when no runtime was given
    /// and the caller is not inside one.
    pub fn build(self) -> Result<QueryClient> {
        let config = self.config.validate()?;
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| ConfigurationError::NoRuntime)?,
        };
        Ok(QueryClient::from_parts(config, runtime))
    }
}

impl Default for QueryClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
