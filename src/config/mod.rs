//! Configuration for the query client.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file named by `QUERY_CACHE_CONFIG`
//! - Environment variable overrides (`QUERY_CACHE__` prefix)

mod query;
mod retry;
pub use query::*;
pub use retry::*;


use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

const CONFIG_PATH_ENV: &str = "QUERY_CACHE_CONFIG";
const ENV_PREFIX: &str = "QUERY_CACHE";

/// Client-wide settings
///
/// Every field here is a default: per-query options set on
/// [`QueryOptions`](crate::QueryOptions) take precedence when the query is
/// created.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ClientConfig {
    /// Freshness and retention defaults
    #[serde(default)]
    pub defaults: QueryDefaults,
    /// Retry policy for failed fetches
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl ClientConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `QUERY_CACHE_CONFIG` (if set)
    /// 3. Environment variables with `QUERY_CACHE__` prefix (highest priority)
    ///
    /// # Example
    /// ```ignore
    /// std::env::set_var("QUERY_CACHE__DEFAULTS__STALE_TIME_MS", "10000");
    /// let cfg = ClientConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var(CONFIG_PATH_ENV) {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional overrides from a file, then re-applies the
    /// environment so it keeps the highest priority. No validation.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates configuration and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        self.retry.validate()?;
        Ok(self)
    }
}
