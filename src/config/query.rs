use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

/// Freshness and retention defaults for queries created by a client
///
/// ```toml
/// [defaults]
/// stale_time_ms = 0        # data is stale as soon as it lands
/// cache_time_ms = 300000   # unused entries survive 5 minutes after gc()
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct QueryDefaults {
    /// How long a successful result counts as fresh
    ///
    /// Default: 0 (always stale)
    #[serde(default = "default_stale_time_ms")]
    pub stale_time_ms: u64,

    /// How long an unused query is kept once a gc sweep schedules it
    ///
    /// Default: 300000 (5 minutes)
    #[serde(default = "default_cache_time_ms")]
    pub cache_time_ms: u64,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            stale_time_ms: default_stale_time_ms(),
            cache_time_ms: default_cache_time_ms(),
        }
    }
}

impl QueryDefaults {
    pub fn stale_time(&self) -> Duration {
        Duration::from_millis(self.stale_time_ms)
    }

    pub fn cache_time(&self) -> Duration {
        Duration::from_millis(self.cache_time_ms)
    }
}

fn default_stale_time_ms() -> u64 {
    0
}
fn default_cache_time_ms() -> u64 {
    5 * 60_000
}
