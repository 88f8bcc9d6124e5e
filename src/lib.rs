//! Asynchronous query cache.
//!
//! A [`QueryClient`] owns one [`Query`] per key. Each query memoizes the result
//! of an async fetch function, tracks freshness (`stale_time`), shares a single
//! in-flight fetch between concurrent callers, retries failures with backoff,
//! and is evicted `cache_time` after a [`QueryClient::gc`] sweep finds it
//! without subscribers.
//!
//! All timers and fetch loops run on the tokio runtime the client was built
//! on. [`QueryClient::shutdown`] cancels them.

mod client;
mod config;
mod errors;
mod metrics;
mod query;

pub use client::*;
pub use config::*;
pub use errors::*;
pub use metrics::*;
pub use query::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
