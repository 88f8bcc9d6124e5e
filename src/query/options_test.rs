use std::time::Duration;

use super::*;
use crate::ClientConfig;

#[test]
fn test_retry_normalization() {
    assert_eq!(Retry::from(true).max_retries(), 3);
    assert_eq!(Retry::from(false).max_retries(), 0);
    assert_eq!(Retry::from(7u32).max_retries(), 7);
    assert_eq!(Retry::default().max_retries(), 3);
}

#[test]
fn test_default_retry_delay_doubles_up_to_thirty_seconds() {
    let delay = RetryDelay::default();

    assert_eq!(delay.delay_for(1), Duration::from_millis(1000));
    assert_eq!(delay.delay_for(2), Duration::from_millis(2000));
    assert_eq!(delay.delay_for(3), Duration::from_millis(4000));
    assert_eq!(delay.delay_for(5), Duration::from_millis(16_000));
    assert_eq!(delay.delay_for(6), Duration::from_millis(30_000));
    assert_eq!(delay.delay_for(64), Duration::from_millis(30_000));
}

#[test]
fn test_fixed_and_custom_retry_delay() {
    let fixed = RetryDelay::from(Duration::from_millis(250));
    assert_eq!(fixed.delay_for(1), Duration::from_millis(250));
    assert_eq!(fixed.delay_for(9), Duration::from_millis(250));

    let custom = RetryDelay::custom(|attempt| Duration::from_millis(attempt as u64 * 10));
    assert_eq!(custom.delay_for(3), Duration::from_millis(30));
}

#[test]
fn test_unset_options_inherit_client_defaults() {
    let mut defaults = ClientConfig::default();
    defaults.defaults.stale_time_ms = 1500;
    defaults.defaults.cache_time_ms = 100;
    defaults.retry.max_retries = 1;
    defaults.retry.base_delay_ms = 20;
    defaults.retry.max_delay_ms = 40;

    let options = QueryOptions::new("k", || async { Ok::<u32, String>(1) });
    let (key, config) = options.into_config(&defaults);

    assert_eq!(key, "k");
    assert_eq!(config.stale_time, Duration::from_millis(1500));
    assert_eq!(config.cache_time, Duration::from_millis(100));
    assert_eq!(config.retry.max_retries(), 1);
    assert_eq!(config.retry_delay.delay_for(1), Duration::from_millis(20));
    assert_eq!(config.retry_delay.delay_for(3), Duration::from_millis(40));
}

#[test]
fn test_explicit_options_override_client_defaults() {
    let options = QueryOptions::new("k", || async { Ok::<u32, String>(1) })
        .stale_time(Duration::from_secs(10))
        .cache_time(Duration::from_millis(100))
        .retry(false)
        .retry_delay(Duration::from_millis(5));
    let (_, config) = options.into_config(&ClientConfig::default());

    assert_eq!(config.stale_time, Duration::from_secs(10));
    assert_eq!(config.cache_time, Duration::from_millis(100));
    assert_eq!(config.retry, Retry::Enabled(false));
    assert_eq!(config.retry_delay.delay_for(4), Duration::from_millis(5));
}

#[test]
fn test_client_defaults_match_documented_values() {
    let options = QueryOptions::new("k", || async { Ok::<u32, String>(1) });
    let (_, config) = options.into_config(&ClientConfig::default());

    assert_eq!(config.stale_time, Duration::ZERO);
    assert_eq!(config.cache_time, Duration::from_secs(300));
    assert_eq!(config.retry.max_retries(), 3);
    assert_eq!(config.retry_delay.delay_for(1), Duration::from_secs(1));
    assert_eq!(config.retry_delay.delay_for(10), Duration::from_secs(30));
}
