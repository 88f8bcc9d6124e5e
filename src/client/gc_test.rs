use std::time::Duration;

use tokio::time::sleep;

use crate::test_utils::*;

#[tokio::test(start_paused = true)]
async fn test_unused_query_evicted_after_cache_time() {
    let client = test_client();
    let calls = CallCounter::new();
    client
        .ensure_query(numbering("evict", &calls).cache_time(Duration::from_millis(100)))
        .unwrap();

    assert_eq!(client.gc().unwrap(), 1);
    assert!(client.is_gc_scheduled("evict"));

    sleep(Duration::from_millis(99)).await;
    assert!(client.contains_query("evict"));

    sleep(Duration::from_millis(2)).await;
    assert!(!client.contains_query("evict"));
    assert!(!client.is_gc_scheduled("evict"));
}

#[tokio::test(start_paused = true)]
async fn test_subscriber_before_timer_fires_keeps_query() {
    let client = test_client();
    let calls = CallCounter::new();
    let query = client
        .ensure_query(numbering("rescued", &calls).cache_time(Duration::from_millis(100)))
        .unwrap();

    client.gc().unwrap();
    sleep(Duration::from_millis(50)).await;

    let sub = query.subscribe(|_| {});
    assert!(!client.is_gc_scheduled("rescued"));

    sleep(Duration::from_millis(200)).await;
    assert!(client.contains_query("rescued"));

    // Once unused again, the next sweep evicts it
    drop(sub);
    assert_eq!(client.gc().unwrap(), 1);
    sleep(Duration::from_millis(101)).await;
    assert!(!client.contains_query("rescued"));
}

#[tokio::test(start_paused = true)]
async fn test_gc_never_evicts_subscribed_query() {
    let client = test_client();
    let calls = CallCounter::new();
    let query = client
        .ensure_query(numbering("busy", &calls).cache_time(Duration::from_millis(10)))
        .unwrap();
    let _sub = query.subscribe(|_| {});

    assert_eq!(client.gc().unwrap(), 0);
    assert!(!client.is_gc_scheduled("busy"));

    sleep(Duration::from_secs(1)).await;
    assert!(client.contains_query("busy"));
}

#[tokio::test(start_paused = true)]
async fn test_gc_does_not_reschedule_pending_timer() {
    let client = test_client();
    let calls = CallCounter::new();
    client
        .ensure_query(numbering("once", &calls).cache_time(Duration::from_millis(100)))
        .unwrap();

    assert_eq!(client.gc().unwrap(), 1);
    sleep(Duration::from_millis(60)).await;
    assert_eq!(client.gc().unwrap(), 0);

    // The first timer's deadline stands
    sleep(Duration::from_millis(41)).await;
    assert!(!client.contains_query("once"));
}

#[tokio::test(start_paused = true)]
async fn test_each_query_uses_its_own_cache_time() {
    let client = test_client();
    let calls = CallCounter::new();
    client
        .ensure_query(numbering("short", &calls).cache_time(Duration::from_millis(50)))
        .unwrap();
    client
        .ensure_query(numbering("long", &calls).cache_time(Duration::from_millis(500)))
        .unwrap();

    assert_eq!(client.gc().unwrap(), 2);

    sleep(Duration::from_millis(60)).await;
    assert!(!client.contains_query("short"));
    assert!(client.contains_query("long"));

    sleep(Duration::from_millis(450)).await;
    assert!(client.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_default_cache_time_is_five_minutes() {
    let client = test_client();
    let calls = CallCounter::new();
    client.ensure_query(numbering("default", &calls)).unwrap();

    client.gc().unwrap();

    sleep(Duration::from_secs(299)).await;
    assert!(client.contains_query("default"));
    sleep(Duration::from_secs(2)).await;
    assert!(!client.contains_query("default"));
}

#[tokio::test(start_paused = true)]
async fn test_eviction_does_not_stop_in_flight_fetch() {
    let client = test_client();
    let calls = CallCounter::new();
    let query = client
        .ensure_query(resolving("slow", 5, Duration::from_millis(300), &calls).cache_time(Duration::from_millis(100)))
        .unwrap();

    let fetching = query.fetch();
    client.gc().unwrap();
    sleep(Duration::from_millis(150)).await;
    assert!(!client.contains_query("slow"));

    fetching.await;
    assert_eq!(query.state().data, Some(5));
    assert!(!query.is_fetching());
}

#[tokio::test(start_paused = true)]
async fn test_subscriber_on_removed_query_keeps_replacement_timer() {
    let client = test_client();
    let calls = CallCounter::new();
    let removed = client.ensure_query(numbering("reused", &calls)).unwrap();
    client.remove_queries("reused").unwrap();

    client
        .ensure_query(numbering("reused", &calls).cache_time(Duration::from_millis(100)))
        .unwrap();
    assert_eq!(client.gc().unwrap(), 1);

    let _sub = removed.subscribe(|_| {});
    assert!(client.is_gc_scheduled("reused"));

    sleep(Duration::from_millis(101)).await;
    assert!(!client.contains_query("reused"));
}

#[tokio::test(start_paused = true)]
async fn test_timer_for_replaced_query_does_not_evict_newcomer() {
    let client = test_client();
    let calls = CallCounter::new();
    client
        .ensure_query(numbering("swapped", &calls).cache_time(Duration::from_millis(100)))
        .unwrap();
    assert_eq!(client.gc().unwrap(), 1);

    // Replace the entry under the same key; the old timer goes with it
    client.remove_queries("swapped").unwrap();
    client
        .ensure_query(numbering("swapped", &calls).cache_time(Duration::from_secs(60)))
        .unwrap();
    assert_eq!(client.gc().unwrap(), 1);

    sleep(Duration::from_millis(200)).await;
    assert!(client.contains_query("swapped"));
}
