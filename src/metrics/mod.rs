use lazy_static::lazy_static;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;

lazy_static! {
    /// Completed fetch loops, labelled by final outcome (`success` / `error`)
    pub static ref QUERY_FETCH_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("query_fetch_total", "Completed fetch loops by outcome"),
        &["outcome"]
    )
    .expect("metric can not be created");

    /// Failed attempts that were followed by a backoff sleep
    pub static ref QUERY_RETRY_TOTAL: IntCounter =
        IntCounter::new("query_retry_total", "Fetch attempts scheduled for retry")
            .expect("metric can not be created");

    /// fetch() calls answered by an already in-flight operation
    pub static ref QUERY_DEDUPE_TOTAL: IntCounter =
        IntCounter::new("query_dedupe_total", "fetch() calls joined to an in-flight fetch")
            .expect("metric can not be created");

    /// fetch() calls answered from fresh cached data
    pub static ref QUERY_FRESH_HIT_TOTAL: IntCounter =
        IntCounter::new("query_fresh_hit_total", "fetch() calls served from fresh data")
            .expect("metric can not be created");

    /// Queries removed by a gc timer
    pub static ref QUERY_GC_EVICTED_TOTAL: IntCounter =
        IntCounter::new("query_gc_evicted_total", "Queries evicted by garbage collection")
            .expect("metric can not be created");

    pub static ref REGISTRY: Registry = {
        let registry = Registry::new();
        register_custom_metrics(&registry);
        registry
    };
}

fn register_custom_metrics(registry: &Registry) {
    registry
        .register(Box::new(QUERY_FETCH_TOTAL.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(QUERY_RETRY_TOTAL.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(QUERY_DEDUPE_TOTAL.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(QUERY_FRESH_HIT_TOTAL.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(QUERY_GC_EVICTED_TOTAL.clone()))
        .expect("collector can be registered");
}
