//! Prometheus metrics for reconciler-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Sessions started, by draft kind.
pub static SESSIONS_STARTED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reconciler_sessions_started_total",
        "Total number of sessions started",
        &["kind"]
    )
    .expect("Failed to register sessions_started")
});

/// Inbound events processed, by outcome.
pub static EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reconciler_events_total",
        "Total number of inbound events processed",
        &["outcome"] // updated, refused, account_requested, committed, commit_failed, closed
    )
    .expect("Failed to register events_total")
});

/// Commit attempts, by status.
pub static COMMITS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reconciler_commits_total",
        "Total number of commit attempts",
        &["status"] // ok, taxonomy_changed, rejected, unavailable
    )
    .expect("Failed to register commits_total")
});

/// Capability call failures, by capability.
pub static PROVIDER_FAILURES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reconciler_provider_failures_total",
        "Total number of capability call failures",
        &["capability"] // extraction, interpretation
    )
    .expect("Failed to register provider_failures")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "reconciler_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&SESSIONS_STARTED);
    Lazy::force(&EVENTS_TOTAL);
    Lazy::force(&COMMITS_TOTAL);
    Lazy::force(&PROVIDER_FAILURES);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
