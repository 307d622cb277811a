//! Prometheus metrics
//!
//! All metrics are registered against the default registry and exported
//! through [`gather_metrics`] in the text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Encoder, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge,
    TextEncoder,
};

lazy_static! {
    /// Scheduled import runs by outcome: executed, skipped, failed
    pub static ref IMPORT_RUNS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "recs_import_runs_total",
        "Scheduled import runs by outcome",
        &["status"]
    )
    .unwrap();

    /// Rows seen during imports by outcome: inserted, skipped
    pub static ref IMPORT_ROWS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "recs_import_rows_total",
        "Import rows by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Wall time of import runs
    pub static ref IMPORT_DURATION: Histogram = register_histogram!(
        "recs_import_duration_seconds",
        "Duration of import runs in seconds",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0]
    )
    .unwrap();

    /// Scheduler lock attempts: acquired, held_elsewhere
    pub static ref LOCK_ACQUISITIONS: IntCounterVec = register_int_counter_vec!(
        "recs_lock_acquisitions_total",
        "Scheduler lock acquisition attempts by result",
        &["result"]
    )
    .unwrap();

    /// Aggregation computations by outcome: ok, empty, failed
    pub static ref AGGREGATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "recs_aggregations_total",
        "Aggregation computations by outcome",
        &["status"]
    )
    .unwrap();

    /// Live entries in the aggregate cache
    pub static ref CACHE_ENTRIES: IntGauge = register_int_gauge!(
        "recs_cache_entries",
        "Entries currently held in the aggregate cache"
    )
    .unwrap();

    /// Cache hit ratio since startup
    pub static ref CACHE_HIT_RATIO: Gauge = register_gauge!(
        "recs_cache_hit_ratio",
        "Fraction of aggregate lookups served from cache"
    )
    .unwrap();

    /// Requests rejected by the rate limiter
    pub static ref RATE_LIMIT_REJECTIONS: IntCounter = register_int_counter!(
        "recs_rate_limit_rejections_total",
        "Requests rejected by the per-client rate limiter"
    )
    .unwrap();

    /// Errors surfaced to callers or the scheduler, by kind
    pub static ref ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "recs_errors_total",
        "Errors by kind",
        &["kind"]
    )
    .unwrap();

    /// 1 when all services report healthy, 0 otherwise
    pub static ref HEALTH_STATUS: IntGauge = register_int_gauge!(
        "recs_health_status",
        "Overall service health (1 healthy, 0 degraded)"
    )
    .unwrap();

    /// Seconds since process start
    pub static ref UPTIME_SECONDS: IntGauge = register_int_gauge!(
        "recs_uptime_seconds",
        "Seconds since the daemon started"
    )
    .unwrap();
}

/// Force registration of all metrics so they appear in the first scrape
/// even before being touched.
pub fn init() {
    IMPORT_RUNS_TOTAL.with_label_values(&["executed"]).get();
    IMPORT_ROWS_TOTAL.with_label_values(&["inserted"]).get();
    LOCK_ACQUISITIONS.with_label_values(&["acquired"]).get();
    AGGREGATIONS_TOTAL.with_label_values(&["ok"]).get();
    CACHE_ENTRIES.get();
    CACHE_HIT_RATIO.get();
    RATE_LIMIT_REJECTIONS.get();
    ERRORS_TOTAL.with_label_values(&["import"]).get();
    HEALTH_STATUS.set(1);
    UPTIME_SECONDS.get();
}

/// Render all registered metrics in the Prometheus text format.
pub fn gather_metrics() -> Result<String, String> {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&metric_families, &mut buffer)
        .map_err(|e| e.to_string())?;
    String::from_utf8(buffer).map_err(|e| e.to_string())
}

/// Record the outcome of one scheduled run.
pub fn record_import_run(status: &str) {
    IMPORT_RUNS_TOTAL.with_label_values(&[status]).inc();
}

/// Record row counts from one import.
pub fn record_import_rows(inserted: usize, skipped: usize) {
    IMPORT_ROWS_TOTAL
        .with_label_values(&["inserted"])
        .inc_by(inserted as u64);
    IMPORT_ROWS_TOTAL
        .with_label_values(&["skipped"])
        .inc_by(skipped as u64);
}

/// Record one lock attempt.
pub fn record_lock_attempt(acquired: bool) {
    let result = if acquired { "acquired" } else { "held_elsewhere" };
    LOCK_ACQUISITIONS.with_label_values(&[result]).inc();
}

/// Record one aggregation computation.
pub fn record_aggregation(status: &str) {
    AGGREGATIONS_TOTAL.with_label_values(&[status]).inc();
}

/// Push current cache gauges.
pub fn record_cache_state(entries: usize, hit_ratio: f64) {
    CACHE_ENTRIES.set(entries as i64);
    CACHE_HIT_RATIO.set(hit_ratio);
}

/// Count one error under its kind label.
pub fn record_error(kind: &str) {
    ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

/// Push the health and uptime gauges.
pub fn record_health(healthy: bool, uptime_secs: u64) {
    HEALTH_STATUS.set(if healthy { 1 } else { 0 });
    UPTIME_SECONDS.set(uptime_secs as i64);
}
