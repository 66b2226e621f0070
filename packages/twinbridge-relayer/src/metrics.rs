//! Prometheus metrics for the twinbridge relayer
//!
//! Exposes metrics on /metrics endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Gauge, GaugeVec, HistogramVec,
};

lazy_static! {
    // Scan metrics
    pub static ref BLOCKS_SCANNED: CounterVec = register_counter_vec!(
        "relayer_blocks_scanned_total",
        "Total number of blocks covered by scan windows",
        &["chain"]
    ).unwrap();

    pub static ref LATEST_BLOCK: GaugeVec = register_gauge_vec!(
        "relayer_latest_block",
        "Highest block number scanned",
        &["chain"]
    ).unwrap();

    pub static ref EVENTS_DETECTED: CounterVec = register_counter_vec!(
        "relayer_events_detected_total",
        "Total number of bridge events detected",
        &["chain", "event"]
    ).unwrap();

    pub static ref PARTIAL_FAILURES: CounterVec = register_counter_vec!(
        "relayer_partial_failures_total",
        "Sub-window range queries that failed",
        &["chain"]
    ).unwrap();

    pub static ref ABANDONED_WINDOWS: CounterVec = register_counter_vec!(
        "relayer_abandoned_windows_total",
        "Sub-windows given up after exhausting retries",
        &["chain"]
    ).unwrap();

    pub static ref PENDING_WINDOWS: GaugeVec = register_gauge_vec!(
        "relayer_pending_retry_windows",
        "Failed sub-windows waiting for a rescan",
        &["chain"]
    ).unwrap();

    pub static ref PENDING_EVENTS: GaugeVec = register_gauge_vec!(
        "relayer_pending_retry_events",
        "Events whose submission failed before broadcast, waiting to be resubmitted",
        &["chain"]
    ).unwrap();

    pub static ref ABANDONED_EVENTS: CounterVec = register_counter_vec!(
        "relayer_abandoned_events_total",
        "Events given up after exhausting submission retries",
        &["chain"]
    ).unwrap();

    // Submission metrics
    pub static ref SUBMISSIONS: CounterVec = register_counter_vec!(
        "relayer_submissions_total",
        "Transactions submitted, by outcome",
        &["chain", "function", "status"]
    ).unwrap();

    pub static ref TICK_DURATION: HistogramVec = register_histogram_vec!(
        "relayer_tick_duration_seconds",
        "Time to scan and dispatch one poll tick",
        &["chain"],
        vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "relayer_errors_total",
        "Total number of errors",
        &["chain", "type"]
    ).unwrap();

    // Health metrics
    pub static ref UP: Gauge = register_gauge!(
        "relayer_up",
        "Whether the relayer is up and running"
    ).unwrap();

    pub static ref LAST_SUCCESSFUL_POLL: GaugeVec = register_gauge_vec!(
        "relayer_last_successful_poll_timestamp",
        "Unix timestamp of last successful poll",
        &["chain"]
    ).unwrap();
}

/// Record a completed scan window
pub fn record_window_scanned(chain: &str, from_block: u64, to_block: u64) {
    BLOCKS_SCANNED
        .with_label_values(&[chain])
        .inc_by((to_block - from_block + 1) as f64);
    LATEST_BLOCK.with_label_values(&[chain]).set(to_block as f64);
    LAST_SUCCESSFUL_POLL
        .with_label_values(&[chain])
        .set(chrono::Utc::now().timestamp() as f64);
}

/// Record detected events
pub fn record_events_detected(chain: &str, event: &str, count: usize) {
    EVENTS_DETECTED
        .with_label_values(&[chain, event])
        .inc_by(count as f64);
}

/// Record a failed sub-window
pub fn record_partial_failure(chain: &str) {
    PARTIAL_FAILURES.with_label_values(&[chain]).inc();
}

/// Record an abandoned sub-window
pub fn record_abandoned_window(chain: &str) {
    ABANDONED_WINDOWS.with_label_values(&[chain]).inc();
}

/// Update the retry queue depth
pub fn set_pending_windows(chain: &str, count: usize) {
    PENDING_WINDOWS.with_label_values(&[chain]).set(count as f64);
}

/// Update the resubmission queue depth
pub fn set_pending_events(chain: &str, count: usize) {
    PENDING_EVENTS.with_label_values(&[chain]).set(count as f64);
}

/// Record an event whose relay was given up
pub fn record_abandoned_event(chain: &str) {
    ABANDONED_EVENTS.with_label_values(&[chain]).inc();
}

/// Record a submission outcome (`confirmed`, `reverted`, ..., or an error class)
pub fn record_submission(chain: &str, function: &str, status: &str) {
    SUBMISSIONS
        .with_label_values(&[chain, function, status])
        .inc();
}

/// Record tick latency
pub fn record_tick_duration(chain: &str, seconds: f64) {
    TICK_DURATION.with_label_values(&[chain]).observe(seconds);
}

/// Record an error
pub fn record_error(chain: &str, error_type: &str) {
    ERRORS.with_label_values(&[chain, error_type]).inc();
}
