//! Metrics module
//!
//! Prometheus counters for the upload workflow. A short-lived CLI cannot be
//! scraped, so the registry is rendered to the text exposition format and
//! written to a textfile collector path on exit.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Encoder,
    Histogram, TextEncoder,
};
use std::path::Path;

lazy_static! {
    // Upload metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "knolx_uploads_total",
        "Upload episodes by outcome",
        &["status"]  // "started", "accepted", "failed", "completed", "cancelled"
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "knolx_upload_bytes_total",
        "Total bytes accepted by the portal"
    ).unwrap();

    pub static ref UPLOAD_DURATION: Histogram = register_histogram!(
        "knolx_upload_duration_seconds",
        "Time from upload start to the portal reporting 100%",
        vec![1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0]
    ).unwrap();

    // Polling metrics
    pub static ref POLL_REQUESTS: CounterVec = register_counter_vec!(
        "knolx_poll_requests_total",
        "Polling requests by chain and result",
        &["chain", "status"]  // chain: "progress" or "reference"
    ).unwrap();

    pub static ref POLL_STALLS: CounterVec = register_counter_vec!(
        "knolx_poll_stalls_total",
        "Polling chains halted by an error or an exhausted policy",
        &["chain"]
    ).unwrap();

    // Cancel metrics
    pub static ref CANCEL_REQUESTS: CounterVec = register_counter_vec!(
        "knolx_cancel_requests_total",
        "Cancel requests by portal acknowledgement",
        &["status"]  // "acknowledged" or "rejected"
    ).unwrap();

    // Metadata metrics
    pub static ref METADATA_UPDATES: CounterVec = register_counter_vec!(
        "knolx_metadata_updates_total",
        "Metadata update requests",
        &["status"]
    ).unwrap();

    // Search metrics
    pub static ref SEARCH_REQUESTS: CounterVec = register_counter_vec!(
        "knolx_search_requests_total",
        "Search requests by route",
        &["route", "status"]
    ).unwrap();
}

fn status_label(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

/// Record an upload episode transition
pub fn record_upload(status: &str) {
    UPLOADS_TOTAL.with_label_values(&[status]).inc();
}

/// Record an upload accepted by the portal
pub fn record_upload_accepted(bytes: u64) {
    UPLOADS_TOTAL.with_label_values(&["accepted"]).inc();
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record upload duration
pub fn record_upload_duration(duration_secs: f64) {
    UPLOAD_DURATION.observe(duration_secs);
}

/// Record one polling request
pub fn record_poll(chain: &str, success: bool) {
    POLL_REQUESTS
        .with_label_values(&[chain, status_label(success)])
        .inc();
}

/// Record a halted polling chain
pub fn record_poll_stall(chain: &str) {
    POLL_STALLS.with_label_values(&[chain]).inc();
}

/// Record a cancel request
pub fn record_cancel(acknowledged: bool) {
    let status = if acknowledged {
        "acknowledged"
    } else {
        "rejected"
    };
    CANCEL_REQUESTS.with_label_values(&[status]).inc();
}

/// Record a metadata update
pub fn record_metadata_update(success: bool) {
    METADATA_UPDATES
        .with_label_values(&[status_label(success)])
        .inc();
}

/// Record a search request
pub fn record_search(route: &str, success: bool) {
    SEARCH_REQUESTS
        .with_label_values(&[route, status_label(success)])
        .inc();
}

/// Render every registered metric in the Prometheus text format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Write the text exposition to `path` for a textfile collector
pub fn write_textfile(path: &Path) -> std::io::Result<()> {
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, gather_text())?;
    std::fs::rename(&tmp, path)
}
