/// Metrics and telemetry for Doorkeeper
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - HTTP request counts and latencies
/// - Magic link issuance and token redemption
/// - Bearer key validation and rate limiting
/// - Passkey ceremonies
/// - Background sweeps

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    // ========== HTTP Metrics ==========

    /// Total HTTP requests by method, route class, and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "doorkeeper_http_requests_total",
        "Total number of HTTP requests",
        &["method", "class", "status"]
    )
    .unwrap();

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "doorkeeper_http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["method", "class"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .unwrap();

    // ========== Credential Metrics ==========

    /// Login link requests by flow and outcome (issued, skipped, delivery_failed)
    pub static ref MAGIC_LINKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "doorkeeper_magic_links_total",
        "Magic link requests by flow and outcome",
        &["flow", "outcome"]
    )
    .unwrap();

    /// Token redemptions by outcome
    pub static ref TOKEN_REDEMPTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "doorkeeper_token_redemptions_total",
        "Magic link token redemptions by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Bearer key checks by outcome (valid, invalid, rate_limited)
    pub static ref BEARER_VALIDATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "doorkeeper_bearer_validations_total",
        "Bearer API key validations by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Passkey ceremonies by kind and outcome
    pub static ref PASSKEY_CEREMONIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "doorkeeper_passkey_ceremonies_total",
        "Passkey ceremonies by kind and outcome",
        &["ceremony", "outcome"]
    )
    .unwrap();

    // ========== Background Job Metrics ==========

    /// Rows or entries removed by sweeps
    pub static ref SWEEP_REMOVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "doorkeeper_sweep_removed_total",
        "Expired entries removed by background sweeps",
        &["target"]
    )
    .unwrap();

    /// Background job executions by job and status
    pub static ref BACKGROUND_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "doorkeeper_background_jobs_total",
        "Background job executions",
        &["job", "status"]
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record an HTTP request
pub fn record_http_request(method: &str, class: &str, status: u16, duration: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, class, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, class])
        .observe(duration);
}

/// Record a login link request
pub fn record_magic_link(flow: &str, outcome: &str) {
    MAGIC_LINKS_TOTAL.with_label_values(&[flow, outcome]).inc();
}

pub fn record_token_redemption(success: bool) {
    let outcome = if success { "success" } else { "invalid" };
    TOKEN_REDEMPTIONS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_bearer_validation(outcome: &str) {
    BEARER_VALIDATIONS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_passkey_ceremony(ceremony: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    PASSKEY_CEREMONIES_TOTAL
        .with_label_values(&[ceremony, outcome])
        .inc();
}

/// Record a finished sweep
pub fn record_sweep(target: &str, removed: u64) {
    SWEEP_REMOVED_TOTAL.with_label_values(&[target]).inc_by(removed);
    BACKGROUND_JOBS_TOTAL
        .with_label_values(&[target, "success"])
        .inc();
}

pub fn record_background_failure(job: &str) {
    BACKGROUND_JOBS_TOTAL.with_label_values(&[job, "error"]).inc();
}
