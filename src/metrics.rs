//! Prometheus metrics for the gatekeeping layer.
//!
//! Metrics are exposed on a dedicated listener (default port 9090) when
//! `METRICS_PORT` is non-zero. Without an installed exporter every recording
//! function is a no-op.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `gatehouse_rate_limited_total` - Requests denied by the limiter
//! - `gatehouse_rate_limiter_evictions_total` - Evicted client buckets (label: reason)
//! - `gatehouse_auth_failures_total` - Rejected credentials (label: reason)
//! - `gatehouse_oauth_logins_total` - Completed handshakes (labels: provider, outcome)
//!
//! ## Histograms
//! - `gatehouse_provider_request_duration_seconds` - Identity provider calls (labels: provider, call)
//!
//! ## Gauges
//! - `gatehouse_rate_limiter_visitors` - Tracked client identities
//!
//! # Usage
//!
//! ```rust,ignore
//! use gatehouse::metrics::{init_metrics, record_auth_failure};
//!
//! init_metrics("0.0.0.0:9090".parse()?)?;
//! record_auth_failure("expired");
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const RATE_LIMITED_TOTAL: &str = "gatehouse_rate_limited_total";
    pub const LIMITER_EVICTIONS_TOTAL: &str = "gatehouse_rate_limiter_evictions_total";
    pub const LIMITER_VISITORS: &str = "gatehouse_rate_limiter_visitors";
    pub const AUTH_FAILURES_TOTAL: &str = "gatehouse_auth_failures_total";
    pub const OAUTH_LOGINS_TOTAL: &str = "gatehouse_oauth_logins_total";
    pub const PROVIDER_REQUEST_DURATION_SECONDS: &str =
        "gatehouse_provider_request_duration_seconds";
}

/// Install the Prometheus exporter on `metrics_addr` and describe all metrics.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Total number of requests denied by the rate limiter"
    );
    describe_counter!(
        names::LIMITER_EVICTIONS_TOTAL,
        "Total number of client buckets evicted (sweep or capacity)"
    );
    describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Total number of rejected credentials by reason"
    );
    describe_counter!(
        names::OAUTH_LOGINS_TOTAL,
        "Total number of OAuth handshake completions by provider and outcome"
    );

    describe_histogram!(
        names::PROVIDER_REQUEST_DURATION_SECONDS,
        "Identity provider HTTP call duration in seconds"
    );

    describe_gauge!(
        names::LIMITER_VISITORS,
        "Number of client identities tracked by the rate limiter"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

// =============================================================================
// Rate Limiter
// =============================================================================

/// Record one request denied by the limiter.
pub fn record_rate_limited() {
    counter!(names::RATE_LIMITED_TOTAL).increment(1);
}

/// Record evicted buckets. `reason` is `sweep` or `capacity`.
pub fn record_limiter_evictions(reason: &str, count: usize) {
    if count == 0 {
        return;
    }
    counter!(names::LIMITER_EVICTIONS_TOTAL, "reason" => reason.to_string())
        .increment(count as u64);
}

pub fn set_limiter_visitors(count: usize) {
    gauge!(names::LIMITER_VISITORS).set(count as f64);
}

// =============================================================================
// Authentication
// =============================================================================

/// Record a rejected credential.
pub fn record_auth_failure(reason: &str) {
    counter!(names::AUTH_FAILURES_TOTAL, "reason" => reason.to_string()).increment(1);
}

/// Record the outcome of one OAuth callback.
pub fn record_oauth_login(provider: &str, outcome: &str) {
    counter!(names::OAUTH_LOGINS_TOTAL, "provider" => provider.to_string(), "outcome" => outcome.to_string())
        .increment(1);
}

/// Record the duration of one identity provider call.
pub fn record_provider_request(provider: &str, call: &str, duration_secs: f64) {
    histogram!(names::PROVIDER_REQUEST_DURATION_SECONDS, "provider" => provider.to_string(), "call" => call.to_string())
        .record(duration_secs);
}
