//! Service metrics for Beacon itself.
//!
//! Thin helpers over the `metrics` crate macros. Whatever recorder the
//! application installs receives them; the binary installs the Prometheus
//! recorder so they show up on `/metrics` next to the exposed payload.
//!
//! Provided metrics:
//! * `beacon_http_requests_total` (counter; method, route, status)
//! * `beacon_http_request_duration_seconds` (histogram; method, route, status)
//! * `beacon_rate_limited_total` (counter)
//! * `beacon_panics_recovered_total` (counter; route)
//! * `beacon_active_connections` (gauge)
//! * `beacon_rate_limiter_clients` (gauge)
use std::time::Duration;

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use once_cell::sync::Lazy;

pub const BEACON_HTTP_REQUESTS_TOTAL: &str = "beacon_http_requests_total";
pub const BEACON_HTTP_REQUEST_DURATION_SECONDS: &str = "beacon_http_request_duration_seconds";
pub const BEACON_RATE_LIMITED_TOTAL: &str = "beacon_rate_limited_total";
pub const BEACON_PANICS_RECOVERED_TOTAL: &str = "beacon_panics_recovered_total";
pub const BEACON_ACTIVE_CONNECTIONS: &str = "beacon_active_connections";
pub const BEACON_RATE_LIMITER_CLIENTS: &str = "beacon_rate_limiter_clients";

static DESCRIPTIONS: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        BEACON_HTTP_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of HTTP requests served."
    );
    describe_histogram!(
        BEACON_HTTP_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of HTTP requests served."
    );
    describe_counter!(
        BEACON_RATE_LIMITED_TOTAL,
        Unit::Count,
        "Requests rejected by the per-client rate limiter."
    );
    describe_counter!(
        BEACON_PANICS_RECOVERED_TOTAL,
        Unit::Count,
        "Handler panics contained by the recovery stage."
    );
    describe_gauge!(
        BEACON_ACTIVE_CONNECTIONS,
        "Number of currently open client connections."
    );
    describe_gauge!(
        BEACON_RATE_LIMITER_CLIENTS,
        "Client identities currently tracked by the rate limiter."
    );
});

/// Count a completed request.
pub fn increment_request_total(method: &str, route: &str, status: u16) {
    counter!(
        BEACON_HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a completed request's duration.
pub fn record_request_duration(method: &str, route: &str, status: u16, duration: Duration) {
    histogram!(
        BEACON_HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn increment_rate_limited() {
    counter!(BEACON_RATE_LIMITED_TOTAL).increment(1);
}

pub fn increment_panics_recovered(route: &str) {
    counter!(BEACON_PANICS_RECOVERED_TOTAL, "route" => route.to_string()).increment(1);
}

/// Set current open connection count.
pub fn set_active_connections(count: usize) {
    gauge!(BEACON_ACTIVE_CONNECTIONS).set(count as f64);
}

pub fn set_rate_limiter_clients(count: usize) {
    gauge!(BEACON_RATE_LIMITER_CLIENTS).set(count as f64);
}

/// Register metric descriptions with the installed recorder (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    Lazy::force(&DESCRIPTIONS);
    tracing::debug!("Beacon metric descriptions registered");
    Ok(())
}
