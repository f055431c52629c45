//! Metrics collection and exposition.
//!
//! # Metrics
//! - `sse_admissions_total` (counter): admission decisions by `outcome`
//!   (accepted, not_acceptable, too_many_requests, unavailable)
//! - `sse_teardowns_total` (counter): client removals by `kind` (close, error)
//! - `sse_active_clients` (gauge): currently registered clients

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_admission(outcome: &'static str) {
    metrics::counter!("sse_admissions_total", "outcome" => outcome).increment(1);
}

pub fn record_teardown(kind: &'static str) {
    metrics::counter!("sse_teardowns_total", "kind" => kind).increment(1);
}

pub fn set_active_clients(count: usize) {
    metrics::gauge!("sse_active_clients").set(count as f64);
}
