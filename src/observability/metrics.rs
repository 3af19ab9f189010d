//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method and outcome
//! - `proxy_request_duration_seconds` (histogram): time to serve a connection
//! - `proxy_active_connections` (gauge): current connection count
//! - `proxy_cache_lookups_total` (counter): GET cache lookups by result
//! - `proxy_cache_write_errors_total` (counter): failed cache stores
//! - `proxy_origin_failures_total` (counter): 403/404/500 seen in origin responses
//! - `proxy_tunnel_bytes_total` (counter): bytes relayed by direction
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a finished connection.
pub fn record_request(method: &'static str, outcome: &'static str, start: Instant) {
    counter!("proxy_requests_total", "method" => method, "outcome" => outcome).increment(1);
    histogram!("proxy_request_duration_seconds", "method" => method)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_active_connections(count: u64) {
    gauge!("proxy_active_connections").set(count as f64);
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("proxy_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_write_error() {
    counter!("proxy_cache_write_errors_total").increment(1);
}

pub fn record_origin_failure(status: u16) {
    counter!("proxy_origin_failures_total", "status" => status.to_string()).increment(1);
}

pub fn record_tunnel_bytes(direction: &'static str, bytes: u64) {
    counter!("proxy_tunnel_bytes_total", "direction" => direction).increment(bytes);
}
