//! Metrics collection and exposition.
//!
//! # Metrics
//! - `geoproxy_upstream_requests_total` (counter): upstream exchanges by protocol, status
//! - `geoproxy_upstream_duration_seconds` (histogram): time to upstream response headers
//! - `geoproxy_capabilities_negotiations_total` (counter): output format lookups by source tier
//! - `geoproxy_geometry_simplifications_total` (counter): simplify outcomes

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one upstream exchange. A status of 0 means no response was received.
pub fn record_upstream_request(protocol: &str, status: u16, start: Instant) {
    counter!(
        "geoproxy_upstream_requests_total",
        "protocol" => protocol.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(
        "geoproxy_upstream_duration_seconds",
        "protocol" => protocol.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

/// Record which fallback tier produced an output format list.
pub fn record_capabilities_negotiation(source: &str) {
    counter!(
        "geoproxy_capabilities_negotiations_total",
        "source" => source.to_string()
    )
    .increment(1);
}

/// Record a simplification outcome: "unchanged", "simplified" or "envelope".
pub fn record_geometry_simplification(outcome: &'static str) {
    counter!("geoproxy_geometry_simplifications_total", "outcome" => outcome).increment(1);
}
