//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_connections_total` (counter): accepted client connections
//! - `proxy_active_connections` (gauge): current connection count
//! - `proxy_route_decisions_total` (counter): transactions by route
//! - `proxy_tls_handshake_failures_total` (counter): by reason
//! - `proxy_forward_failures_total` (counter): by backend

use std::net::SocketAddr;

use metrics::counter;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::routing::Route;

/// Start the Prometheus scrape endpoint on `addr`.
///
/// Must be called from inside a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_connection() {
    counter!("proxy_connections_total").increment(1);
}

pub fn record_route(route: Route) {
    counter!("proxy_route_decisions_total", "route" => route.as_str()).increment(1);
}

/// `reason` is `certificate_rejected` or `handshake_error`.
pub fn record_tls_failure(reason: &'static str) {
    counter!("proxy_tls_handshake_failures_total", "reason" => reason).increment(1);
}

pub fn record_forward_failure(backend: &'static str) {
    counter!("proxy_forward_failures_total", "backend" => backend).increment(1);
}
