//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define server metrics (connections, responses, upgrades, frames, errors)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `rebound_connections_total` (counter): accepted connections
//! - `rebound_http_responses_total` (counter): responses written, by status
//! - `rebound_websocket_upgrades_total` (counter): completed handshakes
//! - `rebound_websocket_clients` (gauge): open WebSocket connections
//! - `rebound_websocket_frames_total` (counter): frames received, by opcode
//! - `rebound_websocket_protocol_errors_total` (counter): violations, by close code
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until an
//!   exporter is installed, so tests need no setup

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter, serving scrapes on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_connection() {
    counter!("rebound_connections_total").increment(1);
}

pub fn record_response(status: u16) {
    counter!("rebound_http_responses_total", "status" => status.to_string()).increment(1);
}

pub fn record_upgrade() {
    counter!("rebound_websocket_upgrades_total").increment(1);
}

pub fn websocket_client_opened() {
    gauge!("rebound_websocket_clients").increment(1.0);
}

pub fn websocket_client_closed() {
    gauge!("rebound_websocket_clients").decrement(1.0);
}

pub fn record_frame(opcode: &'static str) {
    counter!("rebound_websocket_frames_total", "opcode" => opcode).increment(1);
}

pub fn record_protocol_error(code: u16) {
    counter!("rebound_websocket_protocol_errors_total", "code" => code.to_string()).increment(1);
}
