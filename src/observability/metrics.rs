//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define fleet, controller, lock and router metrics
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `fleet_live_members` (gauge): in-service members
//! - `fleet_desired_members` (gauge): recorded desired count
//! - `fleet_member_health` (gauge): 1=healthy, 0=otherwise, per member
//! - `fleet_health_transitions_total` (counter): transitions by target status
//! - `fleet_reconcile_cycles_total` (counter): cycles by outcome
//! - `fleet_lock_acquisitions_total` (counter): acquire attempts by result
//! - `router_requests_total` (counter): data-plane requests by status
//! - `router_request_duration_seconds` (histogram): data-plane latency
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so library code and tests never need setup

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and its HTTP listener. Requires a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_lock_acquisition(result: &'static str) {
    ::metrics::counter!("fleet_lock_acquisitions_total", "result" => result).increment(1);
}

pub fn record_member_health(member: &str, healthy: bool) {
    ::metrics::gauge!("fleet_member_health", "member" => member.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_health_transition(to: &'static str) {
    ::metrics::counter!("fleet_health_transitions_total", "to" => to).increment(1);
}

pub fn record_reconcile(outcome: &'static str) {
    ::metrics::counter!("fleet_reconcile_cycles_total", "outcome" => outcome).increment(1);
}

pub fn record_fleet_size(live: usize, desired: u32) {
    ::metrics::gauge!("fleet_live_members").set(live as f64);
    ::metrics::gauge!("fleet_desired_members").set(desired as f64);
}

pub fn record_request(status: u16, start: Instant) {
    ::metrics::counter!("router_requests_total", "status" => status.to_string()).increment(1);
    ::metrics::histogram!("router_request_duration_seconds")
        .record(start.elapsed().as_secs_f64());
}
