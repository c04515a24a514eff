//! Metrics collection and exposition.
//!
//! # Metrics
//! - `governor_calls_total` (counter): governed calls by service, outcome
//! - `governor_call_duration_seconds` (histogram): end-to-end latency incl. queueing
//! - `governor_rate_limited_total` (counter): token waits that hit their bound
//! - `governor_retries_total` (counter): retry attempts by service
//! - `governor_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `governor_circuit_transitions_total` (counter): breaker transitions by target state
//! - `governor_queue_depth` (gauge): requests waiting for admission
//! - `governor_active_requests` (gauge): admitted requests in flight
//! - `governor_admission_total` (counter): admission decisions by outcome
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus metrics endpoint started"),
        Err(e) => tracing::error!(error = %e, "Failed to install Prometheus recorder"),
    }
}

pub fn record_call(service: &str, outcome: &'static str, start: Instant) {
    counter!("governor_calls_total", "service" => service.to_string(), "outcome" => outcome)
        .increment(1);
    histogram!("governor_call_duration_seconds", "service" => service.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(service: &str) {
    counter!("governor_rate_limited_total", "service" => service.to_string()).increment(1);
}

pub fn record_retry(service: &str) {
    counter!("governor_retries_total", "service" => service.to_string()).increment(1);
}

/// `state` is the gauge encoding: 0=closed, 1=half-open, 2=open.
pub fn record_circuit_state(service: &str, state: f64, label: &'static str) {
    gauge!("governor_circuit_state", "service" => service.to_string()).set(state);
    counter!("governor_circuit_transitions_total", "service" => service.to_string(), "to" => label)
        .increment(1);
}

pub fn record_admission(outcome: &'static str) {
    counter!("governor_admission_total", "outcome" => outcome).increment(1);
}

pub fn record_queue(depth: usize, active: usize) {
    gauge!("governor_queue_depth").set(depth as f64);
    gauge!("governor_active_requests").set(active as f64);
}
