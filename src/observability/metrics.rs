//! Metrics collection and exposition.
//!
//! # Metrics
//! - `webhook_jobs_total` (counter): lifecycle events by `event`
//! - `webhook_delivery_duration_seconds` (histogram): per-attempt latency by `outcome`
//! - `webhook_queue_jobs` (gauge): jobs per lifecycle `bucket`
//! - `circuit_breaker_state` (gauge): 0=closed, 1=half_open, 2=open, by `breaker`
//! - `circuit_breaker_rejections_total` (counter): fail-fast rejections by `breaker`
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; with no recorder installed
//!   every call is a no-op, so library code and tests never need setup
//! - Prometheus exporter is installed only by the binary

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::queue::QueueMetrics;
use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_job_event(event: &'static str) {
    counter!("webhook_jobs_total", "event" => event).increment(1);
}

pub fn record_delivery(success: bool, duration: Duration) {
    let outcome = if success { "success" } else { "failure" };
    histogram!("webhook_delivery_duration_seconds", "outcome" => outcome).record(duration.as_secs_f64());
}

pub fn record_queue_depth(snapshot: &QueueMetrics) {
    gauge!("webhook_queue_jobs", "bucket" => "waiting").set(snapshot.waiting as f64);
    gauge!("webhook_queue_jobs", "bucket" => "active").set(snapshot.active as f64);
    gauge!("webhook_queue_jobs", "bucket" => "delayed").set(snapshot.delayed as f64);
    gauge!("webhook_queue_jobs", "bucket" => "completed").set(snapshot.completed as f64);
    gauge!("webhook_queue_jobs", "bucket" => "failed").set(snapshot.failed as f64);
}

pub fn record_breaker_state(breaker: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("circuit_breaker_state", "breaker" => breaker.to_string()).set(value);
}

pub fn record_breaker_rejection(breaker: &str) {
    counter!("circuit_breaker_rejections_total", "breaker" => breaker.to_string()).increment(1);
}
