//! Metrics collection and export for the watcher.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use rta_core::{Error, Operation};
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const EVENTS_TOTAL: &str = "rta_events_total";
    pub const HANDSHAKES_TOTAL: &str = "rta_handshakes_total";
    pub const HANDSHAKE_LATENCY_SECONDS: &str = "rta_handshake_latency_seconds";
    pub const SUBSCRIPTIONS_ACTIVE: &str = "rta_subscriptions_active";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(names::EVENTS_TOTAL, "Total number of events received");
    metrics::describe_counter!(
        names::HANDSHAKES_TOTAL,
        "Subscribe and unsubscribe handshakes by outcome"
    );
    metrics::describe_histogram!(
        names::HANDSHAKE_LATENCY_SECONDS,
        "Time from request to response in seconds"
    );
    metrics::describe_gauge!(
        names::SUBSCRIPTIONS_ACTIVE,
        "Current number of active subscriptions"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record an event for a subscription to `resource`.
pub fn record_event(resource: &str) {
    counter!(names::EVENTS_TOTAL, "resource" => resource.to_string()).increment(1);
}

/// Record a completed handshake and its latency.
pub fn record_handshake<T>(op: Operation, result: &Result<T, Error>, seconds: f64) {
    counter!(
        names::HANDSHAKES_TOTAL,
        "operation" => op.as_str(),
        "outcome" => outcome(result)
    )
    .increment(1);
    histogram!(names::HANDSHAKE_LATENCY_SECONDS, "operation" => op.as_str()).record(seconds);
}

/// Update active subscription count.
pub fn set_active_subscriptions(count: usize) {
    gauge!(names::SUBSCRIPTIONS_ACTIVE).set(count as f64);
}

/// Label for a handshake result.
#[must_use]
pub fn outcome<T>(result: &Result<T, Error>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(Error::UnexpectedStatus { .. }) => "refused",
        Err(Error::Protocol(_)) => "malformed",
        Err(Error::Timeout(_)) => "timeout",
        Err(Error::Cancelled) => "cancelled",
        Err(Error::ConnectionClosed) => "closed",
        Err(Error::Transport(_)) => "transport",
    }
}
