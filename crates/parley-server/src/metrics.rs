//! Metrics collection and export for Parley.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use parley_core::{RouterHandle, RouterStats};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "parley_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "parley_connections_active";
    pub const CONNECTIONS_REJECTED: &str = "parley_connections_rejected_total";
    pub const IDENTIFY_FAILURES: &str = "parley_identify_failures_total";
    pub const USERS_ACTIVE: &str = "parley_users_active";
    pub const MESSAGES_DELIVERED: &str = "parley_messages_delivered_total";
    pub const MESSAGES_DROPPED: &str = "parley_messages_dropped_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_REJECTED,
        "Connections refused because the server was full"
    );
    metrics::describe_counter!(
        names::IDENTIFY_FAILURES,
        "Connections closed before they were registered"
    );
    metrics::describe_gauge!(names::USERS_ACTIVE, "Users currently registered");
    metrics::describe_counter!(names::MESSAGES_DELIVERED, "Messages routed to a recipient");
    metrics::describe_counter!(names::MESSAGES_DROPPED, "Messages the router discarded");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a refused connection.
pub fn record_rejection() {
    counter!(names::CONNECTIONS_REJECTED).increment(1);
}

/// Record a connection that never became active.
pub fn record_identify_failure(reason: &'static str) {
    counter!(names::IDENTIFY_FAILURES, "reason" => reason).increment(1);
}

/// Publish a router snapshot.
///
/// The router's counters are cumulative, so only the change since the
/// previous snapshot is added to the exported counters.
pub fn record_router_stats(stats: RouterStats, previous: RouterStats) {
    gauge!(names::USERS_ACTIVE).set(stats.users as f64);
    let delivered = stats.delivered.saturating_sub(previous.delivered);
    let dropped = stats.dropped.saturating_sub(previous.dropped);
    counter!(names::MESSAGES_DELIVERED).increment(delivered);
    counter!(names::MESSAGES_DROPPED).increment(dropped);
}

/// Sample router statistics every `interval` until the router stops.
pub async fn report_router_stats(router: RouterHandle, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    let mut previous = RouterStats::default();

    loop {
        ticker.tick().await;
        match router.stats().await {
            Ok(stats) => {
                record_router_stats(stats, previous);
                previous = stats;
            }
            Err(_) => {
                debug!("Router stopped, ending stats reporter");
                return;
            }
        }
    }
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{Router, RouterConfig};

    #[test]
    fn test_metrics_guard() {
        // No recorder installed; must not panic
        let _guard = ConnectionMetricsGuard::new();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_stops_with_router() {
        let (router, handle) = Router::new(RouterConfig::default());
        let reporter = tokio::spawn(report_router_stats(handle, Duration::from_secs(1)));
        drop(router);

        tokio::time::timeout(Duration::from_secs(5), reporter)
            .await
            .unwrap()
            .unwrap();
    }
}
