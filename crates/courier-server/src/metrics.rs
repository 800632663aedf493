//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::PrometheusBuilder;
pub use metrics_exporter_prometheus::{BuildError, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup, before
/// any metric is recorded; a second call fails.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// WebSocket sessions opened (counter).
pub const CONNECTIONS_TOTAL: &str = "courier_connections_total";
/// WebSocket sessions closed (counter).
pub const DISCONNECTIONS_TOTAL: &str = "courier_disconnections_total";
/// Currently open sessions (gauge).
pub const CONNECTIONS_ACTIVE: &str = "courier_connections_active";
/// Upgrades refused because the server was full (counter).
pub const CONNECTIONS_REJECTED_TOTAL: &str = "courier_connections_rejected_total";
/// Session lifetime in seconds (histogram).
pub const CONNECTION_DURATION_SECONDS: &str = "courier_connection_duration_seconds";
/// Directed messages queued on their target (counter).
pub const MESSAGES_ROUTED_TOTAL: &str = "courier_messages_routed_total";
/// Payloads without an addressing prefix (counter).
pub const MESSAGES_LOCAL_TOTAL: &str = "courier_messages_local_total";
/// Directed messages that could not be delivered (counter, labels: reason).
pub const ROUTE_FAILURES_TOTAL: &str = "courier_route_failures_total";
/// Sessions closed for missing heartbeats (counter).
pub const HEARTBEAT_TIMEOUTS_TOTAL: &str = "courier_heartbeat_timeouts_total";
