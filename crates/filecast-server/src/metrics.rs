//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup, before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Metric name constants to avoid typos across modules.

/// WebSocket sessions opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket sessions closed (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Sessions currently connected (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Session lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Failed upgrade attempts (counter).
pub const WS_UPGRADE_FAILURES_TOTAL: &str = "ws_upgrade_failures_total";
/// Payloads accepted by the hub for fan-out (counter).
pub const BROADCAST_MESSAGES_TOTAL: &str = "broadcast_messages_total";
/// Sessions evicted because their queue was full (counter).
pub const BROADCAST_EVICTIONS_TOTAL: &str = "broadcast_evictions_total";
/// Files read and handed to the hub by the watcher (counter).
pub const WATCHER_FILES_BROADCAST_TOTAL: &str = "watcher_files_broadcast_total";
/// Created files the watcher could not read (counter).
pub const WATCHER_READ_ERRORS_TOTAL: &str = "watcher_read_errors_total";
/// Worker panics caught by a fault barrier (counter, labels: worker).
pub const WORKER_FAULTS_TOTAL: &str = "worker_faults_total";
