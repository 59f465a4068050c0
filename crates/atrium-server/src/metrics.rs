//! Prometheus metrics recorder and `/metrics` endpoint plumbing.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Returns the handle used to render the `/metrics` endpoint. Call once at
/// startup, before any metric is recorded.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Registered surface connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Deltas published through the broker (counter, labels: kind).
pub const SYNC_PUBLISHES_TOTAL: &str = "sync_publishes_total";
/// Frames dropped on slow surface connections (counter).
pub const SYNC_DROPPED_FRAMES_TOTAL: &str = "sync_dropped_frames_total";

#[cfg(test)]
mod tests {
    #[test]
    fn render_produces_prometheus_text() {
        // Local recorder, no global install, so tests stay independent.
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();
        let _ = handle.render();
    }
}
