//! Prometheus metrics recorder and metric name constants.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// Connection lifecycle.
pub const CONNECTIONS_OPENED_TOTAL: &str = "parley_connections_opened_total";
pub const CONNECTIONS_CLOSED_TOTAL: &str = "parley_connections_closed_total";
pub const CONNECTIONS_ACTIVE: &str = "parley_connections_active";
pub const HANDSHAKE_REJECTIONS_TOTAL: &str = "parley_handshake_rejections_total";

// Routing and delivery.
pub const MESSAGES_ROUTED_TOTAL: &str = "parley_messages_routed_total";
pub const BROADCASTS_TOTAL: &str = "parley_broadcasts_total";
pub const FANOUT_DELIVERIES_TOTAL: &str = "parley_fanout_deliveries_total";
pub const FANOUT_DROPS_TOTAL: &str = "parley_fanout_drops_total";

// Rooms and acks.
pub const ROOMS_ACTIVE: &str = "parley_rooms_active";
pub const ACKS_RESOLVED_TOTAL: &str = "parley_acks_resolved_total";

/// Install the global Prometheus recorder and return its render handle.
///
/// Installation is process-global; a second call fails, which the caller
/// can treat as "already installed" in tests.
pub fn install_recorder() -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().install_recorder()
}
