//! Prometheus recorder and relay metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder. Call once at startup.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus recorder installed");
    Ok(handle)
}

/// Stream connections admitted (counter).
pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
/// Stream connections currently live (gauge).
pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
/// Stream connections ended (counter, labels: reason).
pub const DISCONNECTIONS_TOTAL: &str = "relay_disconnections_total";
/// Events dropped because a mailbox was full (counter).
pub const MAILBOX_DROPS_TOTAL: &str = "relay_mailbox_drops_total";
/// Inbound events dispatched to a handler (counter, labels: event_type).
pub const EVENTS_ROUTED_TOTAL: &str = "relay_events_routed_total";
/// One-time tokens issued at login (counter).
pub const TOKENS_ISSUED_TOTAL: &str = "relay_tokens_issued_total";
