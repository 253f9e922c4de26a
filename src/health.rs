use std::time::Duration;

use tracing::info;

use crate::config::HealthCheckConfig;
use crate::connection::ConnectionManager;

/// Periodic connection-status logger (component J). Purely observational —
/// `spec.md` §5 is explicit that health checks never trigger reconnection or
/// any other corrective action; that responsibility belongs entirely to the
/// connection manager's own state machine.
pub struct HealthMonitor {
    connection: ConnectionManager,
    config: HealthCheckConfig,
}

impl HealthMonitor {
    pub fn new(connection: ConnectionManager, config: HealthCheckConfig) -> Self {
        Self { connection, config }
    }

    pub async fn run(&self) {
        if !self.config.enable {
            info!("health monitor disabled by configuration");
            return;
        }
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        loop {
            ticker.tick().await;
            let status = self.connection.status().await;
            info!(
                connected = status.connected,
                epoch = status.epoch,
                broker = %status.broker,
                "connection health"
            );
        }
    }
}
