use std::sync::Arc;

use tracing::info;

use crate::catalog::Catalog;
use crate::config::AgentConfig;
use crate::connection::ConnectionManager;
use crate::device::{DeviceIdSource, LoggingRegistrationAnnouncer, MacDeviceIdSource, RegistrationAnnouncer};
use crate::dispatcher::CommandDispatcher;
use crate::error::AgentError;
use crate::health::HealthMonitor;
use crate::layout::ArtifactLayout;
use crate::lifecycle::ArtifactLifecycleEngine;
use crate::reply::ReplyPublisher;

/// The agent's explicit root object (`spec.md` §9 Design Notes): every
/// collaborator is constructed once at startup and held here rather than
/// reached through process-wide singletons, so a test can build a second,
/// fully independent `Agent` in the same process.
pub struct Agent {
    config: AgentConfig,
    device_id_source: Arc<dyn DeviceIdSource>,
    registration: Arc<dyn RegistrationAnnouncer>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            registration: Arc::new(LoggingRegistrationAnnouncer::new(config.mqtt.register.clone())),
            device_id_source: Arc::new(MacDeviceIdSource),
            config,
        }
    }

    #[cfg(test)]
    pub fn with_device_id_source(mut self, source: Arc<dyn DeviceIdSource>) -> Self {
        self.device_id_source = source;
        self
    }

    /// Bootstraps every collaborator and runs until the process is killed:
    /// opens the catalog, resolves the device id, connects to the broker,
    /// subscribes to the request topic, announces presence, then drives the
    /// eventloop, dispatcher, and health monitor concurrently
    /// (`spec.md` §4 end-to-end flow).
    pub async fn run(self) -> Result<(), AgentError> {
        let device_id = self.device_id_source.device_id().await;
        info!(device_id, "resolved device id");

        let catalog = Catalog::open(&self.config.algorithm.catalog_path)?;
        let layout = ArtifactLayout::new(self.config.algorithm.download_path.clone());
        let lifecycle = ArtifactLifecycleEngine::new(catalog, layout);

        let (connection, eventloop, incoming) = ConnectionManager::new(&self.config.mqtt, &device_id)?;

        let request_topic = self.config.mqtt.topics.request_topic(&device_id);
        let reply_topic = self.config.mqtt.topics.reply_topic(&device_id);

        connection.subscribe(&request_topic, 1).await?;
        info!(topic = %request_topic, "subscribed to request topic");

        let reply = ReplyPublisher::new(connection.clone(), reply_topic);
        let dispatcher = CommandDispatcher::new(lifecycle, reply);
        let health = HealthMonitor::new(connection.clone(), self.config.mqtt.health_check.clone());
        // Health monitoring is purely observational (`spec.md` §5) and, when
        // disabled, must not be allowed to race the two tasks that have to
        // run for the life of the process — so it gets its own task rather
        // than a branch in the `select!` below.
        tokio::spawn(async move {
            health.run().await;
            info!("health monitor task exited");
        });

        // `spec.md` §2: "on each connect event ... an external collaborator
        // is notified to send a registration announcement" — the agent only
        // announces once, on the first successful connection of the process
        // lifetime, not on every later reconnect.
        let mut events = connection.subscribe_events();
        let registration = self.registration.clone();
        let announce_device_id = device_id.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if let crate::connection::SessionEvent::Connected { is_reconnect: false, .. } = event {
                    registration.announce(&announce_device_id).await;
                    break;
                }
            }
        });

        tokio::select! {
            _ = connection.run(eventloop) => {
                info!("connection manager task exited");
            }
            _ = dispatcher.run(incoming) => {
                info!("dispatcher task exited");
            }
        }

        Ok(())
    }
}
