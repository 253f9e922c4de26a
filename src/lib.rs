pub mod agent;
pub mod catalog;
pub mod config;
pub mod connection;
pub mod device;
pub mod dispatcher;
pub mod downloader;
pub mod envelope;
pub mod error;
pub mod health;
pub mod layout;
pub mod lifecycle;
pub mod reply;
pub mod run_status;
pub mod subscription;

pub use agent::Agent;
pub use catalog::{AlgorithmRecord, Catalog};
pub use config::AgentConfig;
pub use connection::{ConnectionManager, ConnectionStatus, SessionEvent};
pub use device::{DeviceIdSource, MacDeviceIdSource, RegistrationAnnouncer};
pub use dispatcher::CommandDispatcher;
pub use error::{AgentError, Outcome};
pub use lifecycle::ArtifactLifecycleEngine;
pub use reply::ReplyPublisher;

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static TRACING_INIT: Once = Once::new();

/// Initializes the global `tracing` subscriber once per process
/// (`RUST_LOG`-driven, falling back to `info`). Safe to call more than
/// once — subsequent calls are no-ops, matching the idempotence guarantee
/// `edge-agentd` and integration tests both rely on.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .init();
    });
}
