use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::RegisterConfig;

const SENTINEL_DEVICE_ID: &str = "00-00-00-00-00-00";

/// A detected network interface (`original_source/internal/service/network.go`
/// `NetworkInterface{Name, MAC, IP}`), carried forward even though the
/// priority-list auto-discovery algorithm itself is out of scope.
#[derive(Clone, Debug, PartialEq)]
pub struct NetworkInterface {
    pub name: String,
    pub mac: String,
    pub ip: Option<String>,
}

/// Resolves the stable identifier this agent announces itself as
/// (component N). `spec.md` treats device identity as an injected
/// collaborator rather than something the core command flow computes, so
/// tests can supply a fixed id without touching the filesystem.
#[async_trait]
pub trait DeviceIdSource: Send + Sync {
    async fn device_id(&self) -> String;

    /// The interface `device_id()` was derived from, if any was found.
    async fn interface(&self) -> Option<NetworkInterface>;
}

/// Derives a MAC-address-shaped id from the first non-loopback interface
/// reported under `/sys/class/net` (`original_source/internal/service/network.go`
/// `detectAutoNetwork`, minus interface-priority matching and liveness
/// probing — out of scope per `spec.md` Non-goals). Falls back to the
/// all-zero sentinel when no interface can be read, which keeps the agent
/// bootable on hosts where `/sys` is unavailable (containers without host
/// networking, CI).
pub struct MacDeviceIdSource;

#[async_trait]
impl DeviceIdSource for MacDeviceIdSource {
    async fn device_id(&self) -> String {
        match self.interface().await {
            Some(iface) => iface.mac,
            None => {
                warn!("no usable network interface found, using sentinel device id");
                SENTINEL_DEVICE_ID.to_string()
            }
        }
    }

    async fn interface(&self) -> Option<NetworkInterface> {
        match tokio::task::spawn_blocking(read_first_interface).await {
            Ok(iface) => iface,
            Err(e) => {
                warn!(error = %e, "device interface detection task panicked");
                None
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn read_first_interface() -> Option<NetworkInterface> {
    let entries = std::fs::read_dir("/sys/class/net").ok()?;
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| name != "lo")
        .collect();
    names.sort();

    for name in names {
        let address_path = format!("/sys/class/net/{name}/address");
        if let Ok(raw) = std::fs::read_to_string(&address_path) {
            let raw = raw.trim();
            if !raw.is_empty() && raw != "00:00:00:00:00:00" {
                return Some(NetworkInterface {
                    name,
                    mac: raw.to_uppercase().replace(':', "-"),
                    ip: None,
                });
            }
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn read_first_interface() -> Option<NetworkInterface> {
    None
}

/// Announces presence to a provisioning backend on startup. `spec.md`
/// scopes device registration out; `SPEC_FULL.md`'s Supplemented Features
/// section keeps the collaborator seam (`original_source`'s
/// `device_register.go` retries registration with backoff against an HTTP
/// endpoint) as a logging-only stub so a real announcer can be substituted
/// without touching `agent.rs`.
#[async_trait]
pub trait RegistrationAnnouncer: Send + Sync {
    async fn announce(&self, device_id: &str);
}

pub struct LoggingRegistrationAnnouncer {
    config: RegisterConfig,
}

impl LoggingRegistrationAnnouncer {
    pub fn new(config: RegisterConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RegistrationAnnouncer for LoggingRegistrationAnnouncer {
    async fn announce(&self, device_id: &str) {
        info!(
            device_id,
            max_retries = self.config.max_retries,
            "registration announcement is a no-op stub; device presence is not published"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mac_device_id_source_never_panics_and_returns_hyphenated_id() {
        let id = MacDeviceIdSource.device_id().await;
        assert_eq!(id.split('-').count(), 6);
    }
}
