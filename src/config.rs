use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Connection-level settings consumed by the connection manager (F).
///
/// Field names mirror `spec.md` §4.1 / §6 exactly so the YAML config file
/// reads as a direct transcription of the wire contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker: String,
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
    pub ping_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub auto_reconnect: bool,
    pub max_reconnect_interval_secs: u64,
    pub connect_retry_interval_secs: u64,
    pub connect_retry: bool,
    pub clean_session: bool,
    pub health_check: HealthCheckConfig,
    pub topics: TopicsConfig,
    pub register: RegisterConfig,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "tcp://localhost:1883".to_string(),
            client_id: None,
            keep_alive_secs: 60,
            ping_timeout_secs: 10,
            connect_timeout_secs: 30,
            auto_reconnect: true,
            max_reconnect_interval_secs: 60,
            connect_retry_interval_secs: 1,
            connect_retry: true,
            clean_session: true,
            health_check: HealthCheckConfig::default(),
            topics: TopicsConfig::default(),
            register: RegisterConfig::default(),
            username: None,
            password: None,
        }
    }
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn connect_retry_interval(&self) -> Duration {
        Duration::from_secs(self.connect_retry_interval_secs)
    }

    pub fn max_reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.max_reconnect_interval_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub enable: bool,
    pub interval_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enable: true,
            interval_secs: 30,
        }
    }
}

/// Request/reply topic templates, substituted with `{deviceId}` at
/// subscribe/publish time (`spec.md` §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicsConfig {
    pub algorithm_request: String,
    pub algorithm_reply: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            algorithm_request: "device/{deviceId}/request".to_string(),
            algorithm_reply: "device/{deviceId}/reply".to_string(),
        }
    }
}

impl TopicsConfig {
    pub fn request_topic(&self, device_id: &str) -> String {
        self.algorithm_request.replace("{deviceId}", device_id)
    }

    pub fn reply_topic(&self, device_id: &str) -> String {
        self.algorithm_reply.replace("{deviceId}", device_id)
    }
}

/// Retry knobs for the (out-of-scope) registration announcement, carried
/// forward from `original_source/` so a real announcer can be dropped in
/// without a config schema change (`SPEC_FULL.md` Supplemented Features).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterConfig {
    pub max_retries: u32,
    pub retry_interval_secs: u64,
}

impl Default for RegisterConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_interval_secs: 30,
        }
    }
}

/// Where unpacked artifacts and their catalog live on disk.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AlgorithmConfig {
    pub download_path: String,
    pub catalog_path: String,
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        let download_path = if cfg!(windows) {
            "./runtime/algorithm".to_string()
        } else {
            "/usr/runtime/algorithm".to_string()
        };
        let catalog_path = if cfg!(windows) {
            "./runtime/catalog.sled".to_string()
        } else {
            "/usr/runtime/catalog.sled".to_string()
        };
        Self {
            download_path,
            catalog_path,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub mqtt: MqttConfig,
    pub algorithm: AlgorithmConfig,
}

impl AgentConfig {
    /// Merge built-in defaults, an optional YAML file, and `EDGE_AGENT_*`
    /// environment variables, highest priority last (`SPEC_FULL.md` §6).
    pub fn load(path: Option<&str>) -> Result<Self, figment::Error> {
        let mut figment = Figment::new().merge(Serialized::defaults(AgentConfig::default()));

        if let Some(path) = path {
            if std::path::Path::new(path).exists() {
                figment = figment.merge(Yaml::file(path));
            }
        }

        figment
            .merge(Env::prefixed("EDGE_AGENT_").split("__"))
            .extract()
    }
}
