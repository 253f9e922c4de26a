use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

/// Desired-state map of topic -> QoS (component G), re-applied after every
/// reconnection epoch (`spec.md` §4.1 "Registry semantics").
#[derive(Clone)]
pub struct SubscriptionRegistry {
    /// Topics the manager currently believes are subscribed on the broker
    /// side. Cleared wholesale on connection loss.
    active: Arc<RwLock<HashMap<String, u8>>>,
    /// The durable desired set, modified only by explicit subscribe/
    /// unsubscribe calls and by save-on-loss.
    saved: Arc<RwLock<HashMap<String, u8>>>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            active: Arc::new(RwLock::new(HashMap::new())),
            saved: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// `true` if `topic` is already desired at this QoS — the idempotence
    /// check in `spec.md` §4.1 "Subscribe(topic, qos, handler) is idempotent".
    pub async fn is_desired(&self, topic: &str, qos: u8) -> bool {
        self.saved.read().await.get(topic).copied() == Some(qos)
    }

    /// Record a topic as desired. Called once the underlying subscribe call
    /// has already succeeded.
    pub async fn record_subscribed(&self, topic: &str, qos: u8) {
        self.saved.write().await.insert(topic.to_string(), qos);
        self.active.write().await.insert(topic.to_string(), qos);
        debug!(topic, qos, "subscription recorded as active and saved");
    }

    pub async fn remove(&self, topic: &str) {
        self.saved.write().await.remove(topic);
        self.active.write().await.remove(topic);
    }

    /// Connection lost: the broker no longer has any active subscriptions,
    /// but the durable desired set (`saved`) is untouched
    /// (`spec.md` §4.1 state machine, `Connected -> ConnectionLost`).
    pub async fn on_connection_lost(&self) {
        let dropped = self.active.write().await.drain().count();
        if dropped > 0 {
            info!(count = dropped, "cleared active subscriptions on connection loss");
        }
    }

    /// The durable desired set, to be replayed on reconnect.
    pub async fn desired(&self) -> Vec<(String, u8)> {
        self.saved
            .read()
            .await
            .iter()
            .map(|(t, q)| (t.clone(), *q))
            .collect()
    }

    pub async fn is_active(&self, topic: &str) -> bool {
        self.active.read().await.contains_key(topic)
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    pub async fn saved_count(&self) -> usize {
        self.saved.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_then_lose_connection_keeps_saved_clears_active() {
        let registry = SubscriptionRegistry::new();
        registry.record_subscribed("device/X/request", 0).await;
        assert!(registry.is_active("device/X/request").await);

        registry.on_connection_lost().await;

        assert!(!registry.is_active("device/X/request").await);
        assert_eq!(registry.saved_count().await, 1);
        assert!(registry.is_desired("device/X/request", 0).await);
    }

    #[tokio::test]
    async fn subscribe_is_idempotent_for_same_qos() {
        let registry = SubscriptionRegistry::new();
        registry.record_subscribed("t", 0).await;
        assert!(registry.is_desired("t", 0).await);
        assert!(!registry.is_desired("t", 1).await);
    }

    #[tokio::test]
    async fn desired_set_survives_disconnect_reconnect_cycle() {
        let registry = SubscriptionRegistry::new();
        registry.record_subscribed("a", 0).await;
        registry.record_subscribed("b", 1).await;

        registry.on_connection_lost().await;
        assert_eq!(registry.active_count().await, 0);
        assert_eq!(registry.saved_count().await, 2);

        for (topic, qos) in registry.desired().await {
            registry.record_subscribed(&topic, qos).await;
        }
        assert_eq!(registry.active_count().await, 2);
    }
}
