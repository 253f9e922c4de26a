use async_trait::async_trait;
use tracing::{error, info};

use crate::connection::ConnectionManager;
use crate::envelope::{BaseEnvelope, ReplyEnvelope};
use crate::error::Outcome;

/// A destination for rendered replies (component I). Abstracted behind a
/// trait so the dispatcher's parse/route/reply logic can be exercised
/// against a recording fake instead of a live MQTT connection
/// (`SPEC_FULL.md` §8 "rumqttc-free fake-transport test").
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send(&self, base: &BaseEnvelope, outcome: Outcome);
}

/// Builds and publishes exactly one reply per dispatched request
/// (component I, `spec.md` §4.2 "Exactly-one-reply invariant").
pub struct ReplyPublisher {
    connection: ConnectionManager,
    reply_topic: String,
}

impl ReplyPublisher {
    pub fn new(connection: ConnectionManager, reply_topic: String) -> Self {
        Self {
            connection,
            reply_topic,
        }
    }
}

#[async_trait]
impl ReplySink for ReplyPublisher {
    async fn send(&self, base: &BaseEnvelope, outcome: Outcome) {
        let (code, message, data) = outcome.into_wire();
        let reply = ReplyEnvelope::new(base, code, message, data);
        let payload = match serde_json::to_vec(&reply) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(cmd_id = %base.cmd_id, error = %e, "failed to encode reply envelope");
                return;
            }
        };

        // QoS 0, retained false per `spec.md` §9 resolved Open Question on
        // reply retention: replies are transient acknowledgements, not state.
        if let Err(e) = self.connection.publish(&self.reply_topic, 0, false, payload).await {
            error!(cmd_id = %base.cmd_id, error = %e, "failed to publish reply");
            return;
        }
        info!(cmd_id = %base.cmd_id, method = %base.method, code, "reply published");
    }
}
