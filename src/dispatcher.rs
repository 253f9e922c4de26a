use std::sync::Arc;

use bytes::Bytes;
use rumqttc::Publish;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::envelope::{AlgorithmAddParams, AlgorithmConfigParams, AlgorithmDeleteParams, BaseEnvelope};
use crate::error::Outcome;
use crate::lifecycle::ArtifactLifecycleEngine;
use crate::reply::ReplySink;

/// Routes incoming request publishes to the lifecycle engine and publishes
/// the reply (component H). Each message is handled on its own spawned
/// task: there is no ordering guarantee across distinct `cmdId`s
/// (`spec.md` §4.2 "Dispatch is per-message, unordered").
pub struct CommandDispatcher {
    lifecycle: ArtifactLifecycleEngine,
    reply: Arc<dyn ReplySink>,
}

impl CommandDispatcher {
    pub fn new(lifecycle: ArtifactLifecycleEngine, reply: impl ReplySink + 'static) -> Self {
        Self {
            lifecycle,
            reply: Arc::new(reply),
        }
    }

    /// Drains `incoming` until the channel closes, spawning one task per
    /// message so a slow install never delays unrelated commands.
    pub async fn run(self, mut incoming: mpsc::UnboundedReceiver<Publish>) {
        while let Some(publish) = incoming.recv().await {
            let lifecycle = self.lifecycle.clone();
            let reply = self.reply.clone();
            tokio::spawn(async move {
                handle_message(&lifecycle, reply.as_ref(), &publish.payload).await;
            });
        }
        debug!("dispatcher incoming channel closed");
    }
}

/// Two-phase parse (`spec.md` §4.2): first the envelope shell with opaque
/// `params`, then a typed reparse keyed by `method`. A malformed envelope or
/// unrecognized method has no `cmdId` to reply against and is dropped with a
/// log line rather than a reply. `pub(crate)` so tests can drive it directly
/// against a fake `ReplySink` without a live MQTT connection.
pub(crate) async fn handle_message(
    lifecycle: &ArtifactLifecycleEngine,
    reply: &dyn ReplySink,
    payload: &Bytes,
) {
    let base: BaseEnvelope = match serde_json::from_slice(payload) {
        Ok(base) => base,
        Err(e) => {
            warn!(error = %e, "dropping unparseable request envelope");
            return;
        }
    };

    let params_raw = base.params.as_deref().map(|raw| raw.get()).unwrap_or("null");

    let outcome = match base.method.as_str() {
        "algorithm.add" => match serde_json::from_str::<AlgorithmAddParams>(params_raw) {
            Ok(params) => lifecycle.install(params).await,
            Err(e) => Outcome::Failure(crate::error::AgentError::ParamInvalid {
                field: "params".to_string(),
                reason: e.to_string(),
            }),
        },
        "algorithm.delete" => match serde_json::from_str::<AlgorithmDeleteParams>(params_raw) {
            Ok(params) => lifecycle.delete(&params.algorithm_id).await,
            Err(e) => Outcome::Failure(crate::error::AgentError::ParamInvalid {
                field: "params".to_string(),
                reason: e.to_string(),
            }),
        },
        "algorithm.config" => match serde_json::from_str::<AlgorithmConfigParams>(params_raw) {
            Ok(params) => lifecycle.set_run_status(&params.algorithm_id, params.run_status).await,
            Err(e) => Outcome::Failure(crate::error::AgentError::ParamInvalid {
                field: "params".to_string(),
                reason: e.to_string(),
            }),
        },
        "algorithm.show" => match lifecycle.list() {
            Ok(entries) => match serde_json::to_value(entries) {
                Ok(value) => Outcome::success_with(value),
                Err(e) => Outcome::Failure(crate::error::AgentError::CatalogIo(e.to_string())),
            },
            Err(e) => Outcome::Failure(e),
        },
        other => {
            warn!(method = other, cmd_id = %base.cmd_id, "unrecognized method, dropping");
            return;
        }
    };

    reply.send(&base, outcome).await;
}
