use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectionError, Event, Incoming, MqttOptions, NetworkOptions, Publish, QoS,
};
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;
use crate::error::AgentError;
use crate::subscription::SubscriptionRegistry;

const SETTLING_DELAY: Duration = Duration::from_millis(1500);

/// Observable transitions of the connection manager's state machine
/// (`spec.md` §4.1). Broadcast so the health monitor (J) and tests can react
/// without polling internal state.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    Connected { epoch: u64, is_reconnect: bool },
    Disconnected { reason: String },
    Error { error: String },
}

#[derive(Clone, Debug)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub client_id: String,
    pub broker: String,
    pub epoch: u64,
}

/// Owns the pub/sub client, tracks the session epoch, preserves desired
/// subscriptions, and drives reconnection (component F).
///
/// `spec.md`'s client-level state machine —
/// `Disconnected -> Connecting -> Connected -> (ConnectionLost ->
/// Reconnecting -> Connected)* -> Disposed` — maps onto `rumqttc`'s
/// `EventLoop`: every `Err` from `poll()` is a `ConnectionLost`, and
/// `rumqttc` itself re-dials on the next `poll()` call, so the state machine
/// only needs to track epoch and drive subscription replay.
#[derive(Clone)]
pub struct ConnectionManager {
    client: AsyncClient,
    client_id: String,
    broker: String,
    auto_reconnect: bool,
    connect_retry: bool,
    connect_retry_interval: Duration,
    max_reconnect_interval: Duration,
    registry: SubscriptionRegistry,
    connected: Arc<RwLock<bool>>,
    ever_connected: Arc<std::sync::atomic::AtomicBool>,
    epoch: Arc<AtomicU64>,
    events_tx: broadcast::Sender<SessionEvent>,
    incoming_tx: mpsc::UnboundedSender<Publish>,
    shutdown_tx: watch::Sender<bool>,
}

impl ConnectionManager {
    /// Builds the manager and the raw `rumqttc` eventloop. The caller is
    /// expected to hand the eventloop to [`ConnectionManager::run`] on a
    /// dedicated task, and drain incoming publishes from the returned
    /// receiver (typically forwarding them into the dispatcher, component H).
    pub fn new(
        config: &MqttConfig,
        device_id: &str,
    ) -> Result<(Self, rumqttc::EventLoop, mpsc::UnboundedReceiver<Publish>), AgentError> {
        // `spec.md` §6: clientId defaults to exactly `edge-<deviceId>`, overridable.
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("edge-{device_id}"));

        let (host, port, use_tls) = parse_broker(&config.broker)?;
        let mut opts = MqttOptions::new(client_id.clone(), host, port);
        opts.set_keep_alive(config.keep_alive());
        opts.set_clean_session(config.clean_session);
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            opts.set_credentials(user, pass);
        }
        let _ = use_tls; // scheme is validated but TLS transport setup is an external collaborator concern.

        let (client, mut eventloop) = AsyncClient::new(opts, 64);
        let mut network_options = NetworkOptions::new();
        network_options.set_connection_timeout(config.connect_timeout().as_secs());
        eventloop.set_network_options(network_options);
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(32);
        let (shutdown_tx, _) = watch::channel(false);

        Ok((
            Self {
                client,
                client_id,
                broker: config.broker.clone(),
                auto_reconnect: config.auto_reconnect,
                connect_retry: config.connect_retry,
                connect_retry_interval: config.connect_retry_interval(),
                max_reconnect_interval: config.max_reconnect_interval(),
                registry: SubscriptionRegistry::new(),
                connected: Arc::new(RwLock::new(false)),
                ever_connected: Arc::new(std::sync::atomic::AtomicBool::new(false)),
                epoch: Arc::new(AtomicU64::new(0)),
                events_tx,
                incoming_tx,
                shutdown_tx,
            },
            eventloop,
            incoming_rx,
        ))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Drives the eventloop until shutdown is requested. Must run on its own
    /// task — callback dispatch (message delivery to the incoming-publish
    /// channel) must never be blocked by command execution (`spec.md` §5).
    pub async fn run(&self, mut eventloop: rumqttc::EventLoop) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut backoff = self.connect_retry_interval;
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("connection manager shutting down");
                        return;
                    }
                }
                polled = eventloop.poll() => {
                    match polled {
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                            backoff = self.connect_retry_interval;
                            self.on_connected().await;
                        }
                        Ok(Event::Incoming(Incoming::Publish(publish))) => {
                            if self.incoming_tx.send(publish).is_err() {
                                warn!("no receiver for incoming publish, dropping");
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            self.on_disconnected(e).await;
                            if !self.should_keep_retrying() {
                                warn!("retry disabled by configuration, stopping connection manager");
                                return;
                            }
                            // `rumqttc` redials immediately on the next poll; the
                            // delay here is our own backoff in front of that,
                            // doubling up to `maxReconnectInterval`.
                            debug!(delay_ms = backoff.as_millis() as u64, "backing off before next poll");
                            sleep(backoff).await;
                            backoff = std::cmp::min(backoff * 2, self.max_reconnect_interval);
                        }
                    }
                }
            }
        }
    }

    /// `connectRetry=false` stops after the first failed connection attempt;
    /// `autoReconnect=false` stops after a connection that was once
    /// established is subsequently lost (`spec.md` §6).
    fn should_keep_retrying(&self) -> bool {
        if self.ever_connected.load(Ordering::SeqCst) {
            self.auto_reconnect
        } else {
            self.connect_retry
        }
    }

    async fn on_connected(&self) {
        self.ever_connected.store(true, Ordering::SeqCst);
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let is_reconnect = epoch > 1;
        *self.connected.write().await = true;
        info!(epoch, is_reconnect, "mqtt connected");
        let _ = self.events_tx.send(SessionEvent::Connected { epoch, is_reconnect });

        if is_reconnect {
            let manager = self.clone();
            tokio::spawn(async move {
                manager.replay_subscriptions().await;
            });
        }
    }

    async fn on_disconnected(&self, error: ConnectionError) {
        let was_connected = {
            let mut connected = self.connected.write().await;
            let was = *connected;
            *connected = false;
            was
        };
        if was_connected {
            self.registry.on_connection_lost().await;
            warn!(error = %error, "mqtt connection lost");
            let _ = self.events_tx.send(SessionEvent::Disconnected {
                reason: error.to_string(),
            });
        } else {
            debug!(error = %error, "mqtt connect attempt failed");
            let _ = self.events_tx.send(SessionEvent::Error {
                error: error.to_string(),
            });
        }
    }

    /// Re-applies the durable desired set after a settling delay, off the
    /// eventloop task (`spec.md` §4.1 "Reconnection replay").
    async fn replay_subscriptions(&self) {
        sleep(SETTLING_DELAY).await;
        for (topic, qos) in self.registry.desired().await {
            match self
                .client
                .subscribe(&topic, qos_from_u8(qos))
                .await
            {
                Ok(()) => {
                    self.registry.record_subscribed(&topic, qos).await;
                    info!(topic, "resubscribed after reconnect");
                }
                Err(e) => {
                    error!(topic, error = %e, "failed to resubscribe, will retry next epoch");
                }
            }
        }
    }

    /// Idempotent subscribe (`spec.md` §4.1 "Subscribe(topic, qos, handler)").
    pub async fn subscribe(&self, topic: &str, qos: u8) -> Result<(), AgentError> {
        if self.registry.is_desired(topic, qos).await && *self.connected.read().await {
            return Ok(());
        }
        self.client
            .subscribe(topic, qos_from_u8(qos))
            .await
            .map_err(|e| AgentError::Mqtt(format!("subscribe {topic}: {e}")))?;
        self.registry.record_subscribed(topic, qos).await;
        Ok(())
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<(), AgentError> {
        self.client
            .unsubscribe(topic)
            .await
            .map_err(|e| AgentError::Mqtt(format!("unsubscribe {topic}: {e}")))?;
        self.registry.remove(topic).await;
        Ok(())
    }

    pub async fn publish(
        &self,
        topic: &str,
        qos: u8,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), AgentError> {
        self.client
            .publish(topic, qos_from_u8(qos), retain, payload)
            .await
            .map_err(|e| AgentError::Mqtt(format!("publish {topic}: {e}")))
    }

    pub async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    pub async fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            connected: *self.connected.read().await,
            client_id: self.client_id.clone(),
            broker: self.broker.clone(),
            epoch: self.epoch.load(Ordering::SeqCst),
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn qos_from_u8(qos: u8) -> QoS {
    match qos {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

/// Parses `tcp://host:port`, `ssl://host:port`, `mqtt://host:port`, and
/// `mqtts://host:port` broker URLs into `(host, port, use_tls)`.
fn parse_broker(broker: &str) -> Result<(String, u16, bool), AgentError> {
    let url = url::Url::parse(broker)
        .map_err(|e| AgentError::ParamInvalid {
            field: "mqtt.broker".to_string(),
            reason: e.to_string(),
        })?;
    let use_tls = matches!(url.scheme(), "ssl" | "mqtts" | "tls");
    let host = url
        .host_str()
        .ok_or_else(|| AgentError::ParamInvalid {
            field: "mqtt.broker".to_string(),
            reason: "missing host".to_string(),
        })?
        .to_string();
    let port = url.port().unwrap_or(if use_tls { 8883 } else { 1883 });
    Ok((host, port, use_tls))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_broker_defaults_port_by_scheme() {
        let (host, port, tls) = parse_broker("tcp://broker.example:1883").unwrap();
        assert_eq!(host, "broker.example");
        assert_eq!(port, 1883);
        assert!(!tls);

        let (_, port, tls) = parse_broker("ssl://broker.example").unwrap();
        assert_eq!(port, 8883);
        assert!(tls);
    }

    #[test]
    fn parse_broker_rejects_garbage() {
        assert!(parse_broker("not a url").is_err());
    }
}
