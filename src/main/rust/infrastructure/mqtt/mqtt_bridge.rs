use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, Result};
use crate::domain::ports::{BridgeChannel, BridgeEvent};
use crate::domain::value_objects::QualityOfDelivery;

/// Default MQTT port when the broker address carries none
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// How long `disconnect` lets the event loop flush before aborting it
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    /// Requests buffered between the client handle and the event loop
    pub request_capacity: usize,
}

impl MqttSettings {
    /// Build settings from a `host[:port]` broker address
    pub fn from_address(address: &str) -> Result<Self> {
        let (host, port) = parse_broker_address(address)?;
        Ok(Self {
            host,
            port,
            client_id: generated_client_id(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(60),
            request_capacity: 64,
        })
    }
}

/// Split `host[:port]`, defaulting the port to 1883
pub fn parse_broker_address(address: &str) -> Result<(String, u16)> {
    let address = address
        .trim()
        .trim_start_matches("mqtt://")
        .trim_start_matches("tcp://");

    let (host, port) = match address.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| {
                DomainError::BridgeUnavailable(format!("invalid broker port in '{}'", address))
            })?;
            (host, port)
        }
        None => (address, DEFAULT_MQTT_PORT),
    };

    if host.is_empty() {
        return Err(DomainError::BridgeUnavailable(format!(
            "missing broker host in '{}'",
            address
        )));
    }
    Ok((host.to_string(), port))
}

fn generated_client_id() -> String {
    // short suffix keeps the id within broker length limits
    let short = Uuid::new_v4().simple().to_string();
    format!("device-shim-{}", &short[..8])
}

fn to_mqtt_qos(qos: QualityOfDelivery) -> QoS {
    match qos {
        QualityOfDelivery::AtMostOnce => QoS::AtMostOnce,
        QualityOfDelivery::AtLeastOnce => QoS::AtLeastOnce,
        QualityOfDelivery::ExactlyOnce => QoS::ExactlyOnce,
    }
}

struct MqttSession {
    client: AsyncClient,
    task: JoinHandle<()>,
    closing: Arc<AtomicBool>,
}

/// Aborts an event-loop task unless it was handed over to a session, so a
/// `connect` dropped mid-handshake leaves no task behind.
struct HandshakeGuard {
    task: AbortHandle,
    armed: bool,
}

impl HandshakeGuard {
    fn new(task: &JoinHandle<()>) -> Self {
        Self {
            task: task.abort_handle(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for HandshakeGuard {
    fn drop(&mut self) {
        if self.armed {
            self.task.abort();
        }
    }
}

/// MQTT transport. Each `connect` builds a fresh clean session and a task
/// that drives the rumqttc event loop until the session ends.
pub struct MqttBridge {
    settings: MqttSettings,
    events: mpsc::UnboundedSender<BridgeEvent>,
    session: Mutex<Option<MqttSession>>,
}

impl MqttBridge {
    pub fn new(settings: MqttSettings, events: mpsc::UnboundedSender<BridgeEvent>) -> Self {
        Self {
            settings,
            events,
            session: Mutex::new(None),
        }
    }

    fn session(&self) -> MutexGuard<'_, Option<MqttSession>> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn client(&self) -> Result<AsyncClient> {
        self.session()
            .as_ref()
            .filter(|session| !session.task.is_finished())
            .map(|session| session.client.clone())
            .ok_or_else(|| DomainError::BridgeUnavailable("no MQTT session".to_string()))
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.settings.client_id.clone(),
            self.settings.host.clone(),
            self.settings.port,
        );
        options.set_keep_alive(self.settings.keep_alive);
        options.set_clean_session(true);
        if let Some(username) = &self.settings.username {
            options.set_credentials(
                username.clone(),
                self.settings.password.clone().unwrap_or_default(),
            );
        }
        options
    }
}

#[async_trait]
impl BridgeChannel for MqttBridge {
    async fn connect(&self) -> Result<()> {
        if let Some(stale) = self.session().take() {
            stale.closing.store(true, Ordering::SeqCst);
            stale.task.abort();
        }

        let (client, mut event_loop) =
            AsyncClient::new(self.options(), self.settings.request_capacity);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let closing = Arc::new(AtomicBool::new(false));
        let events = self.events.clone();
        let task_closing = Arc::clone(&closing);

        let task = tokio::spawn(async move {
            let mut ready_tx = Some(ready_tx);
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        let accepted = ack.code == ConnectReturnCode::Success;
                        if let Some(tx) = ready_tx.take() {
                            let result = if accepted {
                                Ok(())
                            } else {
                                Err(DomainError::BridgeUnavailable(format!(
                                    "broker refused connection: {:?}",
                                    ack.code
                                )))
                            };
                            let _ = tx.send(result);
                        }
                        if !accepted {
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let _ = events.send(BridgeEvent::Message {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                        });
                    }
                    Ok(_) => {}
                    Err(e) => {
                        match ready_tx.take() {
                            Some(tx) => {
                                let _ = tx.send(Err(DomainError::BridgeUnavailable(e.to_string())));
                            }
                            None if !task_closing.load(Ordering::SeqCst) => {
                                let _ = events.send(BridgeEvent::ConnectionLost(e.to_string()));
                            }
                            None => {}
                        }
                        break;
                    }
                }
            }
            debug!("MQTT event loop finished");
        });
        let guard = HandshakeGuard::new(&task);

        match ready_rx.await {
            Ok(Ok(())) => {
                info!(
                    host = %self.settings.host,
                    port = self.settings.port,
                    client_id = %self.settings.client_id,
                    "MQTT session established"
                );
                *self.session() = Some(MqttSession {
                    client,
                    task,
                    closing,
                });
                guard.disarm();
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DomainError::BridgeUnavailable(
                "MQTT event loop ended before acknowledging".to_string(),
            )),
        }
    }

    async fn subscribe(&self, topic: &str, qos: QualityOfDelivery) -> Result<()> {
        self.client()?
            .subscribe(topic, to_mqtt_qos(qos))
            .await
            .map_err(|e| DomainError::BridgeUnavailable(e.to_string()))
    }

    async fn publish(&self, topic: &str, payload: &[u8], qos: QualityOfDelivery) -> Result<()> {
        self.client()?
            .publish(topic, to_mqtt_qos(qos), false, payload.to_vec())
            .await
            .map_err(|e| DomainError::BridgeUnavailable(e.to_string()))
    }

    async fn disconnect(&self) -> Result<()> {
        let Some(mut session) = self.session().take() else {
            return Ok(());
        };

        session.closing.store(true, Ordering::SeqCst);
        if let Err(e) = session.client.disconnect().await {
            warn!(error = %e, "MQTT disconnect request failed");
        }
        if tokio::time::timeout(DISCONNECT_GRACE, &mut session.task)
            .await
            .is_err()
        {
            session.task.abort();
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}
