use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::domain::errors::{DomainError, Result};
use crate::domain::ports::{BridgeChannel, BridgeEvent};
use crate::domain::value_objects::QualityOfDelivery;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

struct RosbridgeSession {
    sink: WsSink,
    reader: JoinHandle<()>,
    closing: Arc<AtomicBool>,
}

/// rosbridge v2 protocol over a WebSocket. Topics map one to one onto ROS
/// topics; payloads travel as the `msg` object of `publish` operations.
pub struct RosbridgeChannel {
    url: String,
    events: mpsc::UnboundedSender<BridgeEvent>,
    session: Mutex<Option<RosbridgeSession>>,
    next_id: AtomicU64,
}

impl RosbridgeChannel {
    pub fn new(url: impl Into<String>, events: mpsc::UnboundedSender<BridgeEvent>) -> Self {
        Self {
            url: url.into(),
            events,
            session: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    fn op_id(&self, op: &str) -> String {
        format!("{}:{}", op, self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn send(&self, frame: Value) -> Result<()> {
        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .filter(|session| !session.reader.is_finished())
            .ok_or_else(|| DomainError::BridgeUnavailable("no rosbridge session".to_string()))?;

        session
            .sink
            .send(Message::Text(frame.to_string().into()))
            .await
            .map_err(|e| DomainError::BridgeUnavailable(e.to_string()))
    }
}

/// rosbridge expects `msg` to be an object; anything else is wrapped as
/// a `std_msgs/String`-style `data` field.
pub fn payload_to_msg(payload: &[u8]) -> Value {
    match serde_json::from_slice::<Value>(payload) {
        Ok(value @ Value::Object(_)) => value,
        Ok(other) => json!({ "data": other }),
        Err(_) => json!({ "data": String::from_utf8_lossy(payload) }),
    }
}

/// Extract `(topic, payload)` from an incoming rosbridge frame
pub fn parse_incoming(text: &str) -> Option<(String, Vec<u8>)> {
    let frame: Value = serde_json::from_str(text).ok()?;
    if frame.get("op").and_then(Value::as_str) != Some("publish") {
        return None;
    }
    let topic = frame.get("topic").and_then(Value::as_str)?;
    let msg = frame.get("msg").cloned().unwrap_or(Value::Null);
    let payload = serde_json::to_vec(&msg).ok()?;
    Some((topic.to_string(), payload))
}

#[async_trait]
impl BridgeChannel for RosbridgeChannel {
    async fn connect(&self) -> Result<()> {
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| DomainError::BridgeUnavailable(format!("{}: {}", self.url, e)))?;
        let (sink, mut source) = stream.split();

        let closing = Arc::new(AtomicBool::new(false));
        let reader_closing = Arc::clone(&closing);
        let events = self.events.clone();

        let reader = tokio::spawn(async move {
            let reason = loop {
                match source.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if let Some((topic, payload)) = parse_incoming(text.as_str()) {
                            let _ = events.send(BridgeEvent::Message { topic, payload });
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break format!("closed by server: {:?}", frame);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break e.to_string(),
                    None => break "stream ended".to_string(),
                }
            };
            if !reader_closing.load(Ordering::SeqCst) {
                let _ = events.send(BridgeEvent::ConnectionLost(reason));
            }
            debug!("rosbridge reader finished");
        });

        let previous = self.session.lock().await.replace(RosbridgeSession {
            sink,
            reader,
            closing,
        });
        if let Some(previous) = previous {
            previous.closing.store(true, Ordering::SeqCst);
            previous.reader.abort();
        }

        info!(url = %self.url, "rosbridge session established");
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QualityOfDelivery) -> Result<()> {
        debug!(topic = %topic, %qos, "rosbridge ignores delivery guarantees");
        let frame = json!({
            "op": "subscribe",
            "id": self.op_id("subscribe"),
            "topic": topic,
        });
        self.send(frame).await
    }

    async fn publish(&self, topic: &str, payload: &[u8], _qos: QualityOfDelivery) -> Result<()> {
        let frame = json!({
            "op": "publish",
            "id": self.op_id("publish"),
            "topic": topic,
            "msg": payload_to_msg(payload),
        });
        self.send(frame).await
    }

    async fn disconnect(&self) -> Result<()> {
        let Some(mut session) = self.session.lock().await.take() else {
            return Ok(());
        };
        session.closing.store(true, Ordering::SeqCst);
        if let Err(e) = session.sink.close().await {
            warn!(error = %e, "rosbridge close failed");
        }
        session.reader.abort();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "rosbridge"
    }
}
