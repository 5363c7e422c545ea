use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::domain::errors::{DomainError, Result};
use crate::domain::ports::{BridgeChannel, BridgeEvent};
use crate::domain::value_objects::QualityOfDelivery;

/// Operation observed by the simulated device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeOperation {
    Subscribe(String),
    Publish(String, Vec<u8>),
}

/// In-memory bridge standing in for a device.
///
/// Records every acknowledged operation in order and lets the caller
/// control reachability, acknowledgement latency and session loss. An
/// operation belongs to the session it started on and fails if that
/// session is replaced before it is acknowledged.
pub struct SimulatedBridge {
    events: mpsc::UnboundedSender<BridgeEvent>,
    reachable: AtomicBool,
    connected: AtomicBool,
    connects: AtomicUsize,
    ack_delay: Mutex<Option<Duration>>,
    rejected_topic: Mutex<Option<String>>,
    operations: Mutex<Vec<BridgeOperation>>,
}

impl SimulatedBridge {
    pub fn new(events: mpsc::UnboundedSender<BridgeEvent>) -> Self {
        Self {
            events,
            reachable: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            ack_delay: Mutex::new(None),
            rejected_topic: Mutex::new(None),
            operations: Mutex::new(Vec::new()),
        }
    }

    fn operations_guard(&self) -> MutexGuard<'_, Vec<BridgeOperation>> {
        self.operations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether the next `connect` succeeds
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Delay before each subscribe/publish is acknowledged
    pub fn set_ack_delay(&self, delay: Option<Duration>) {
        *self
            .ack_delay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = delay;
    }

    /// Fail every operation on `topic` as if the session had dropped
    pub fn reject_topic(&self, topic: Option<&str>) {
        *self
            .rejected_topic
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = topic.map(str::to_string);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// End the live session as the device would
    pub fn drop_connection(&self, reason: &str) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self
                .events
                .send(BridgeEvent::ConnectionLost(reason.to_string()));
        }
    }

    /// Deliver a message as if the device had published it
    pub fn inject(&self, topic: &str, payload: &[u8]) {
        let _ = self.events.send(BridgeEvent::Message {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
    }

    pub fn operations(&self) -> Vec<BridgeOperation> {
        self.operations_guard().clone()
    }

    /// Published (topic, payload) pairs in order
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.operations_guard()
            .iter()
            .filter_map(|op| match op {
                BridgeOperation::Publish(topic, payload) => Some((topic.clone(), payload.clone())),
                BridgeOperation::Subscribe(_) => None,
            })
            .collect()
    }

    pub fn clear_operations(&self) {
        self.operations_guard().clear();
    }

    async fn acknowledge(&self, op: BridgeOperation) -> Result<()> {
        let session = self.connect_count();
        let delay = *self
            .ack_delay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if !self.is_connected() {
            return Err(DomainError::BridgeUnavailable(
                "simulated session is down".to_string(),
            ));
        }
        if self.connect_count() != session {
            return Err(DomainError::BridgeUnavailable(
                "simulated session replaced".to_string(),
            ));
        }

        let topic = match &op {
            BridgeOperation::Subscribe(topic) | BridgeOperation::Publish(topic, _) => topic,
        };
        let rejected = self
            .rejected_topic
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_deref()
            == Some(topic.as_str());
        if rejected {
            return Err(DomainError::BridgeUnavailable(format!(
                "simulated failure on '{}'",
                topic
            )));
        }

        debug!(?op, "Simulated bridge acknowledged");
        self.operations_guard().push(op);
        Ok(())
    }
}

#[async_trait]
impl BridgeChannel for SimulatedBridge {
    async fn connect(&self) -> Result<()> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(DomainError::BridgeUnavailable(
                "simulated device unreachable".to_string(),
            ));
        }
        self.connected.store(true, Ordering::SeqCst);
        let n = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        info!(session = n, "Simulated bridge session opened");
        Ok(())
    }

    async fn subscribe(&self, topic: &str, _qos: QualityOfDelivery) -> Result<()> {
        self.acknowledge(BridgeOperation::Subscribe(topic.to_string()))
            .await
    }

    async fn publish(&self, topic: &str, payload: &[u8], _qos: QualityOfDelivery) -> Result<()> {
        self.acknowledge(BridgeOperation::Publish(topic.to_string(), payload.to_vec()))
            .await
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}
