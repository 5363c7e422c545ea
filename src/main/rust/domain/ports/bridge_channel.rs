use async_trait::async_trait;

use crate::domain::errors::Result;
use crate::domain::value_objects::QualityOfDelivery;

/// Event pushed by a bridge adapter onto the manager's event channel
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// Inbound device message
    Message { topic: String, payload: Vec<u8> },
    /// A live session ended; not emitted for failed connection attempts
    ConnectionLost(String),
}

/// Port for the device-side publish/subscribe transport.
///
/// Implementations receive an event sender at construction and must be
/// callable from any task. Operations on a transport without a live session
/// fail with `DomainError::BridgeUnavailable` so the caller can buffer them.
#[async_trait]
pub trait BridgeChannel: Send + Sync {
    /// Establish a session; resolves once the session is usable
    async fn connect(&self) -> Result<()>;

    async fn subscribe(&self, topic: &str, qos: QualityOfDelivery) -> Result<()>;

    async fn publish(&self, topic: &str, payload: &[u8], qos: QualityOfDelivery) -> Result<()>;

    /// Close the session; must not emit `ConnectionLost`
    async fn disconnect(&self) -> Result<()>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}
