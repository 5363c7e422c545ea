use super::QualityOfDelivery;

/// A bridge operation issued while the session was not live
#[derive(Debug, Clone, PartialEq)]
pub enum PendingOperation {
    Subscribe {
        topic: String,
        qos: QualityOfDelivery,
    },
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QualityOfDelivery,
    },
}

impl PendingOperation {
    pub fn topic(&self) -> &str {
        match self {
            Self::Subscribe { topic, .. } | Self::Publish { topic, .. } => topic,
        }
    }

    pub fn is_subscribe(&self) -> bool {
        matches!(self, Self::Subscribe { .. })
    }
}
