use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Invalid field '{field}': {reason}")]
    Validation { field: String, reason: String },

    #[error("Unknown request kind: {0}")]
    UnknownRequestKind(String),

    #[error("Delivery to '{topic}' failed: {reason}")]
    Delivery { topic: String, reason: String },

    #[error("Bridge unavailable: {0}")]
    BridgeUnavailable(String),

    #[error("Bridge session closed")]
    BridgeClosed,

    #[error("Control plane report failed: {0}")]
    ControlPlaneReport(String),

    #[error("Invalid backoff multiplier: must be > 1.0")]
    InvalidBackoffMultiplier,

    #[error("Invalid quality of delivery: {0} (expected 0, 1 or 2)")]
    InvalidQos(u8),

    #[error("Invalid device profile: {0}")]
    InvalidProfile(String),
}

impl DomainError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn delivery(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Delivery {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// Errors scoped to a single external request rather than the process
    pub fn is_request_scoped(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::UnknownRequestKind(_)
                | Self::Delivery { .. }
                | Self::BridgeUnavailable(_)
                | Self::BridgeClosed
        )
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;
