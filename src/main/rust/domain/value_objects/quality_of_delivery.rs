use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, Result};

/// Delivery guarantee attached to a publish or subscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QualityOfDelivery {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for QualityOfDelivery {
    type Error = DomainError;

    fn try_from(level: u8) -> Result<Self> {
        match level {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(DomainError::InvalidQos(other)),
        }
    }
}

impl From<QualityOfDelivery> for u8 {
    fn from(qos: QualityOfDelivery) -> Self {
        match qos {
            QualityOfDelivery::AtMostOnce => 0,
            QualityOfDelivery::AtLeastOnce => 1,
            QualityOfDelivery::ExactlyOnce => 2,
        }
    }
}

impl fmt::Display for QualityOfDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "qos{}", u8::from(*self))
    }
}
