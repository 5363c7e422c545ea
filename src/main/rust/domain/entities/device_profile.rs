use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, Result};
use crate::domain::value_objects::{CommandRoute, QualityOfDelivery};

/// Bridge topic whose messages feed one telemetry channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryBinding {
    pub channel: String,
    pub topic: String,
    #[serde(default)]
    pub qos: QualityOfDelivery,
    /// Top-level fields removed before caching (raw frames, audio samples)
    #[serde(default)]
    pub drop_fields: Vec<String>,
}

/// Bridge topic forwarded to external listeners as a named event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationBinding {
    pub event: String,
    pub topic: String,
    #[serde(default)]
    pub qos: QualityOfDelivery,
}

/// Everything the shim needs to know about one device type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    #[serde(default)]
    pub commands: BTreeMap<String, CommandRoute>,
    #[serde(default)]
    pub telemetry: Vec<TelemetryBinding>,
    #[serde(default)]
    pub notifications: Vec<NotificationBinding>,
}

impl DeviceProfile {
    pub fn validate(&self) -> Result<()> {
        for (kind, route) in &self.commands {
            if kind.trim().is_empty() || kind.contains('/') {
                return Err(DomainError::InvalidProfile(format!(
                    "invalid command name '{}'",
                    kind
                )));
            }
            route.check(kind)?;
        }

        for (i, binding) in self.telemetry.iter().enumerate() {
            if binding.channel.trim().is_empty() || binding.topic.trim().is_empty() {
                return Err(DomainError::InvalidProfile(
                    "telemetry bindings need a channel and a topic".to_string(),
                ));
            }
            if self.telemetry[..i].iter().any(|b| b.channel == binding.channel) {
                return Err(DomainError::InvalidProfile(format!(
                    "telemetry channel '{}' declared twice",
                    binding.channel
                )));
            }
        }

        for binding in &self.notifications {
            if binding.event.trim().is_empty() || binding.topic.trim().is_empty() {
                return Err(DomainError::InvalidProfile(
                    "notification bindings need an event and a topic".to_string(),
                ));
            }
        }

        Ok(())
    }
}
