use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{json, Value};
use tracing::trace;

use super::handler_table::MessageHandler;
use crate::domain::entities::TelemetryBinding;
use crate::domain::ports::MetricsReporter;

#[derive(Debug, Clone)]
struct TelemetryEntry {
    value: Value,
    ready: bool,
    updated_at: Option<SystemTime>,
}

impl TelemetryEntry {
    fn empty() -> Self {
        Self {
            value: Value::Null,
            ready: false,
            updated_at: None,
        }
    }
}

/// Latest value of one channel, detached from the live cache
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelReading {
    pub value: Value,
    /// Milliseconds since the Unix epoch
    pub updated_at_ms: u64,
}

/// Immutable copy of every channel that has received at least one value
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TelemetrySnapshot {
    channels: BTreeMap<String, ChannelReading>,
}

impl TelemetrySnapshot {
    pub fn get(&self, channel: &str) -> Option<&ChannelReading> {
        self.channels.get(channel)
    }

    pub fn value(&self, channel: &str) -> Option<&Value> {
        self.channels.get(channel).map(|reading| &reading.value)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Most recent value per telemetry channel, written from bridge callbacks
/// and read by request handlers.
///
/// One mutex guards the whole map and is held only while copying.
pub struct TelemetryCache {
    entries: Mutex<HashMap<String, TelemetryEntry>>,
    metrics: Arc<dyn MetricsReporter>,
}

impl TelemetryCache {
    pub fn new(metrics: Arc<dyn MetricsReporter>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, TelemetryEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Declare a channel up front; it stays out of snapshots until updated
    pub fn register_channel(&self, channel: &str) {
        self.entries()
            .entry(channel.to_string())
            .or_insert_with(TelemetryEntry::empty);
    }

    pub fn update(&self, channel: &str, value: Value) {
        {
            let mut entries = self.entries();
            let entry = entries
                .entry(channel.to_string())
                .or_insert_with(TelemetryEntry::empty);
            entry.value = value;
            entry.ready = true;
            entry.updated_at = Some(SystemTime::now());
        }
        self.metrics.report_telemetry_update(channel);
        trace!(channel = %channel, "Telemetry updated");
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let entries = self.entries();
        let channels = entries
            .iter()
            .filter(|(_, entry)| entry.ready)
            .map(|(name, entry)| {
                let updated_at_ms = entry
                    .updated_at
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0);
                (
                    name.clone(),
                    ChannelReading {
                        value: entry.value.clone(),
                        updated_at_ms,
                    },
                )
            })
            .collect();

        TelemetrySnapshot { channels }
    }

    /// Bridge handler that decodes messages for `binding` into this cache
    pub fn handler_for(self: &Arc<Self>, binding: &TelemetryBinding) -> MessageHandler {
        let cache = Arc::clone(self);
        let channel = binding.channel.clone();
        let drop_fields = binding.drop_fields.clone();

        Arc::new(move |_topic, payload| {
            let mut value = decode_payload(payload);
            if let Value::Object(fields) = &mut value {
                for field in &drop_fields {
                    fields.remove(field);
                }
            }
            cache.update(&channel, value);
        })
    }
}

/// JSON when possible, otherwise text, otherwise just the size
pub fn decode_payload(payload: &[u8]) -> Value {
    if let Ok(value) = serde_json::from_slice::<Value>(payload) {
        return value;
    }
    match std::str::from_utf8(payload) {
        Ok(text) => Value::String(text.to_string()),
        Err(_) => json!({ "bytes": payload.len() }),
    }
}
