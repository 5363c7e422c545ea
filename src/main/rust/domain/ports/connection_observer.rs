use std::time::Duration;

use serde::Serialize;

use crate::domain::value_objects::{ConnectionState, DevicePhase};

/// Point-in-time view of the bridge session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionSummary {
    pub state: ConnectionState,
    pub ever_connected: bool,
    pub attempted: bool,
    /// Connection attempts since start
    pub attempts: u64,
    pub pending: usize,
    pub sessions: u64,
    #[serde(rename = "uptime_secs", serialize_with = "serialize_uptime")]
    pub uptime: Option<Duration>,
}

fn serialize_uptime<S>(uptime: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match uptime {
        Some(d) => serializer.serialize_some(&d.as_secs_f64()),
        None => serializer.serialize_none(),
    }
}

impl ConnectionSummary {
    pub fn phase(&self) -> DevicePhase {
        DevicePhase::derive(self.state, self.ever_connected, self.attempted)
    }
}

/// Read access to the connection state for the reconciliation loop
pub trait ConnectionObserver: Send + Sync {
    fn connection_summary(&self) -> ConnectionSummary;
}
