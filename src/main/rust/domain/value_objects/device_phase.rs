use std::fmt;

use serde::Serialize;

use super::ConnectionState;

/// Coarse device health as understood by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DevicePhase {
    Pending,
    Running,
    Failed,
    Unknown,
}

impl DevicePhase {
    /// Phase reported when the shim shuts down
    pub const TERMINAL: DevicePhase = DevicePhase::Pending;

    /// Derive the phase from the observed connection.
    ///
    /// `attempted` is false until the first connection attempt starts; that
    /// window is the only indeterminate state and maps to `Unknown`. A lost
    /// session (any non-connected state after a success) maps to `Failed`.
    pub fn derive(state: ConnectionState, ever_connected: bool, attempted: bool) -> Self {
        match state {
            ConnectionState::Connected => Self::Running,
            _ if ever_connected => Self::Failed,
            _ if attempted => Self::Pending,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        }
    }

    pub fn as_metric(&self) -> f64 {
        match self {
            Self::Pending => 0.0,
            Self::Running => 1.0,
            Self::Failed => 2.0,
            Self::Unknown => 3.0,
        }
    }
}

impl fmt::Display for DevicePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
