use async_trait::async_trait;

use crate::domain::errors::Result;
use crate::domain::value_objects::DevicePhase;

/// Port for the control-plane "set phase" operation.
///
/// Calls are merge-style partial updates of the phase field only, so
/// repeating one is harmless.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report_phase(&self, phase: DevicePhase) -> Result<()>;
}
