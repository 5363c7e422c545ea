use async_trait::async_trait;
use tracing::info;

use crate::domain::errors::Result;
use crate::domain::ports::StatusReporter;
use crate::domain::value_objects::DevicePhase;

/// Stand-in when no EdgeDevice identity is configured; every report succeeds
#[derive(Debug, Default)]
pub struct LoggingStatusReporter;

#[async_trait]
impl StatusReporter for LoggingStatusReporter {
    async fn report_phase(&self, phase: DevicePhase) -> Result<()> {
        info!(phase = %phase, "Device phase (no control plane configured)");
        Ok(())
    }
}
