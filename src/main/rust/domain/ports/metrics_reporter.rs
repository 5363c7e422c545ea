use crate::domain::value_objects::{ConnectionState, DevicePhase};

/// Outcome of one publish request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Sent,
    Queued,
    Failed,
}

impl PublishOutcome {
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Queued => "queued",
            Self::Failed => "failed",
        }
    }
}

/// Port for metrics reporting
pub trait MetricsReporter: Send + Sync {
    fn report_state_change(&self, state: ConnectionState);
    fn report_reconnect_attempt(&self);
    fn report_backoff(&self, delay_secs: f64);
    fn report_pending_depth(&self, depth: usize);
    fn report_publish(&self, outcome: PublishOutcome);
    fn report_phase(&self, phase: DevicePhase);
    fn report_phase_failure(&self);
    fn report_telemetry_update(&self, channel: &str);
}

/// Reporter that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsReporter for NoopMetrics {
    fn report_state_change(&self, _state: ConnectionState) {}
    fn report_reconnect_attempt(&self) {}
    fn report_backoff(&self, _delay_secs: f64) {}
    fn report_pending_depth(&self, _depth: usize) {}
    fn report_publish(&self, _outcome: PublishOutcome) {}
    fn report_phase(&self, _phase: DevicePhase) {}
    fn report_phase_failure(&self) {}
    fn report_telemetry_update(&self, _channel: &str) {}
}
