use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::domain::errors::{DomainError, Result};
use crate::domain::ports::{ConnectionObserver, MetricsReporter, StatusReporter};
use crate::domain::value_objects::DevicePhase;

/// What one reconciliation tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Derived phase already acknowledged; nothing sent
    Unchanged(DevicePhase),
    Reported(DevicePhase),
    /// Report attempted and failed; retried on the next tick
    Failed(DevicePhase),
}

/// Periodically derives the device phase and reports it to the control
/// plane only when it differs from the last acknowledged one.
pub struct HealthReconciler {
    observer: Arc<dyn ConnectionObserver>,
    reporter: Arc<dyn StatusReporter>,
    metrics: Arc<dyn MetricsReporter>,
    interval: Duration,
    report_timeout: Duration,
    reported: watch::Sender<Option<DevicePhase>>,
}

impl HealthReconciler {
    pub fn new(
        observer: Arc<dyn ConnectionObserver>,
        reporter: Arc<dyn StatusReporter>,
        metrics: Arc<dyn MetricsReporter>,
        interval: Duration,
        report_timeout: Duration,
    ) -> Self {
        let (reported, _) = watch::channel(None);
        Self {
            observer,
            reporter,
            metrics,
            interval,
            report_timeout,
            reported,
        }
    }

    /// Last phase acknowledged by the control plane
    pub fn reported_phase(&self) -> Option<DevicePhase> {
        *self.reported.borrow()
    }

    /// Follow acknowledged phases from another task
    pub fn watch_reported(&self) -> watch::Receiver<Option<DevicePhase>> {
        self.reported.subscribe()
    }

    async fn send(&self, phase: DevicePhase) -> Result<()> {
        match tokio::time::timeout(self.report_timeout, self.reporter.report_phase(phase)).await {
            Ok(result) => result,
            Err(_) => Err(DomainError::ControlPlaneReport(format!(
                "no response within {:?}",
                self.report_timeout
            ))),
        }
    }

    pub async fn tick(&self) -> TickOutcome {
        let candidate = self.observer.connection_summary().phase();

        if self.reported_phase() == Some(candidate) {
            debug!(phase = %candidate, "Phase unchanged");
            return TickOutcome::Unchanged(candidate);
        }

        match self.send(candidate).await {
            Ok(()) => {
                self.reported.send_replace(Some(candidate));
                self.metrics.report_phase(candidate);
                info!(phase = %candidate, "Reported device phase");
                TickOutcome::Reported(candidate)
            }
            Err(e) => {
                self.metrics.report_phase_failure();
                warn!(phase = %candidate, error = %e, "Phase report failed, retrying next tick");
                TickOutcome::Failed(candidate)
            }
        }
    }

    /// One best-effort report of the terminal phase
    pub async fn report_terminal(&self) -> TickOutcome {
        let terminal = DevicePhase::TERMINAL;
        if self.reported_phase() == Some(terminal) {
            return TickOutcome::Unchanged(terminal);
        }

        match self.send(terminal).await {
            Ok(()) => {
                self.reported.send_replace(Some(terminal));
                self.metrics.report_phase(terminal);
                info!(phase = %terminal, "Reported terminal phase");
                TickOutcome::Reported(terminal)
            }
            Err(e) => {
                self.metrics.report_phase_failure();
                warn!(error = %e, "Terminal phase report failed");
                TickOutcome::Failed(terminal)
            }
        }
    }

    /// Tick every interval until shutdown, then report the terminal phase
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
        }

        self.report_terminal().await;
        info!("Health reconciliation stopped");
    }
}
