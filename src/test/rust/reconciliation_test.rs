use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use device_shim::application::services::TickOutcome;
use device_shim::domain::ports::{ConnectionObserver, ConnectionSummary, NoopMetrics};
use device_shim::{
    ConnectionManager, ConnectionState, DevicePhase, DomainError, HealthReconciler,
    ManagerSettings, Result, SimulatedBridge, StatusReporter,
};
use proptest::prelude::*;
use tokio::sync::{mpsc, watch};

#[derive(Default)]
struct RecordingReporter {
    calls: Mutex<Vec<DevicePhase>>,
}

impl RecordingReporter {
    fn calls(&self) -> Vec<DevicePhase> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusReporter for RecordingReporter {
    async fn report_phase(&self, phase: DevicePhase) -> Result<()> {
        self.calls.lock().unwrap().push(phase);
        Ok(())
    }
}

/// Never answers; used to check the report bound
struct HangingReporter;

#[async_trait]
impl StatusReporter for HangingReporter {
    async fn report_phase(&self, _phase: DevicePhase) -> Result<()> {
        std::future::pending::<()>().await;
        Err(DomainError::ControlPlaneReport("unreachable".to_string()))
    }
}

struct ScriptedObserver(Mutex<ConnectionSummary>);

impl ScriptedObserver {
    fn new() -> Self {
        Self(Mutex::new(ConnectionSummary {
            state: ConnectionState::Disconnected,
            ever_connected: false,
            attempted: false,
            attempts: 0,
            pending: 0,
            sessions: 0,
            uptime: None,
        }))
    }

    fn set(&self, state: ConnectionState, ever_connected: bool, attempted: bool) {
        let mut summary = self.0.lock().unwrap();
        summary.state = state;
        summary.ever_connected = ever_connected;
        summary.attempted = attempted;
    }
}

impl ConnectionObserver for ScriptedObserver {
    fn connection_summary(&self) -> ConnectionSummary {
        self.0.lock().unwrap().clone()
    }
}

fn reconciler(
    observer: Arc<dyn ConnectionObserver>,
    reporter: Arc<dyn StatusReporter>,
    interval: Duration,
) -> HealthReconciler {
    HealthReconciler::new(
        observer,
        reporter,
        Arc::new(NoopMetrics),
        interval,
        Duration::from_millis(200),
    )
}

fn observation() -> impl Strategy<Value = (ConnectionState, bool, bool)> {
    (
        prop_oneof![
            Just(ConnectionState::Disconnected),
            Just(ConnectionState::Connecting),
            Just(ConnectionState::Connected),
        ],
        any::<bool>(),
        any::<bool>(),
    )
}

proptest! {
    /// One report per change of derived phase, never one per tick
    #[test]
    fn prop_reports_only_on_phase_change(observations in prop::collection::vec(observation(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let observer = Arc::new(ScriptedObserver::new());
        let reporter = Arc::new(RecordingReporter::default());
        let reconciler = reconciler(observer.clone(), reporter.clone(), Duration::from_secs(5));

        let mut derived = Vec::new();
        runtime.block_on(async {
            for (state, ever_connected, attempted) in &observations {
                observer.set(*state, *ever_connected, *attempted);
                derived.push(DevicePhase::derive(*state, *ever_connected, *attempted));
                reconciler.tick().await;
            }
        });

        let mut transitions = derived.clone();
        transitions.dedup();
        prop_assert_eq!(reporter.calls(), transitions);
        prop_assert_eq!(reconciler.reported_phase(), derived.last().copied());
    }
}

#[tokio::test]
async fn test_connection_flip_reports_each_transition_once() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let bridge = Arc::new(SimulatedBridge::new(tx));
    let manager = Arc::new(ConnectionManager::new(
        bridge.clone(),
        Arc::new(NoopMetrics),
        ManagerSettings::default(),
    ));
    let reporter = Arc::new(RecordingReporter::default());
    let reconciler = reconciler(manager.clone(), reporter.clone(), Duration::from_secs(5));

    assert_eq!(reconciler.tick().await, TickOutcome::Reported(DevicePhase::Unknown));

    manager.connect().await.unwrap();
    assert_eq!(reconciler.tick().await, TickOutcome::Reported(DevicePhase::Running));
    assert_eq!(reconciler.tick().await, TickOutcome::Unchanged(DevicePhase::Running));

    manager.on_connection_lost("link down");
    assert_eq!(reconciler.tick().await, TickOutcome::Reported(DevicePhase::Failed));

    manager.connect().await.unwrap();
    assert_eq!(reconciler.tick().await, TickOutcome::Reported(DevicePhase::Running));

    assert_eq!(
        reporter.calls(),
        vec![
            DevicePhase::Unknown,
            DevicePhase::Running,
            DevicePhase::Failed,
            DevicePhase::Running,
        ]
    );
}

#[tokio::test]
async fn test_flip_between_ticks_without_prior_report() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let bridge = Arc::new(SimulatedBridge::new(tx));
    let manager = Arc::new(ConnectionManager::new(
        bridge,
        Arc::new(NoopMetrics),
        ManagerSettings::default(),
    ));
    let reporter = Arc::new(RecordingReporter::default());
    let reconciler = reconciler(manager.clone(), reporter.clone(), Duration::from_secs(5));

    manager.connect().await.unwrap();
    reconciler.tick().await;
    manager.on_connection_lost("flap");
    manager.connect().await.unwrap();
    manager.on_connection_lost("flap again");
    reconciler.tick().await;

    assert_eq!(reporter.calls(), vec![DevicePhase::Running, DevicePhase::Failed]);
}

#[tokio::test]
async fn test_hanging_control_plane_is_bounded() {
    let observer = Arc::new(ScriptedObserver::new());
    observer.set(ConnectionState::Connected, true, true);
    let reconciler = reconciler(observer, Arc::new(HangingReporter), Duration::from_secs(5));

    let outcome = tokio::time::timeout(Duration::from_secs(2), reconciler.tick())
        .await
        .expect("tick must respect the report timeout");

    assert_eq!(outcome, TickOutcome::Failed(DevicePhase::Running));
    assert_eq!(reconciler.reported_phase(), None);
}

#[tokio::test]
async fn test_run_reports_terminal_phase_on_shutdown() {
    let observer = Arc::new(ScriptedObserver::new());
    observer.set(ConnectionState::Connected, true, true);
    let reporter = Arc::new(RecordingReporter::default());
    let reconciler = reconciler(observer, reporter.clone(), Duration::from_millis(20));
    let mut reported = reconciler.watch_reported();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(reconciler.run(shutdown_rx));

    tokio::time::timeout(
        Duration::from_secs(5),
        reported.wait_for(|phase| *phase == Some(DevicePhase::Running)),
    )
    .await
    .unwrap()
    .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    assert_eq!(
        reporter.calls(),
        vec![DevicePhase::Running, DevicePhase::TERMINAL]
    );
}
