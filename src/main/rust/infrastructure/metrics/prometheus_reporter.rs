use lazy_static::lazy_static;
use prometheus::core::Collector;
use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::domain::ports::{MetricsReporter, PublishOutcome};
use crate::domain::value_objects::{ConnectionState, DevicePhase};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Bridge connection state (0=Disconnected, 1=Connecting, 2=Connected)
    pub static ref CONNECTION_STATE: Gauge = Gauge::new(
        "device_shim_connection_state",
        "Current bridge connection state"
    ).expect("metric can be created");

    pub static ref RECONNECT_ATTEMPTS: IntCounter = IntCounter::new(
        "reconnect_attempts_total",
        "Total number of reconnection attempts"
    ).expect("metric can be created");

    pub static ref BACKOFF_SECONDS: Gauge = Gauge::new(
        "reconnect_backoff_seconds",
        "Current reconnection backoff delay"
    ).expect("metric can be created");

    pub static ref PENDING_OPERATIONS: IntGauge = IntGauge::new(
        "pending_operations",
        "Operations buffered while the bridge is down"
    ).expect("metric can be created");

    pub static ref PUBLISHES: IntCounterVec = IntCounterVec::new(
        Opts::new("bridge_publishes_total", "Publish requests by outcome"),
        &["outcome"]
    ).expect("metric can be created");

    // Last acknowledged phase (0=Pending, 1=Running, 2=Failed, 3=Unknown)
    pub static ref DEVICE_PHASE: Gauge = Gauge::new(
        "device_phase",
        "Device phase last acknowledged by the control plane"
    ).expect("metric can be created");

    pub static ref PHASE_REPORTS: IntCounter = IntCounter::new(
        "phase_reports_total",
        "Successful phase reports"
    ).expect("metric can be created");

    pub static ref PHASE_REPORT_FAILURES: IntCounter = IntCounter::new(
        "phase_report_failures_total",
        "Failed phase reports"
    ).expect("metric can be created");

    pub static ref TELEMETRY_UPDATES: IntCounterVec = IntCounterVec::new(
        Opts::new("telemetry_updates_total", "Telemetry cache updates by channel"),
        &["channel"]
    ).expect("metric can be created");
}

fn collectors() -> Vec<Box<dyn Collector>> {
    vec![
        Box::new(CONNECTION_STATE.clone()),
        Box::new(RECONNECT_ATTEMPTS.clone()),
        Box::new(BACKOFF_SECONDS.clone()),
        Box::new(PENDING_OPERATIONS.clone()),
        Box::new(PUBLISHES.clone()),
        Box::new(DEVICE_PHASE.clone()),
        Box::new(PHASE_REPORTS.clone()),
        Box::new(PHASE_REPORT_FAILURES.clone()),
        Box::new(TELEMETRY_UPDATES.clone()),
    ]
}

/// Prometheus-backed [`MetricsReporter`]; all instances share one registry
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusReporter;

impl PrometheusReporter {
    pub fn new() -> Self {
        Self
    }

    /// Register every shim metric; call once at startup
    pub fn init_metrics() -> Result<(), prometheus::Error> {
        collectors()
            .into_iter()
            .try_for_each(|collector| REGISTRY.register(collector))
    }

    /// Text exposition of the shim registry plus process metrics
    pub fn gather_metrics() -> Vec<u8> {
        let mut families = REGISTRY.gather();
        families.extend(prometheus::gather());

        let mut buffer = Vec::new();
        match TextEncoder::new().encode(&families, &mut buffer) {
            Ok(()) => buffer,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode metrics");
                b"# Error encoding metrics\n".to_vec()
            }
        }
    }
}

impl MetricsReporter for PrometheusReporter {
    fn report_state_change(&self, state: ConnectionState) {
        CONNECTION_STATE.set(state.as_metric());
    }

    fn report_reconnect_attempt(&self) {
        RECONNECT_ATTEMPTS.inc();
    }

    fn report_backoff(&self, delay_secs: f64) {
        BACKOFF_SECONDS.set(delay_secs);
    }

    fn report_pending_depth(&self, depth: usize) {
        PENDING_OPERATIONS.set(depth as i64);
    }

    fn report_publish(&self, outcome: PublishOutcome) {
        PUBLISHES.with_label_values(&[outcome.as_label()]).inc();
    }

    fn report_phase(&self, phase: DevicePhase) {
        DEVICE_PHASE.set(phase.as_metric());
        PHASE_REPORTS.inc();
    }

    fn report_phase_failure(&self) {
        PHASE_REPORT_FAILURES.inc();
    }

    fn report_telemetry_update(&self, channel: &str) {
        TELEMETRY_UPDATES.with_label_values(&[channel]).inc();
    }
}
