pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-exports for convenience
pub use application::services::{
    CommandRouter, ConnectionManager, Delivery, HealthReconciler, ManagerSettings, TelemetryCache,
    TelemetrySnapshot,
};
pub use config::{BridgeKind, Config};
pub use domain::entities::{ConnectionLifecycle, DeviceProfile, StateTransition};
pub use domain::errors::{DomainError, Result};
pub use domain::ports::{BridgeChannel, BridgeEvent, MetricsReporter, StatusReporter};
pub use domain::value_objects::{
    BackoffPolicy, ConnectionState, DevicePhase, PendingOperation, QualityOfDelivery,
};
pub use infrastructure::control_plane::{KubeStatusClient, LoggingStatusReporter};
pub use infrastructure::http::GatewayState;
pub use infrastructure::metrics::PrometheusReporter;
pub use infrastructure::mqtt::MqttBridge;
pub use infrastructure::profile::{load_profile, DevicePreset};
pub use infrastructure::rosbridge::RosbridgeChannel;
pub use infrastructure::simulated::SimulatedBridge;
