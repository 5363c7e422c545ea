mod kube_status_client;
mod logging_status_reporter;

pub use kube_status_client::{device_address, phase_patch, ControlPlaneSettings, KubeStatusClient};
pub use logging_status_reporter::LoggingStatusReporter;
