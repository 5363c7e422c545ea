mod connection_lifecycle;
mod device_profile;

pub use connection_lifecycle::{ConnectionLifecycle, StateTransition};
pub use device_profile::{DeviceProfile, NotificationBinding, TelemetryBinding};
