mod backoff_policy;
mod command_route;
mod connection_state;
mod device_phase;
mod pending_operation;
mod quality_of_delivery;

pub use backoff_policy::BackoffPolicy;
pub use command_route::{CommandRoute, FieldKind, FieldSpec, PayloadFormat};
pub use connection_state::ConnectionState;
pub use device_phase::DevicePhase;
pub use pending_operation::PendingOperation;
pub use quality_of_delivery::QualityOfDelivery;
