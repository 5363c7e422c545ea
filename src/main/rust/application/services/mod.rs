mod command_router;
mod connection_manager;
mod handler_table;
mod health_reconciler;
mod telemetry_cache;

pub use command_router::{CommandRouter, Notification, RouteReceipt};
pub use connection_manager::{ConnectionManager, Delivery, ManagerSettings};
pub use handler_table::{topic_matches, MessageHandler};
pub use health_reconciler::{HealthReconciler, TickOutcome};
pub use telemetry_cache::{decode_payload, ChannelReading, TelemetryCache, TelemetrySnapshot};
