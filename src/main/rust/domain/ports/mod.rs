mod bridge_channel;
mod connection_observer;
mod metrics_reporter;
mod reconnect_strategy;
mod status_reporter;

pub use bridge_channel::{BridgeChannel, BridgeEvent};
pub use connection_observer::{ConnectionObserver, ConnectionSummary};
pub use metrics_reporter::{MetricsReporter, NoopMetrics, PublishOutcome};
pub use reconnect_strategy::{ExponentialBackoff, FixedDelay, ReconnectStrategy};
pub use status_reporter::StatusReporter;
