pub mod control_plane;
pub mod http;
pub mod metrics;
pub mod mqtt;
pub mod profile;
pub mod rosbridge;
pub mod simulated;
