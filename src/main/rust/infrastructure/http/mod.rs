mod gateway;

pub use gateway::{routes, serve, status_for, GatewayState};
