mod simulated_bridge;

pub use simulated_bridge::{BridgeOperation, SimulatedBridge};
