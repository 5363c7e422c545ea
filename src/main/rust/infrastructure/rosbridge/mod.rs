mod rosbridge_channel;

pub use rosbridge_channel::{parse_incoming, payload_to_msg, RosbridgeChannel};
