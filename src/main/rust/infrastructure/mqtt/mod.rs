mod mqtt_bridge;

pub use mqtt_bridge::{parse_broker_address, MqttBridge, MqttSettings, DEFAULT_MQTT_PORT};
