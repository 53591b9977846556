//! MQTT side of the bridge: broker client, topic layout and Home Assistant
//! discovery payloads.

mod client;
mod discovery;
mod topics;

#[cfg(test)]
pub use client::MockMqttClient;
pub use client::{MqttClient, MqttError, MqttMessage, MqttOp, RumqttcClient};
pub use discovery::{ClimateDiscovery, DeviceInfo, DiscoveryPayload, SensorDiscovery};
pub use topics::{parse_command_topic, Command, DeviceTopics, StateTopics, TopicConfig};
