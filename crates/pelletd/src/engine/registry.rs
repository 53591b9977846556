use std::collections::BTreeMap;

use serde_json::Value;

use crate::config::DeviceConfig;
use crate::mqtt::{DeviceTopics, TopicConfig};
use crate::stove::{StateError, StoveState};

/// Stable device id from the connection box's MAC (`AA:BB:..` → `AA_BB_..`)
pub fn device_id_from_mac(mac: &str) -> String {
    mac.replace(':', "_")
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("response has no DATA object")]
    MissingData,

    #[error("response is missing a MAC identifier")]
    MissingMac,

    #[error(transparent)]
    State(#[from] StateError),
}

/// A successful `GET ALLS` reading, tied to the configured stove it came from
#[derive(Debug, Clone)]
pub struct Poll {
    pub device_id: String,
    pub name: String,
    pub hostname: String,
    pub state: StoveState,
}

impl Poll {
    pub fn from_response(descriptor: &DeviceConfig, body: &Value) -> Result<Self, PollError> {
        let data = body
            .get("DATA")
            .and_then(Value::as_object)
            .ok_or(PollError::MissingData)?;
        let mac = data
            .get("MAC")
            .and_then(Value::as_str)
            .ok_or(PollError::MissingMac)?;
        let state = StoveState::from_fields(data)?;

        Ok(Self {
            device_id: device_id_from_mac(mac),
            name: descriptor.name.clone(),
            hostname: descriptor.hostname.clone(),
            state,
        })
    }
}

/// One known stove
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub device_id: String,
    pub name: String,
    pub hostname: String,
    pub state: StoveState,
    pub topics: DeviceTopics,

    /// Discovery payloads have been published since the last (re)configuration
    pub announced: bool,
}

impl Device {
    fn new(poll: Poll, topic_config: &TopicConfig) -> Self {
        let topics = DeviceTopics::build(topic_config, &poll.device_id, &poll.name);
        Self {
            device_id: poll.device_id,
            name: poll.name,
            hostname: poll.hostname,
            state: poll.state,
            topics,
            announced: false,
        }
    }
}

/// Known devices keyed by device id
///
/// Devices are only ever added; nothing expires.
#[derive(Debug, Default)]
pub struct Registry {
    devices: BTreeMap<String, Device>,
}

impl Registry {
    /// Create the device on first sighting, otherwise overwrite its observed
    /// state. Returns the device and whether it was just created.
    pub fn apply_poll(&mut self, poll: Poll, topic_config: &TopicConfig) -> (&mut Device, bool) {
        use std::collections::btree_map::Entry;

        match self.devices.entry(poll.device_id.clone()) {
            Entry::Occupied(entry) => {
                let device = entry.into_mut();
                device.name = poll.name;
                device.hostname = poll.hostname;
                device.state = poll.state;
                (device, false)
            }
            Entry::Vacant(entry) => (entry.insert(Device::new(poll, topic_config)), true),
        }
    }

    /// Rebuild every device's topics and payloads
    pub fn reconfigure(&mut self, topic_config: &TopicConfig) {
        for device in self.devices.values_mut() {
            device.topics = DeviceTopics::build(topic_config, &device.device_id, &device.name);
        }
    }

    pub fn get(&self, device_id: &str) -> Option<&Device> {
        self.devices.get(device_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Device> {
        self.devices.values_mut()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::stove::Mode;

    fn descriptor() -> DeviceConfig {
        DeviceConfig {
            name: "Living Room".to_string(),
            hostname: "10.0.0.5".to_string(),
        }
    }

    fn response(status: i64) -> Value {
        json!({"DATA": {
            "MAC": "AA:BB:CC:DD:EE:FF",
            "SETP": 21, "T1": 19.5, "T2": 150, "T3": 80, "PQT": "12.3",
            "LSTATUS": status
        }})
    }

    #[test]
    fn test_device_id_from_mac() {
        assert_eq!(device_id_from_mac("AA:BB:CC:DD:EE:FF"), "AA_BB_CC_DD_EE_FF");
        assert_eq!(device_id_from_mac("aabbcc"), "aabbcc");
    }

    #[test]
    fn test_poll_from_response() {
        let poll = Poll::from_response(&descriptor(), &response(6)).unwrap();

        assert_eq!(poll.device_id, "AA_BB_CC_DD_EE_FF");
        assert_eq!(poll.hostname, "10.0.0.5");
        assert_eq!(poll.state.mode, Mode::Heat);
    }

    #[test]
    fn test_poll_rejects_incomplete_responses() {
        assert!(matches!(
            Poll::from_response(&descriptor(), &json!({"SUCCESS": true})),
            Err(PollError::MissingData)
        ));

        let mut body = response(6);
        body["DATA"].as_object_mut().unwrap().remove("MAC");
        assert!(matches!(
            Poll::from_response(&descriptor(), &body),
            Err(PollError::MissingMac)
        ));

        let mut body = response(6);
        body["DATA"].as_object_mut().unwrap().remove("T3");
        assert!(matches!(
            Poll::from_response(&descriptor(), &body),
            Err(PollError::State(StateError::MissingField("T3")))
        ));
    }

    #[test]
    fn test_apply_poll_creates_then_updates() {
        let config = TopicConfig::default();
        let mut registry = Registry::default();

        let poll = Poll::from_response(&descriptor(), &response(6)).unwrap();
        let (_, created) = registry.apply_poll(poll, &config);
        assert!(created);

        let poll = Poll::from_response(&descriptor(), &response(0)).unwrap();
        let (device, created) = registry.apply_poll(poll, &config);
        assert!(!created);
        assert_eq!(device.state.mode, Mode::Off);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_update_keeps_announcement() {
        let config = TopicConfig::default();
        let mut registry = Registry::default();

        let poll = Poll::from_response(&descriptor(), &response(6)).unwrap();
        registry.apply_poll(poll.clone(), &config).0.announced = true;
        registry.apply_poll(poll, &config);

        assert!(registry.get("AA_BB_CC_DD_EE_FF").unwrap().announced);
    }

    #[test]
    fn test_reconfigure_rebuilds_topics() {
        let mut registry = Registry::default();
        let poll = Poll::from_response(&descriptor(), &response(6)).unwrap();
        registry.apply_poll(poll, &TopicConfig::default());

        let moved = TopicConfig {
            state_prefix: "stoves".to_string(),
            ..TopicConfig::default()
        };
        registry.reconfigure(&moved);

        let device = registry.get("AA_BB_CC_DD_EE_FF").unwrap();
        assert_eq!(device.topics.state.temp, "stoves/AA_BB_CC_DD_EE_FF/temp");
    }
}
