//! Topic layout and discovery payloads for one stove.
//!
//! Everything here is a pure function of the device id, its display name and
//! a handful of prefixes and unit strings: building the same device twice
//! gives identical topics and payloads.

use std::collections::BTreeMap;

use strum::{AsRefStr, EnumIter, IntoEnumIterator};

use super::client::MqttOp;
use super::discovery::{ClimateDiscovery, DeviceInfo, DiscoveryPayload, SensorDiscovery};
use crate::config::{MqttConfig, UnitsConfig};
use crate::stove::{Mode, StoveState};

/// The slice of configuration that shapes topics and payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicConfig {
    pub discovery_prefix: String,
    pub state_prefix: String,
    pub command_prefix: String,
    pub reset_topic: String,
    pub temperature_unit: String,
    pub pellet_quantity_unit: String,
}

impl TopicConfig {
    pub fn from_config(mqtt: &MqttConfig, units: &UnitsConfig) -> Self {
        Self {
            discovery_prefix: mqtt.discovery_prefix.clone(),
            state_prefix: mqtt.state_prefix.clone(),
            command_prefix: mqtt.command_prefix.clone(),
            reset_topic: mqtt.reset_topic.clone(),
            temperature_unit: units.temperature.clone(),
            pellet_quantity_unit: units.pellet_quantity.clone(),
        }
    }
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self::from_config(&MqttConfig::default(), &UnitsConfig::default())
    }
}

/// Inbound command a device accepts; the string form is the last topic segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, AsRefStr, EnumIter)]
pub enum Command {
    #[strum(serialize = "mode")]
    SetMode,
    #[strum(serialize = "target_temp")]
    SetTargetTemperature,
}

/// Retained state topics, one per published value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTopics {
    pub temp: String,
    pub mode: String,
    pub target_temp: String,
    pub status: String,
    pub exit_temp: String,
    pub fumes_temp: String,
    pub pellet_qty: String,
}

impl StateTopics {
    fn new(state_prefix: &str, device_id: &str) -> Self {
        let topic = |leaf: &str| format!("{}/{}/{}", state_prefix, device_id, leaf);
        Self {
            temp: topic("temp"),
            mode: topic("mode"),
            target_temp: topic("target_temp"),
            status: topic("status"),
            exit_temp: topic("exit_temp"),
            fumes_temp: topic("fumes_temp"),
            pellet_qty: topic("pellet_qty"),
        }
    }
}

/// Everything a device publishes to or listens on
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceTopics {
    pub state: StateTopics,

    /// Discovery topic and payload pairs: the climate entity, then the
    /// status, exit temperature, fumes temperature and pellet quantity sensors
    pub discovery: Vec<(String, DiscoveryPayload)>,

    /// Command topic to command; the only source of truth for inbound dispatch
    commands: BTreeMap<String, Command>,
}

impl DeviceTopics {
    pub fn build(config: &TopicConfig, device_id: &str, name: &str) -> Self {
        let state = StateTopics::new(&config.state_prefix, device_id);
        let command_topic =
            |command: Command| format!("{}/{}/{}", config.command_prefix, device_id, command.as_ref());

        let commands: BTreeMap<String, Command> = Command::iter()
            .map(|command| (command_topic(command), command))
            .collect();

        let device = DeviceInfo::new(device_id, name);

        let climate = ClimateDiscovery {
            name: name.to_string(),
            unique_id: device_id.to_string(),
            current_temperature_topic: state.temp.clone(),
            mode_state_topic: state.mode.clone(),
            temperature_state_topic: state.target_temp.clone(),
            mode_command_topic: command_topic(Command::SetMode),
            temperature_command_topic: command_topic(Command::SetTargetTemperature),
            modes: Mode::iter().collect(),
            device: device.clone(),
        };

        let sensor = |suffix: &str,
                      label: &str,
                      state_topic: &str,
                      device_class: Option<&str>,
                      unit: Option<&str>| {
            let topic = format!(
                "{}/sensor/{}_{}/config",
                config.discovery_prefix, device_id, suffix
            );
            let payload = SensorDiscovery {
                name: format!("{} ({})", name, label),
                unique_id: format!("{}_{}", device_id, suffix),
                state_topic: state_topic.to_string(),
                device_class: device_class.map(str::to_string),
                unit_of_measurement: unit.map(str::to_string),
                device: device.clone(),
            };
            (topic, DiscoveryPayload::Sensor(payload))
        };

        let discovery = vec![
            (
                format!("{}/climate/{}/config", config.discovery_prefix, device_id),
                DiscoveryPayload::Climate(climate),
            ),
            sensor("status", "status", &state.status, None, None),
            sensor(
                "exit_temp",
                "exit temperature",
                &state.exit_temp,
                Some("temperature"),
                Some(config.temperature_unit.as_str()),
            ),
            sensor(
                "fumes_temp",
                "fumes temperature",
                &state.fumes_temp,
                Some("temperature"),
                Some(config.temperature_unit.as_str()),
            ),
            sensor(
                "pellet_qty",
                "pellet quantity",
                &state.pellet_qty,
                None,
                Some(config.pellet_quantity_unit.as_str()),
            ),
        ];

        Self {
            state,
            discovery,
            commands,
        }
    }

    pub fn command_for(&self, topic: &str) -> Option<Command> {
        self.commands.get(topic).copied()
    }

    pub fn command_topics(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    /// Subscribe to the command topics, and optionally announce every entity
    pub fn register_ops(&self, publish_discovery: bool) -> Result<Vec<MqttOp>, serde_json::Error> {
        let mut ops: Vec<MqttOp> = self
            .command_topics()
            .map(|topic| MqttOp::Subscribe(topic.to_string()))
            .collect();

        if publish_discovery {
            for (topic, payload) in &self.discovery {
                ops.push(MqttOp::publish_retained(topic.as_str(), payload.to_json()?));
            }
        }

        Ok(ops)
    }

    /// Stop listening for commands; an empty retained payload removes the
    /// entity from Home Assistant
    pub fn unregister_ops(&self, clear_discovery: bool) -> Vec<MqttOp> {
        let mut ops: Vec<MqttOp> = self
            .command_topics()
            .map(|topic| MqttOp::Unsubscribe(topic.to_string()))
            .collect();

        if clear_discovery {
            ops.extend(
                self.discovery
                    .iter()
                    .map(|(topic, _)| MqttOp::publish_retained(topic.as_str(), "")),
            );
        }

        ops
    }

    pub fn state_ops(&self, state: &StoveState) -> Vec<MqttOp> {
        let topics = &self.state;
        vec![
            MqttOp::publish_retained(topics.temp.as_str(), state.room_temperature.to_string()),
            MqttOp::publish_retained(topics.mode.as_str(), state.mode.as_ref()),
            MqttOp::publish_retained(
                topics.target_temp.as_str(),
                state.target_temperature.to_string(),
            ),
            MqttOp::publish_retained(topics.status.as_str(), state.status_label),
            MqttOp::publish_retained(topics.exit_temp.as_str(), state.exit_temperature.to_string()),
            MqttOp::publish_retained(
                topics.fumes_temp.as_str(),
                state.fumes_temperature.to_string(),
            ),
            MqttOp::publish_retained(
                topics.pellet_qty.as_str(),
                state.pellet_quantity.to_string(),
            ),
        ]
    }
}

/// Split a command topic into `(device_id, command)` by its last two segments
pub fn parse_command_topic(topic: &str) -> Option<(&str, &str)> {
    let mut segments = topic.rsplit('/');
    let command = segments.next()?;
    let device_id = segments.next()?;
    Some((device_id, command))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "AA_BB_CC_DD_EE_FF";

    fn topics() -> DeviceTopics {
        DeviceTopics::build(&TopicConfig::default(), ID, "Living Room")
    }

    fn state() -> StoveState {
        StoveState {
            target_temperature: 21.0,
            room_temperature: 19.5,
            exit_temperature: 150.0,
            fumes_temperature: 80.0,
            pellet_quantity: 12.3,
            status_code: 6,
            status_label: "Operating",
            mode: Mode::Heat,
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        assert_eq!(topics(), topics());
        assert_eq!(
            topics().register_ops(true).unwrap(),
            topics().register_ops(true).unwrap()
        );
    }

    #[test]
    fn test_default_topic_layout() {
        let topics = topics();

        assert_eq!(topics.state.temp, "palazzetti/state/AA_BB_CC_DD_EE_FF/temp");
        assert_eq!(topics.state.pellet_qty, "palazzetti/state/AA_BB_CC_DD_EE_FF/pellet_qty");

        let discovery: Vec<&str> = topics.discovery.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(
            discovery,
            vec![
                "homeassistant/climate/AA_BB_CC_DD_EE_FF/config",
                "homeassistant/sensor/AA_BB_CC_DD_EE_FF_status/config",
                "homeassistant/sensor/AA_BB_CC_DD_EE_FF_exit_temp/config",
                "homeassistant/sensor/AA_BB_CC_DD_EE_FF_fumes_temp/config",
                "homeassistant/sensor/AA_BB_CC_DD_EE_FF_pellet_qty/config",
            ]
        );
    }

    #[test]
    fn test_prefixes_are_configurable() {
        let config = TopicConfig {
            discovery_prefix: "ha".to_string(),
            state_prefix: "stoves/state".to_string(),
            command_prefix: "stoves/set".to_string(),
            ..TopicConfig::default()
        };
        let topics = DeviceTopics::build(&config, "X", "Attic");

        assert_eq!(topics.state.mode, "stoves/state/X/mode");
        assert_eq!(topics.discovery[0].0, "ha/climate/X/config");
        assert_eq!(
            topics.command_for("stoves/set/X/target_temp"),
            Some(Command::SetTargetTemperature)
        );
    }

    #[test]
    fn test_command_table_has_exactly_two_entries() {
        let topics = topics();

        assert_eq!(
            topics.command_topics().collect::<Vec<_>>(),
            vec![
                "palazzetti/command/AA_BB_CC_DD_EE_FF/mode",
                "palazzetti/command/AA_BB_CC_DD_EE_FF/target_temp",
            ]
        );
        assert_eq!(
            topics.command_for("palazzetti/command/AA_BB_CC_DD_EE_FF/mode"),
            Some(Command::SetMode)
        );
        assert_eq!(topics.command_for("palazzetti/command/AA_BB_CC_DD_EE_FF/power"), None);
        assert_eq!(topics.command_for("palazzetti/command/OTHER/mode"), None);
    }

    #[test]
    fn test_climate_discovery_payload() {
        let topics = topics();
        let DiscoveryPayload::Climate(climate) = &topics.discovery[0].1 else {
            panic!("first discovery entry is not the climate entity");
        };

        insta::assert_snapshot!(serde_json::to_string_pretty(climate).unwrap(), @r#"
        {
          "name": "Living Room",
          "unique_id": "AA_BB_CC_DD_EE_FF",
          "current_temperature_topic": "palazzetti/state/AA_BB_CC_DD_EE_FF/temp",
          "mode_state_topic": "palazzetti/state/AA_BB_CC_DD_EE_FF/mode",
          "temperature_state_topic": "palazzetti/state/AA_BB_CC_DD_EE_FF/target_temp",
          "mode_command_topic": "palazzetti/command/AA_BB_CC_DD_EE_FF/mode",
          "temperature_command_topic": "palazzetti/command/AA_BB_CC_DD_EE_FF/target_temp",
          "modes": [
            "off",
            "heat"
          ],
          "device": {
            "identifiers": [
              "AA_BB_CC_DD_EE_FF"
            ],
            "manufacturer": "Palazzetti",
            "name": "Living Room"
          }
        }
        "#);
    }

    #[test]
    fn test_temperature_sensors_carry_unit() {
        let config = TopicConfig {
            temperature_unit: "°F".to_string(),
            pellet_quantity_unit: "lb".to_string(),
            ..TopicConfig::default()
        };
        let topics = DeviceTopics::build(&config, ID, "Living Room");

        let sensors: Vec<&SensorDiscovery> = topics
            .discovery
            .iter()
            .filter_map(|(_, payload)| match payload {
                DiscoveryPayload::Sensor(sensor) => Some(sensor),
                DiscoveryPayload::Climate(_) => None,
            })
            .collect();
        assert_eq!(sensors.len(), 4);

        let status = sensors[0];
        assert_eq!(status.name, "Living Room (status)");
        assert_eq!(status.device_class, None);
        assert_eq!(status.unit_of_measurement, None);

        for sensor in &sensors[1..3] {
            assert_eq!(sensor.device_class.as_deref(), Some("temperature"));
            assert_eq!(sensor.unit_of_measurement.as_deref(), Some("°F"));
        }

        let pellets = sensors[3];
        assert_eq!(pellets.unique_id, "AA_BB_CC_DD_EE_FF_pellet_qty");
        assert_eq!(pellets.device_class, None);
        assert_eq!(pellets.unit_of_measurement.as_deref(), Some("lb"));
    }

    #[test]
    fn test_register_ops() {
        let topics = topics();

        let quiet = topics.register_ops(false).unwrap();
        assert_eq!(
            quiet,
            vec![
                MqttOp::Subscribe("palazzetti/command/AA_BB_CC_DD_EE_FF/mode".to_string()),
                MqttOp::Subscribe("palazzetti/command/AA_BB_CC_DD_EE_FF/target_temp".to_string()),
            ]
        );

        let announced = topics.register_ops(true).unwrap();
        assert_eq!(announced.len(), 2 + 5);
        assert!(announced[2..].iter().all(|op| matches!(
            op,
            MqttOp::Publish { retain: true, payload, .. } if payload.starts_with('{')
        )));
    }

    #[test]
    fn test_unregister_ops() {
        let topics = topics();

        assert_eq!(topics.unregister_ops(false).len(), 2);

        let cleared = topics.unregister_ops(true);
        assert_eq!(cleared.len(), 2 + 5);
        assert_eq!(
            cleared[2],
            MqttOp::publish_retained("homeassistant/climate/AA_BB_CC_DD_EE_FF/config", "")
        );
    }

    #[test]
    fn test_state_ops() {
        let ops = topics().state_ops(&state());
        let base = "palazzetti/state/AA_BB_CC_DD_EE_FF";

        assert_eq!(
            ops,
            vec![
                MqttOp::publish_retained(format!("{}/temp", base), "19.5"),
                MqttOp::publish_retained(format!("{}/mode", base), "heat"),
                MqttOp::publish_retained(format!("{}/target_temp", base), "21"),
                MqttOp::publish_retained(format!("{}/status", base), "Operating"),
                MqttOp::publish_retained(format!("{}/exit_temp", base), "150"),
                MqttOp::publish_retained(format!("{}/fumes_temp", base), "80"),
                MqttOp::publish_retained(format!("{}/pellet_qty", base), "12.3"),
            ]
        );
    }

    #[test]
    fn test_parse_command_topic() {
        assert_eq!(
            parse_command_topic("palazzetti/command/AA_BB/mode"),
            Some(("AA_BB", "mode"))
        );
        assert_eq!(parse_command_topic("a/b"), Some(("a", "b")));
        assert_eq!(parse_command_topic("mode"), None);
    }
}
