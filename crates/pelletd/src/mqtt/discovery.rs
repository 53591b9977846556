use serde::Serialize;

use crate::stove::Mode;

pub const MANUFACTURER: &str = "Palazzetti";

/// Home Assistant MQTT discovery payload for the stove's climate entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClimateDiscovery {
    pub name: String,
    pub unique_id: String,

    pub current_temperature_topic: String,
    pub mode_state_topic: String,
    pub temperature_state_topic: String,

    pub mode_command_topic: String,
    pub temperature_command_topic: String,

    /// Always `["off", "heat"]`
    pub modes: Vec<Mode>,

    pub device: DeviceInfo,
}

/// Discovery payload for a read-only sensor entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorDiscovery {
    pub name: String,
    pub unique_id: String,
    pub state_topic: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,

    pub device: DeviceInfo,
}

/// Device block shared by every entity of one stove, so Home Assistant
/// groups them under a single device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<String>,
    pub manufacturer: String,
    pub name: String,
}

impl DeviceInfo {
    pub fn new(device_id: &str, name: &str) -> Self {
        Self {
            identifiers: vec![device_id.to_string()],
            manufacturer: MANUFACTURER.to_string(),
            name: name.to_string(),
        }
    }
}

/// Serialized payload of one discovery topic
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryPayload {
    Climate(ClimateDiscovery),
    Sensor(SensorDiscovery),
}

impl DiscoveryPayload {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            DiscoveryPayload::Climate(climate) => serde_json::to_string(climate),
            DiscoveryPayload::Sensor(sensor) => serde_json::to_string(sensor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_omits_absent_fields() {
        let sensor = SensorDiscovery {
            name: "Living Room (status)".to_string(),
            unique_id: "AA_BB_status".to_string(),
            state_topic: "palazzetti/state/AA_BB/status".to_string(),
            device_class: None,
            unit_of_measurement: None,
            device: DeviceInfo::new("AA_BB", "Living Room"),
        };

        let json = DiscoveryPayload::Sensor(sensor).to_json().unwrap();
        insta::assert_snapshot!(json, @r#"{"name":"Living Room (status)","unique_id":"AA_BB_status","state_topic":"palazzetti/state/AA_BB/status","device":{"identifiers":["AA_BB"],"manufacturer":"Palazzetti","name":"Living Room"}}"#);
    }
}
