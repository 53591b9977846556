use serde::Serialize;
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use super::status;

/// Operating mode exposed to Home Assistant's climate entity
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, EnumString, AsRefStr, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    Off,
    Heat,
}

impl Mode {
    pub fn from_status(code: i64) -> Self {
        if status::is_heating(code) {
            Mode::Heat
        } else {
            Mode::Off
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StateError {
    #[error("missing required field {0}")]
    MissingField(&'static str),

    #[error("field {field} has unexpected value {value}")]
    InvalidField { field: &'static str, value: Value },
}

/// Normalized view of one `GET ALLS` reading
#[derive(Debug, Clone, PartialEq)]
pub struct StoveState {
    /// Set point (`SETP`)
    pub target_temperature: f64,
    /// Room probe (`T1`)
    pub room_temperature: f64,
    /// Air exit (`T2`)
    pub exit_temperature: f64,
    /// Flue gas (`T3`)
    pub fumes_temperature: f64,
    /// Pellets left in the hopper (`PQT`)
    pub pellet_quantity: f64,
    pub status_code: i64,
    pub status_label: &'static str,
    pub mode: Mode,
}

fn field<'a>(fields: &'a Map<String, Value>, key: &'static str) -> Result<&'a Value, StateError> {
    fields.get(key).ok_or(StateError::MissingField(key))
}

/// Numbers pass through untouched; numeric strings (the firmware sends `PQT` as one) are parsed
fn number(fields: &Map<String, Value>, key: &'static str) -> Result<f64, StateError> {
    let value = field(fields, key)?;
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    parsed.ok_or_else(|| StateError::InvalidField {
        field: key,
        value: value.clone(),
    })
}

fn integer(fields: &Map<String, Value>, key: &'static str) -> Result<i64, StateError> {
    let value = field(fields, key)?;
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    parsed.ok_or_else(|| StateError::InvalidField {
        field: key,
        value: value.clone(),
    })
}

impl StoveState {
    /// Build state from the `DATA` object of a `GET ALLS` response
    ///
    /// Fails without producing anything if any of `SETP`, `T1`, `T2`, `T3`,
    /// `PQT` or `LSTATUS` is absent or not numeric.
    pub fn from_fields(fields: &Map<String, Value>) -> Result<Self, StateError> {
        let target_temperature = number(fields, "SETP")?;
        let room_temperature = number(fields, "T1")?;
        let exit_temperature = number(fields, "T2")?;
        let fumes_temperature = number(fields, "T3")?;
        let pellet_quantity = number(fields, "PQT")?;
        let status_code = integer(fields, "LSTATUS")?;

        Ok(Self {
            target_temperature,
            room_temperature,
            exit_temperature,
            fumes_temperature,
            pellet_quantity,
            status_code,
            status_label: status::status_label(status_code),
            mode: Mode::from_status(status_code),
        })
    }
}
