//! Stove firmware status codes.
//!
//! Labels follow the vendor's Android app mapping.

/// Label used for codes missing from [`STATUS_LABELS`]
pub const DEFAULT_STATUS_LABEL: &str = "Off";

pub const STATUS_LABELS: &[(i64, &str)] = &[
    (0, "Off"),
    (1, "Timer-regulated switch off"),
    (2, "Ignition test"),
    (3, "Pellet feed"),
    (4, "Ignition"),
    (5, "Fuel check"),
    (6, "Operating"),
    (7, "Operating - Modulating"),
    (8, "-"),
    (9, "Stand-By"),
    (10, "Switch off"),
    (11, "Burn pot cleaning"),
    (12, "Cooling in progress"),
    (50, "Final cleaning"),
    (51, "Ecomode"),
    (501, "Off"),
    (502, "Ignition"),
    (503, "Fuel check"),
    (504, "Operating"),
    (505, "Firewood finished"),
    (506, "Cooling"),
    (507, "Burn pot cleaning"),
    (1000, "General error – See Manual"),
    (1001, "General error – See Manual"),
    (1239, "Door open"),
    (1240, "Temperature too high"),
    (1241, "Cleaning warning"),
    (1243, "Fuel error – See Manual"),
    (1244, "Pellet probe or return water error"),
    (1245, "T05 error Disconnected or faulty probe"),
    (1247, "Feed hatch or door open"),
    (1248, "Safety pressure switch error"),
    (1249, "Main probe failure"),
    (1250, "Flue gas probe failure"),
    (1252, "Too high exhaust gas temperature"),
    (1253, "Pellets finished or Ignition failed"),
    (1508, "General error – See Manual"),
];

/// Codes during which the stove is burning (or about to)
pub const HEATING_STATUSES: [i64; 10] = [2, 3, 4, 5, 6, 7, 51, 502, 503, 504];

pub fn status_label(code: i64) -> &'static str {
    STATUS_LABELS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, label)| *label)
        .unwrap_or(DEFAULT_STATUS_LABEL)
}

pub fn is_heating(code: i64) -> bool {
    HEATING_STATUSES.contains(&code)
}
