use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing_subscriber::filter::{LevelFilter, Targets};

use super::diagnostics::{Diagnostic, Diagnostics, Error, SourceInfo, ValidationError, Warning};
use super::located::Located;
use super::partial::{
    PartialConfig, PartialDevice, PartialLoggingConfig, PartialMqttConfig, PartialPollingConfig,
    PartialUnitsConfig,
};

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub mqtt: MqttConfig,
    pub polling: PollingConfig,
    pub units: UnitsConfig,
    pub devices: Vec<DeviceConfig>,
}

// LogLevel needs Deserialize because it's read through Located in PartialLoggingConfig
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: LogLevel,

    /// Per-target levels, e.g. `"rumqttc" = "warn"`
    pub overrides: HashMap<String, LogLevel>,
}

impl LoggingConfig {
    /// Filter with the default level plus one directive per override
    pub fn targets(&self) -> Targets {
        Targets::new()
            .with_default(LevelFilter::from(self.level))
            .with_targets(
                self.overrides
                    .iter()
                    .map(|(target, level)| (target.clone(), LevelFilter::from(*level))),
            )
    }
}

/// Broker connection and topic layout
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_name: String,
    pub username: Option<String>,
    pub password: Option<String>,

    /// Home Assistant discovery prefix
    pub discovery_prefix: String,
    pub state_prefix: String,
    pub command_prefix: String,

    /// Any message here re-runs setup and re-publishes discovery
    pub reset_topic: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_name: "pelletd".to_string(),
            username: None,
            password: None,
            discovery_prefix: "homeassistant".to_string(),
            state_prefix: "palazzetti/state".to_string(),
            command_prefix: "palazzetti/command".to_string(),
            reset_topic: "palazzetti/reset".to_string(),
        }
    }
}

/// Refresh cadence and HTTP retry policy. Delays are in seconds.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub refresh_delays: Vec<f64>,
    pub refresh_delay_randomness: f64,
    pub retry_delays: Vec<f64>,
    pub retry_delay_randomness: f64,

    /// Extra attempts per HTTP call after the first one fails
    pub retries: u32,
    pub http_timeout: Duration,
    pub user_agent: String,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            refresh_delays: vec![3.0, 5.0, 10.0, 30.0],
            refresh_delay_randomness: 2.0,
            retry_delays: vec![1.0],
            retry_delay_randomness: 2.0,
            retries: 1,
            http_timeout: Duration::from_secs(10),
            user_agent: "pelletd".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnitsConfig {
    pub temperature: String,
    pub pellet_quantity: String,
}

impl Default for UnitsConfig {
    fn default() -> Self {
        Self {
            temperature: "°C".to_string(),
            pellet_quantity: "kg".to_string(),
        }
    }
}

/// One stove as declared in the config file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Display name used in Home Assistant
    pub name: String,

    /// Address of the stove's connection box
    pub hostname: String,
}

fn validation_error<T>(
    field_path: impl Into<String>,
    message: impl Into<String>,
    located: Option<&Located<T>>,
) -> Diagnostic {
    Diagnostic::Error(Error::Validation(ValidationError {
        field_path: field_path.into(),
        message: message.into(),
        span: located.map(|l| l.span().clone()),
        source: located.and_then(|l| l.source().cloned()),
    }))
}

fn take<T>(value: Option<Located<T>>, default: T) -> T {
    value.map(Located::into_inner).unwrap_or(default)
}

/// Required non-empty string, falling back to `default` when unset
fn non_empty(
    field_path: &str,
    value: Option<Located<String>>,
    default: String,
    diagnostics: &mut Vec<Diagnostic>,
) -> String {
    match value {
        Some(v) if v.trim().is_empty() => {
            diagnostics.push(validation_error(field_path, "must not be empty", Some(&v)));
            v.into_inner()
        }
        Some(v) => v.into_inner(),
        None => default,
    }
}

fn delays(
    field_path: &str,
    value: Option<Located<Vec<f64>>>,
    default: Vec<f64>,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<f64> {
    let Some(value) = value else {
        return default;
    };

    if value.is_empty() {
        diagnostics.push(validation_error(
            field_path,
            "at least one delay is required",
            Some(&value),
        ));
    } else if value.iter().any(|d| !d.is_finite() || *d < 0.0) {
        diagnostics.push(validation_error(
            field_path,
            "delays must be finite, non-negative numbers of seconds",
            Some(&value),
        ));
    }

    value.into_inner()
}

fn randomness(
    field_path: &str,
    value: Option<Located<f64>>,
    default: f64,
    diagnostics: &mut Vec<Diagnostic>,
) -> f64 {
    let Some(value) = value else {
        return default;
    };

    if !value.is_finite() || *value < 0.0 {
        diagnostics.push(validation_error(
            field_path,
            "randomness must be a finite, non-negative number of seconds",
            Some(&value),
        ));
    }

    value.into_inner()
}

impl Config {
    /// Load the defaults file and an optional local override file
    ///
    /// A missing override file is not an error; it is reported as a warning.
    pub fn load(
        defaults: &Path,
        local: Option<&Path>,
    ) -> Result<(Self, Diagnostics), Diagnostics> {
        let mut paths = vec![defaults.to_path_buf()];
        let mut diagnostics = Vec::new();

        if let Some(local) = local {
            if local.exists() {
                paths.push(local.to_path_buf());
            } else {
                diagnostics.push(Diagnostic::Warning(Warning::NoLocalConfig {
                    file_path: local.to_path_buf(),
                }));
            }
        }

        match Self::from_files(&paths) {
            Ok((config, more)) => {
                diagnostics.extend(more.0);
                Ok((config, Diagnostics(diagnostics)))
            }
            Err(more) => {
                diagnostics.extend(more.0);
                Err(Diagnostics(diagnostics))
            }
        }
    }

    /// Load and layer TOML files; later files override earlier ones per key
    ///
    /// Returns Ok((Config, diagnostics)) where diagnostics contains only warnings,
    /// or Err(diagnostics) when any file failed to load or validate.
    pub fn from_files(paths: &[PathBuf]) -> Result<(Self, Diagnostics), Diagnostics> {
        let mut layers = Vec::with_capacity(paths.len());
        for path in paths {
            let layer = PartialConfig::from_file(path)
                .map_err(|e| Diagnostics(vec![Diagnostic::Error(Error::Load(e))]))?;
            layers.push(layer);
        }

        let (partial, diagnostics) = PartialConfig::merge(layers);
        Self::from_partial(partial, diagnostics)
    }

    /// Convert a merged PartialConfig to a Config, applying defaults and validating
    pub fn from_partial(
        partial: PartialConfig,
        mut diagnostics: Vec<Diagnostic>,
    ) -> Result<(Self, Diagnostics), Diagnostics> {
        let logging = Self::convert_logging(partial.logging.unwrap_or_default());
        let mqtt = Self::convert_mqtt(partial.mqtt.unwrap_or_default(), &mut diagnostics);
        let polling = Self::convert_polling(partial.polling.unwrap_or_default(), &mut diagnostics);
        let units = Self::convert_units(partial.units.unwrap_or_default());
        let devices = Self::convert_devices(partial.devices, &partial.source, &mut diagnostics);

        let config = Config {
            logging,
            mqtt,
            polling,
            units,
            devices,
        };

        let diagnostics = Diagnostics(diagnostics);
        if diagnostics.has_errors() {
            Err(diagnostics)
        } else {
            Ok((config, diagnostics))
        }
    }

    fn convert_logging(partial: PartialLoggingConfig) -> LoggingConfig {
        LoggingConfig {
            level: take(partial.level, LogLevel::default()),
            overrides: partial
                .overrides
                .map(|hm| hm.into_iter().map(|(k, v)| (k, v.into_inner())).collect())
                .unwrap_or_default(),
        }
    }

    fn convert_mqtt(partial: PartialMqttConfig, diagnostics: &mut Vec<Diagnostic>) -> MqttConfig {
        let defaults = MqttConfig::default();

        if partial.password.is_some() && partial.username.is_none() {
            diagnostics.push(validation_error(
                "mqtt.password",
                "a password requires mqtt.username to be set",
                partial.password.as_ref(),
            ));
        }

        MqttConfig {
            host: non_empty("mqtt.host", partial.host, defaults.host, diagnostics),
            port: take(partial.port, defaults.port),
            client_name: non_empty(
                "mqtt.client_name",
                partial.client_name,
                defaults.client_name,
                diagnostics,
            ),
            username: partial.username.map(Located::into_inner),
            password: partial.password.map(Located::into_inner),
            discovery_prefix: non_empty(
                "mqtt.discovery_prefix",
                partial.discovery_prefix,
                defaults.discovery_prefix,
                diagnostics,
            ),
            state_prefix: non_empty(
                "mqtt.state_prefix",
                partial.state_prefix,
                defaults.state_prefix,
                diagnostics,
            ),
            command_prefix: non_empty(
                "mqtt.command_prefix",
                partial.command_prefix,
                defaults.command_prefix,
                diagnostics,
            ),
            reset_topic: non_empty(
                "mqtt.reset_topic",
                partial.reset_topic,
                defaults.reset_topic,
                diagnostics,
            ),
        }
    }

    fn convert_polling(
        partial: PartialPollingConfig,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> PollingConfig {
        let defaults = PollingConfig::default();

        PollingConfig {
            refresh_delays: delays(
                "polling.refresh_delays",
                partial.refresh_delays,
                defaults.refresh_delays,
                diagnostics,
            ),
            refresh_delay_randomness: randomness(
                "polling.refresh_delay_randomness",
                partial.refresh_delay_randomness,
                defaults.refresh_delay_randomness,
                diagnostics,
            ),
            retry_delays: delays(
                "polling.retry_delays",
                partial.retry_delays,
                defaults.retry_delays,
                diagnostics,
            ),
            retry_delay_randomness: randomness(
                "polling.retry_delay_randomness",
                partial.retry_delay_randomness,
                defaults.retry_delay_randomness,
                diagnostics,
            ),
            retries: take(partial.retries, defaults.retries),
            http_timeout: partial
                .http_timeout_secs
                .map(|s| Duration::from_secs(s.into_inner()))
                .unwrap_or(defaults.http_timeout),
            user_agent: take(partial.user_agent, defaults.user_agent),
        }
    }

    fn convert_units(partial: PartialUnitsConfig) -> UnitsConfig {
        let defaults = UnitsConfig::default();
        UnitsConfig {
            temperature: take(partial.temperature, defaults.temperature),
            pellet_quantity: take(partial.pellet_quantity, defaults.pellet_quantity),
        }
    }

    fn convert_devices(
        partial: Option<Located<Vec<PartialDevice>>>,
        source: &Option<Arc<SourceInfo>>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Vec<DeviceConfig> {
        let Some(partial) = partial.filter(|d| !d.is_empty()) else {
            diagnostics.push(Diagnostic::Error(Error::Validation(ValidationError {
                field_path: "devices".to_string(),
                message: "at least one [[devices]] entry is required".to_string(),
                span: None,
                source: source.clone(),
            })));
            return Vec::new();
        };

        let mut devices = Vec::new();
        let mut hostnames = HashSet::new();

        for (idx, device) in partial.into_inner().into_iter().enumerate() {
            let name = Self::required_device_field(idx, "name", device.name, diagnostics);
            let hostname = Self::required_device_field(idx, "hostname", device.hostname, diagnostics);

            if let Some(hostname) = &hostname {
                if !hostnames.insert(hostname.get_ref().clone()) {
                    diagnostics.push(validation_error(
                        format!("devices[{}].hostname", idx),
                        format!("hostname '{}' is declared more than once", hostname.get_ref()),
                        Some(hostname),
                    ));
                }
            }

            if let (Some(name), Some(hostname)) = (name, hostname) {
                devices.push(DeviceConfig {
                    name: name.into_inner(),
                    hostname: hostname.into_inner(),
                });
            }
        }

        devices
    }

    fn required_device_field(
        idx: usize,
        field: &str,
        value: Option<Located<String>>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Option<Located<String>> {
        let field_path = format!("devices[{}].{}", idx, field);
        match value {
            None => {
                diagnostics.push(validation_error::<String>(
                    field_path,
                    format!("{} is required", field),
                    None,
                ));
                None
            }
            Some(v) if v.trim().is_empty() => {
                diagnostics.push(validation_error(field_path, "must not be empty", Some(&v)));
                None
            }
            Some(v) => Some(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    const ONE_DEVICE: &str = r#"
[[devices]]
name = "Living Room"
hostname = "10.0.0.5"
"#;

    #[test]
    fn test_defaults_apply_to_minimal_config() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "default.toml", ONE_DEVICE);

        let (config, diagnostics) = Config::from_files(&[path]).unwrap();
        assert!(diagnostics.is_empty());

        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.mqtt.host, "127.0.0.1");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.discovery_prefix, "homeassistant");
        assert_eq!(config.mqtt.state_prefix, "palazzetti/state");
        assert_eq!(config.mqtt.command_prefix, "palazzetti/command");
        assert_eq!(config.mqtt.reset_topic, "palazzetti/reset");
        assert_eq!(config.polling.refresh_delays, vec![3.0, 5.0, 10.0, 30.0]);
        assert_eq!(config.polling.refresh_delay_randomness, 2.0);
        assert_eq!(config.polling.retries, 1);
        assert_eq!(config.units.temperature, "°C");
        assert_eq!(config.units.pellet_quantity, "kg");
        assert_eq!(
            config.devices,
            vec![DeviceConfig {
                name: "Living Room".to_string(),
                hostname: "10.0.0.5".to_string(),
            }]
        );
    }

    #[test]
    fn test_shipped_defaults_file() {
        let defaults = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config/default.toml");
        let dir = TempDir::new().unwrap();
        let local = write(&dir, "local.toml", ONE_DEVICE);

        let (config, diagnostics) = Config::load(&defaults, Some(&local)).unwrap();
        assert!(diagnostics.is_empty());
        assert_eq!(config.mqtt.client_name, "pelletd");
        assert_eq!(config.polling.http_timeout, Duration::from_secs(10));
        assert_eq!(config.logging.overrides.get("rumqttc"), Some(&LogLevel::Warn));
        assert_eq!(config.devices.len(), 1);
    }

    #[test]
    fn test_local_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let defaults = write(
            &dir,
            "default.toml",
            &format!(
                "{}\n[mqtt]\nhost = \"127.0.0.1\"\nport = 1883\n\n[polling]\nrefresh_delays = [3, 5, 10, 30]\n",
                ONE_DEVICE
            ),
        );
        let local = write(
            &dir,
            "local.toml",
            r#"
[mqtt]
host = "broker.lan"
username = "stove"
password = "secret"

[polling]
refresh_delays = [1, 2]
"#,
        );

        let (config, diagnostics) = Config::load(&defaults, Some(&local)).unwrap();
        assert!(diagnostics.is_empty(), "{}", diagnostics);
        assert_eq!(config.mqtt.host, "broker.lan");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.username.as_deref(), Some("stove"));
        assert_eq!(config.mqtt.password.as_deref(), Some("secret"));
        assert_eq!(config.polling.refresh_delays, vec![1.0, 2.0]);
        assert_eq!(config.devices.len(), 1);
    }

    #[test]
    fn test_missing_local_file_is_a_warning() {
        let dir = TempDir::new().unwrap();
        let defaults = write(&dir, "default.toml", ONE_DEVICE);
        let local = dir.path().join("local.toml");

        let (config, diagnostics) = Config::load(&defaults, Some(&local)).unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics.0[0].is_warning());
        assert_eq!(config.devices.len(), 1);
    }

    #[test]
    fn test_missing_defaults_file_is_fatal() {
        let missing = PathBuf::from("/nonexistent/default.toml");

        let result = Config::load(&missing, None);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Failed to read"), "{}", err);
        assert!(err.contains("/nonexistent/default.toml"), "{}", err);
    }

    #[test]
    fn test_unparsable_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "default.toml", "[mqtt\nhost = ");

        let err = Config::from_files(&[path]).unwrap_err();
        assert!(err.has_errors());
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn test_no_devices_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "default.toml", "[mqtt]\nhost = \"broker.lan\"\n");

        let err = Config::from_files(&[path]).unwrap_err().to_string();
        assert!(err.contains("devices"), "{}", err);
    }

    #[test]
    fn test_empty_file_warns_and_fails_without_devices() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "default.toml", "");

        let err = Config::from_files(&[path]).unwrap_err();
        assert_eq!(err.len(), 2);
        assert!(err.0[0].is_warning());
        assert!(err.0[1].is_error());
    }

    #[test]
    fn test_invalid_values_reported_together() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "default.toml",
            r#"
[mqtt]
state_prefix = ""
password = "secret"

[polling]
refresh_delays = []
refresh_delay_randomness = -1

[[devices]]
name = "Living Room"
hostname = "10.0.0.5"

[[devices]]
name = "Kitchen"
hostname = "10.0.0.5"

[[devices]]
hostname = "10.0.0.7"
"#,
        );

        let err = Config::from_files(&[path]).unwrap_err();
        let rendered = err.to_string();
        assert_eq!(err.len(), 6, "{}", rendered);
        assert!(rendered.contains("mqtt.state_prefix"));
        assert!(rendered.contains("mqtt.password"));
        assert!(rendered.contains("polling.refresh_delays"));
        assert!(rendered.contains("polling.refresh_delay_randomness"));
        assert!(rendered.contains("devices[1].hostname"));
        assert!(rendered.contains("devices[2].name"));
    }

    #[test]
    fn test_logging_section() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "default.toml",
            &format!(
                "{}\n[logging]\nlevel = \"debug\"\n\n[logging.overrides]\n\"rumqttc\" = \"warn\"\n",
                ONE_DEVICE
            ),
        );

        let (config, _) = Config::from_files(&[path]).unwrap();
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.overrides.get("rumqttc"), Some(&LogLevel::Warn));

        let targets = config.logging.targets();
        assert!(targets.would_enable("pelletd::engine", &tracing::Level::DEBUG));
        assert!(!targets.would_enable("rumqttc::eventloop", &tracing::Level::INFO));
        assert!(targets.would_enable("rumqttc::eventloop", &tracing::Level::WARN));
    }
}
