use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use super::diagnostics::{Diagnostic, LoadError, SourceInfo, Warning};
use super::located::Located;
use super::LogLevel;

#[derive(Debug, Default, Deserialize)]
pub struct PartialConfig {
    pub logging: Option<PartialLoggingConfig>,
    pub mqtt: Option<PartialMqttConfig>,
    pub polling: Option<PartialPollingConfig>,
    pub units: Option<PartialUnitsConfig>,
    pub devices: Option<Located<Vec<PartialDevice>>>,

    /// Source information for error reporting (not serialized)
    #[serde(skip)]
    pub source: Option<Arc<SourceInfo>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialLoggingConfig {
    pub level: Option<Located<LogLevel>>,
    pub overrides: Option<HashMap<String, Located<LogLevel>>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialMqttConfig {
    pub host: Option<Located<String>>,
    pub port: Option<Located<u16>>,
    pub client_name: Option<Located<String>>,
    pub username: Option<Located<String>>,
    pub password: Option<Located<String>>,
    pub discovery_prefix: Option<Located<String>>,
    pub state_prefix: Option<Located<String>>,
    pub command_prefix: Option<Located<String>>,
    pub reset_topic: Option<Located<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialPollingConfig {
    pub refresh_delays: Option<Located<Vec<f64>>>,
    pub refresh_delay_randomness: Option<Located<f64>>,
    pub retry_delays: Option<Located<Vec<f64>>>,
    pub retry_delay_randomness: Option<Located<f64>>,
    pub retries: Option<Located<u32>>,
    pub http_timeout_secs: Option<Located<u64>>,
    pub user_agent: Option<Located<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialUnitsConfig {
    pub temperature: Option<Located<String>>,
    pub pellet_quantity: Option<Located<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialDevice {
    pub name: Option<Located<String>>,
    pub hostname: Option<Located<String>>,
}

/// Attach the originating file to every located value after parsing
trait AttachSource {
    fn attach_source(&mut self, source: &Arc<SourceInfo>);
}

impl<T> AttachSource for Located<T> {
    fn attach_source(&mut self, source: &Arc<SourceInfo>) {
        self.set_source(source);
    }
}

impl<T: AttachSource> AttachSource for Option<T> {
    fn attach_source(&mut self, source: &Arc<SourceInfo>) {
        if let Some(inner) = self {
            inner.attach_source(source);
        }
    }
}

impl AttachSource for PartialLoggingConfig {
    fn attach_source(&mut self, source: &Arc<SourceInfo>) {
        self.level.attach_source(source);
        if let Some(overrides) = &mut self.overrides {
            for level in overrides.values_mut() {
                level.attach_source(source);
            }
        }
    }
}

impl AttachSource for PartialMqttConfig {
    fn attach_source(&mut self, source: &Arc<SourceInfo>) {
        self.host.attach_source(source);
        self.port.attach_source(source);
        self.client_name.attach_source(source);
        self.username.attach_source(source);
        self.password.attach_source(source);
        self.discovery_prefix.attach_source(source);
        self.state_prefix.attach_source(source);
        self.command_prefix.attach_source(source);
        self.reset_topic.attach_source(source);
    }
}

impl AttachSource for PartialPollingConfig {
    fn attach_source(&mut self, source: &Arc<SourceInfo>) {
        self.refresh_delays.attach_source(source);
        self.refresh_delay_randomness.attach_source(source);
        self.retry_delays.attach_source(source);
        self.retry_delay_randomness.attach_source(source);
        self.retries.attach_source(source);
        self.http_timeout_secs.attach_source(source);
        self.user_agent.attach_source(source);
    }
}

impl AttachSource for PartialUnitsConfig {
    fn attach_source(&mut self, source: &Arc<SourceInfo>) {
        self.temperature.attach_source(source);
        self.pellet_quantity.attach_source(source);
    }
}

impl AttachSource for PartialDevice {
    fn attach_source(&mut self, source: &Arc<SourceInfo>) {
        self.name.attach_source(source);
        self.hostname.attach_source(source);
    }
}

/// Replace `base` with `layer` when the layer sets a value
fn overlay<T>(base: &mut Option<T>, layer: Option<T>) {
    if layer.is_some() {
        *base = layer;
    }
}

impl PartialLoggingConfig {
    fn overlay(&mut self, layer: Self) {
        overlay(&mut self.level, layer.level);
        if let Some(overrides) = layer.overrides {
            self.overrides.get_or_insert_with(HashMap::new).extend(overrides);
        }
    }
}

impl PartialMqttConfig {
    fn overlay(&mut self, layer: Self) {
        overlay(&mut self.host, layer.host);
        overlay(&mut self.port, layer.port);
        overlay(&mut self.client_name, layer.client_name);
        overlay(&mut self.username, layer.username);
        overlay(&mut self.password, layer.password);
        overlay(&mut self.discovery_prefix, layer.discovery_prefix);
        overlay(&mut self.state_prefix, layer.state_prefix);
        overlay(&mut self.command_prefix, layer.command_prefix);
        overlay(&mut self.reset_topic, layer.reset_topic);
    }
}

impl PartialPollingConfig {
    fn overlay(&mut self, layer: Self) {
        overlay(&mut self.refresh_delays, layer.refresh_delays);
        overlay(&mut self.refresh_delay_randomness, layer.refresh_delay_randomness);
        overlay(&mut self.retry_delays, layer.retry_delays);
        overlay(&mut self.retry_delay_randomness, layer.retry_delay_randomness);
        overlay(&mut self.retries, layer.retries);
        overlay(&mut self.http_timeout_secs, layer.http_timeout_secs);
        overlay(&mut self.user_agent, layer.user_agent);
    }
}

impl PartialUnitsConfig {
    fn overlay(&mut self, layer: Self) {
        overlay(&mut self.temperature, layer.temperature);
        overlay(&mut self.pellet_quantity, layer.pellet_quantity);
    }
}

/// Overlay a whole optional section, merging key by key when both sides have it
fn overlay_section<T>(base: &mut Option<T>, layer: Option<T>, merge: impl FnOnce(&mut T, T)) {
    let Some(layer) = layer else {
        return;
    };
    match base {
        Some(existing) => merge(existing, layer),
        None => *base = Some(layer),
    }
}

impl PartialConfig {
    /// Load a single config file
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let mut config: PartialConfig = toml::from_str(&content).map_err(|e| LoadError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let source = Arc::new(SourceInfo {
            file_path: path.to_path_buf(),
            content,
        });
        config.attach_source(&source);
        config.source = Some(source);

        Ok(config)
    }

    fn attach_source(&mut self, source: &Arc<SourceInfo>) {
        self.logging.attach_source(source);
        self.mqtt.attach_source(source);
        self.polling.attach_source(source);
        self.units.attach_source(source);
        if let Some(devices) = &mut self.devices {
            devices.set_source(source);
            for device in devices.get_mut() {
                device.attach_source(source);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.logging.is_none()
            && self.mqtt.is_none()
            && self.polling.is_none()
            && self.units.is_none()
            && self.devices.is_none()
    }

    /// Merge layered partial configs
    ///
    /// Later layers override earlier ones key by key; list values such as
    /// `devices` are replaced as a whole. Empty layers produce a warning.
    pub fn merge<I>(layers: I) -> (Self, Vec<Diagnostic>)
    where
        I: IntoIterator<Item = Self>,
    {
        let mut result = PartialConfig::default();
        let mut diagnostics = Vec::new();

        for layer in layers {
            if layer.is_empty() {
                if let Some(source) = &layer.source {
                    diagnostics.push(Diagnostic::Warning(Warning::EmptyConfig {
                        file_path: source.file_path.clone(),
                    }));
                }
            }

            overlay_section(&mut result.logging, layer.logging, PartialLoggingConfig::overlay);
            overlay_section(&mut result.mqtt, layer.mqtt, PartialMqttConfig::overlay);
            overlay_section(&mut result.polling, layer.polling, PartialPollingConfig::overlay);
            overlay_section(&mut result.units, layer.units, PartialUnitsConfig::overlay);
            overlay(&mut result.devices, layer.devices);
            overlay(&mut result.source, layer.source);
        }

        (result, diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> PartialConfig {
        toml::from_str(content).unwrap()
    }

    #[test]
    fn test_override_wins_per_key() {
        let defaults = parse(
            r#"
[mqtt]
host = "127.0.0.1"
port = 1883
"#,
        );
        let local = parse(
            r#"
[mqtt]
host = "broker.lan"
"#,
        );

        let (merged, diagnostics) = PartialConfig::merge([defaults, local]);
        assert!(diagnostics.is_empty());

        let mqtt = merged.mqtt.unwrap();
        assert_eq!(mqtt.host.unwrap().into_inner(), "broker.lan");
        assert_eq!(mqtt.port.unwrap().into_inner(), 1883);
    }

    #[test]
    fn test_device_list_is_replaced() {
        let defaults = parse(
            r#"
[[devices]]
name = "Kitchen"
hostname = "10.0.0.4"

[[devices]]
name = "Hall"
hostname = "10.0.0.6"
"#,
        );
        let local = parse(
            r#"
[[devices]]
name = "Living Room"
hostname = "10.0.0.5"
"#,
        );

        let (merged, _) = PartialConfig::merge([defaults, local]);
        let devices = merged.devices.unwrap().into_inner();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name.as_ref().unwrap().get_ref(), "Living Room");
    }

    #[test]
    fn test_logging_overrides_merge_by_key() {
        let defaults = parse(
            r#"
[logging.overrides]
"rumqttc" = "warn"
"pelletd::engine" = "info"
"#,
        );
        let local = parse(
            r#"
[logging.overrides]
"pelletd::engine" = "debug"
"#,
        );

        let (merged, _) = PartialConfig::merge([defaults, local]);
        let overrides = merged.logging.unwrap().overrides.unwrap();
        assert_eq!(overrides.len(), 2);
        assert_eq!(*overrides["rumqttc"].get_ref(), LogLevel::Warn);
        assert_eq!(*overrides["pelletd::engine"].get_ref(), LogLevel::Debug);
    }

    #[test]
    fn test_section_only_in_override() {
        let defaults = parse("");
        let local = parse(
            r#"
[units]
temperature = "°F"
"#,
        );

        let (merged, _) = PartialConfig::merge([defaults, local]);
        let units = merged.units.unwrap();
        assert_eq!(units.temperature.unwrap().into_inner(), "°F");
        assert!(units.pellet_quantity.is_none());
    }

    #[test]
    fn test_spans_point_into_source() {
        let content = "[mqtt]\nhost = \"broker.lan\"\n";
        let config = parse(content);
        let host = config.mqtt.unwrap().host.unwrap();
        assert_eq!(&content[host.span().clone()], "\"broker.lan\"");
    }
}
