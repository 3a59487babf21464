// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading for CCB experiments.
//!
//! # Loading Pipeline
//!
//! 1. Read the file; the format follows the extension
//! 2. Resolve `${VAR}` / `${VAR:default}` placeholders in the raw text
//! 3. Parse YAML, TOML or JSON into [`ExperimentConfig`]
//! 4. Apply environment variable overrides
//! 5. Validate
//!
//! # Environment Variable Override
//!
//! ```text
//! CCB_LOG_LEVEL=debug
//! CCB_LOG_FORMAT=json
//! CCB_EXPERIMENT_NAME=bench-2
//! ```

use std::env;
use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::schema::ExperimentConfig;

// =============================================================================
// ConfigLoader
// =============================================================================

/// Loads experiment configuration files.
///
/// # Examples
///
/// ```no_run
/// use ccb_config::loader::ConfigLoader;
///
/// let config = ConfigLoader::new().load("experiment.yaml").unwrap();
/// println!("{} devices", config.devices.len());
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Environment variable prefix.
    env_prefix: String,

    /// Whether to resolve placeholders and apply overrides.
    resolve_env_vars: bool,
}

impl ConfigLoader {
    /// Creates a loader with the `CCB` prefix and environment resolution on.
    pub fn new() -> Self {
        Self {
            env_prefix: crate::DEFAULT_ENV_PREFIX.to_string(),
            resolve_env_vars: true,
        }
    }

    /// Sets the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables environment variable resolution.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Loads and validates a configuration file.
    ///
    /// The format is determined by the file extension: `.yaml`/`.yml`,
    /// `.toml` or `.json`.
    pub fn load(&self, path: impl AsRef<Path>) -> ConfigResult<ExperimentConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let format = ConfigFormat::from_path(path)?;
        let content = self.read_file(path)?;
        let mut config = self.parse_content(&content, format).map_err(|e| match e {
            ConfigError::Serialization { message } => ConfigError::parse(path, message),
            other => other,
        })?;

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }
        config.validate()?;

        info!(
            experiment = %config.experiment.name,
            devices = config.devices.len(),
            "Configuration loaded"
        );
        for device in &config.devices {
            debug!(
                device = %device.name,
                protocol = device.protocol.protocol_type(),
                target = %device.protocol.target(),
                "Configured device"
            );
        }
        Ok(config)
    }

    /// Parses and validates configuration text.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<ExperimentConfig> {
        let mut config = self.parse_content(content, format)?;
        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn read_file(&self, path: &Path) -> ConfigResult<String> {
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))
    }

    fn parse_content(&self, content: &str, format: ConfigFormat) -> ConfigResult<ExperimentConfig> {
        let content = if self.resolve_env_vars {
            resolve_env_placeholders(content)
        } else {
            content.to_string()
        };
        format.parse(&content)
    }

    fn apply_env_overrides(&self, config: &mut ExperimentConfig) -> ConfigResult<()> {
        let name = format!("{}_EXPERIMENT_NAME", self.env_prefix);
        if let Ok(value) = env::var(&name) {
            debug!(variable = %name, "Overriding experiment name");
            config.experiment.name = value;
        }

        let name = format!("{}_LOG_LEVEL", self.env_prefix);
        if let Ok(value) = env::var(&name) {
            config.logging.level = value
                .parse()
                .map_err(|e: String| ConfigError::invalid_env_var(&name, e))?;
        }

        let name = format!("{}_LOG_FORMAT", self.env_prefix);
        if let Ok(value) = env::var(&name) {
            config.logging.format = value
                .parse()
                .map_err(|e: String| ConfigError::invalid_env_var(&name, e))?;
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Replaces `${VAR}` and `${VAR:default}` with environment values.
///
/// An unset variable without default keeps its placeholder. An unclosed
/// `${` is copied verbatim.
pub fn resolve_env_placeholders(content: &str) -> String {
    let mut result = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' || chars.peek() != Some(&'{') {
            result.push(c);
            continue;
        }
        chars.next();

        let mut var_content = String::new();
        let mut found_close = false;
        for c in chars.by_ref() {
            if c == '}' {
                found_close = true;
                break;
            }
            var_content.push(c);
        }

        if !found_close {
            result.push_str("${");
            result.push_str(&var_content);
            continue;
        }

        let (var_name, default_value) = match var_content.split_once(':') {
            Some((name, default)) => (name, Some(default)),
            None => (var_content.as_str(), None),
        };

        match (env::var(var_name), default_value) {
            (Ok(value), _) => result.push_str(&value),
            (Err(_), Some(default)) => result.push_str(default),
            (Err(_), None) => {
                warn!("Environment variable '{}' not found", var_name);
                result.push_str(&format!("${{{}}}", var_name));
            }
        }
    }

    result
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
    /// JSON format.
    Json,
}

impl ConfigFormat {
    /// Determines the format from a file path.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            Some(other) => Err(ConfigError::unsupported_format(other)),
            None => Err(ConfigError::unsupported_format("(no extension)")),
        }
    }

    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yaml",
            ConfigFormat::Toml => "toml",
            ConfigFormat::Json => "json",
        }
    }

    /// Parses `content` in this format.
    pub fn parse(&self, content: &str) -> ConfigResult<ExperimentConfig> {
        match self {
            ConfigFormat::Yaml => {
                serde_yaml::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
            }
            ConfigFormat::Toml => {
                toml::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
            }
            ConfigFormat::Json => {
                serde_json::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
            }
        }
    }

    /// Serializes `config` in this format.
    pub fn render(&self, config: &ExperimentConfig) -> ConfigResult<String> {
        match self {
            ConfigFormat::Yaml => {
                serde_yaml::to_string(config).map_err(|e| ConfigError::serialization(e.to_string()))
            }
            ConfigFormat::Toml => {
                toml::to_string_pretty(config).map_err(|e| ConfigError::serialization(e.to_string()))
            }
            ConfigFormat::Json => serde_json::to_string_pretty(config)
                .map_err(|e| ConfigError::serialization(e.to_string())),
        }
    }
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Loads a configuration file with the default loader.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<ExperimentConfig> {
    ConfigLoader::new().load(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{LogFormat, LogLevel, ProtocolConfig};
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    const YAML: &str = r#"
experiment:
  name: bench-1
logging:
  level: debug
devices:
  - name: laser
    protocol: serial
    port: /dev/ttyUSB0
    baudrate: 19200
    parity: E
    stopbits: 1.5
  - name: plc
    protocol: opcua
    host: 10.0.0.5
    wait_timeout_retry: 250ms
  - name: psu
    protocol: visa
    host: 10.0.0.7
    poll_interval: 1s
  - name: pump
    protocol: modbus_tcp
    host: 10.0.0.8
    unit: 3
"#;

    fn loader() -> ConfigLoader {
        ConfigLoader::new().with_env_prefix("CCB_LOADER_TEST")
    }

    #[test]
    fn test_load_yaml() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let config = loader().load(file.path()).unwrap();
        assert_eq!(config.experiment.name, "bench-1");
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.device_names(), vec!["laser", "plc", "psu", "pump"]);

        match &config.get_device("laser").unwrap().protocol {
            ProtocolConfig::Serial(serial) => {
                assert_eq!(serial.baudrate, 19200);
                assert_eq!(serial.framing(), "8E1.5");
            }
            other => panic!("unexpected protocol: {other:?}"),
        }
        match &config.get_device("plc").unwrap().protocol {
            ProtocolConfig::OpcUa(opcua) => {
                assert_eq!(opcua.wait_timeout_retry, Duration::from_millis(250))
            }
            other => panic!("unexpected protocol: {other:?}"),
        }
        match &config.get_device("psu").unwrap().protocol {
            ProtocolConfig::Visa(visa) => assert_eq!(visa.poll_interval, Duration::from_secs(1)),
            other => panic!("unexpected protocol: {other:?}"),
        }
        match &config.get_device("pump").unwrap().protocol {
            ProtocolConfig::ModbusTcp(modbus) => assert_eq!(modbus.unit_id, 3),
            other => panic!("unexpected protocol: {other:?}"),
        }
    }

    #[test]
    fn test_load_toml() {
        let toml = r#"
[experiment]
name = "bench-toml"

[[devices]]
name = "pump"
protocol = "modbus_tcp"
host = "10.0.0.8"
operation_timeout = "1s"
"#;
        let config = loader().load_from_str(toml, ConfigFormat::Toml).unwrap();
        assert_eq!(config.experiment.name, "bench-toml");
        assert_eq!(config.devices[0].protocol.target(), "10.0.0.8:502");
    }

    #[test]
    fn test_config_format_from_path() {
        assert_eq!(
            ConfigFormat::from_path(Path::new("a.yml")).unwrap(),
            ConfigFormat::Yaml
        );
        assert_eq!(
            ConfigFormat::from_path(Path::new("a.JSON")).unwrap(),
            ConfigFormat::Json
        );
        assert!(ConfigFormat::from_path(Path::new("config.txt")).is_err());
        assert!(ConfigFormat::from_path(Path::new("config")).is_err());
    }

    #[test]
    fn test_env_placeholder_with_default() {
        let result = resolve_env_placeholders("host: ${CCB_LOADER_TEST_UNSET_HOST:10.0.0.1}");
        assert_eq!(result, "host: 10.0.0.1");
    }

    #[test]
    fn test_env_placeholder_unset_and_unclosed() {
        assert_eq!(
            resolve_env_placeholders("x: ${CCB_LOADER_TEST_UNSET_VAR}"),
            "x: ${CCB_LOADER_TEST_UNSET_VAR}"
        );
        assert_eq!(resolve_env_placeholders("x: ${open"), "x: ${open");
        assert_eq!(resolve_env_placeholders("cost: $5"), "cost: $5");
    }

    #[test]
    fn test_env_override() {
        env::set_var("CCB_LOADER_OVERRIDE_EXPERIMENT_NAME", "overridden");
        env::set_var("CCB_LOADER_OVERRIDE_LOG_LEVEL", "warn");
        let config = ConfigLoader::new()
            .with_env_prefix("CCB_LOADER_OVERRIDE")
            .load_from_str("experiment: { name: original }\n", ConfigFormat::Yaml)
            .unwrap();
        env::remove_var("CCB_LOADER_OVERRIDE_EXPERIMENT_NAME");
        env::remove_var("CCB_LOADER_OVERRIDE_LOG_LEVEL");

        assert_eq!(config.experiment.name, "overridden");
        assert_eq!(config.logging.level, LogLevel::Warn);
    }

    #[test]
    fn test_invalid_env_override() {
        env::set_var("CCB_LOADER_BAD_LOG_LEVEL", "loud");
        let result = ConfigLoader::new()
            .with_env_prefix("CCB_LOADER_BAD")
            .load_from_str("{}", ConfigFormat::Json);
        env::remove_var("CCB_LOADER_BAD_LOG_LEVEL");
        assert!(matches!(result, Err(ConfigError::InvalidEnvVar { .. })));
    }

    #[test]
    fn test_file_not_found() {
        let result = loader().load("/nonexistent/experiment.yaml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_parse_error_names_file() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        file.write_all(b"{ not json").unwrap();
        match loader().load(file.path()) {
            Err(ConfigError::Parse { path, .. }) => assert_eq!(path, file.path()),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_protocol_rejected() {
        let yaml = "devices:\n  - name: x\n    protocol: gpib\n    host: h\n";
        assert!(loader().load_from_str(yaml, ConfigFormat::Yaml).is_err());
    }
}
