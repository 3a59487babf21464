// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Experiment configuration schema.
//!
//! ```yaml
//! experiment:
//!   name: bench-1
//!   stop_order: reverse
//! logging:
//!   level: info
//!   format: text
//! devices:
//!   - name: laser
//!     protocol: serial
//!     port: /dev/ttyUSB0
//!     baudrate: 19200
//!   - name: plc
//!     protocol: opcua
//!     host: 10.0.0.5
//! ```

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use ccb_core::{ConfigurationError, SequenceOrder, RESERVED_NAMES};
use ccb_modbus::ModbusTcpConfig;
use ccb_opcua::OpcUaConfig;
use ccb_serial::SerialConfig;
use ccb_visa::VisaDeviceConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

// =============================================================================
// Root
// =============================================================================

/// Root of an experiment configuration file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Experiment identification.
    #[serde(default)]
    pub experiment: ExperimentSection,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Devices in start order.
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

impl ExperimentConfig {
    /// Validates names and every device's protocol settings.
    pub fn validate(&self) -> ConfigResult<()> {
        self.experiment.validate()?;

        let mut names = HashSet::new();
        for device in &self.devices {
            device.validate()?;
            if !names.insert(device.name.as_str()) {
                return Err(ConfigError::duplicate_device(&device.name));
            }
        }
        Ok(())
    }

    /// Returns a device entry by name.
    pub fn get_device(&self, name: &str) -> Option<&DeviceEntry> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Device names in configuration order.
    pub fn device_names(&self) -> Vec<&str> {
        self.devices.iter().map(|d| d.name.as_str()).collect()
    }
}

// =============================================================================
// Experiment
// =============================================================================

fn default_experiment_name() -> String {
    "experiment".to_string()
}

/// Experiment identification and sequencing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentSection {
    /// Experiment name, used in logs.
    #[serde(default = "default_experiment_name")]
    pub name: String,

    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,

    /// Order in which devices are stopped (default: forward).
    #[serde(default)]
    pub stop_order: SequenceOrder,
}

impl Default for ExperimentSection {
    fn default() -> Self {
        Self {
            name: default_experiment_name(),
            description: None,
            stop_order: SequenceOrder::default(),
        }
    }
}

impl ExperimentSection {
    /// Validates the section.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::validation("experiment.name", "cannot be empty"));
        }
        Ok(())
    }
}

// =============================================================================
// Devices
// =============================================================================

/// One named device and its protocol settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Unique device name within the experiment.
    pub name: String,

    /// Protocol settings, tagged by `protocol`.
    #[serde(flatten)]
    pub protocol: ProtocolConfig,
}

impl DeviceEntry {
    /// Creates an entry.
    pub fn new(name: impl Into<String>, protocol: ProtocolConfig) -> Self {
        Self {
            name: name.into(),
            protocol,
        }
    }

    /// Checks the name and the protocol settings.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::validation("devices.name", "cannot be empty"));
        }
        if RESERVED_NAMES.contains(&self.name.as_str()) {
            return Err(ConfigError::validation(
                format!("devices.{}", self.name),
                "name collides with a sequence operation",
            ));
        }
        self.protocol
            .validate()
            .map_err(|e| ConfigError::invalid_device(&self.name, e))
    }
}

/// Protocol-specific device settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "snake_case")]
pub enum ProtocolConfig {
    /// Serial line.
    Serial(SerialConfig),

    /// Modbus/TCP.
    ModbusTcp(ModbusTcpConfig),

    /// OPC UA client.
    #[serde(rename = "opcua", alias = "opc_ua")]
    OpcUa(OpcUaConfig),

    /// VISA instrument with status polling.
    Visa(VisaDeviceConfig),
}

impl ProtocolConfig {
    /// Validates the protocol settings.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        match self {
            ProtocolConfig::Serial(config) => config.validate(),
            ProtocolConfig::ModbusTcp(config) => config.validate(),
            ProtocolConfig::OpcUa(config) => config.validate(),
            ProtocolConfig::Visa(config) => config.validate(),
        }
    }

    /// Returns the protocol tag.
    pub fn protocol_type(&self) -> &'static str {
        match self {
            ProtocolConfig::Serial(_) => "serial",
            ProtocolConfig::ModbusTcp(_) => "modbus_tcp",
            ProtocolConfig::OpcUa(_) => "opcua",
            ProtocolConfig::Visa(_) => "visa",
        }
    }

    /// Human readable target (port, address, URL or resource).
    pub fn target(&self) -> String {
        match self {
            ProtocolConfig::Serial(config) => config.port.clone(),
            ProtocolConfig::ModbusTcp(config) => config.socket_addr(),
            ProtocolConfig::OpcUa(config) => config.url(),
            ProtocolConfig::Visa(config) => config.com.resource(),
        }
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Log format.
    #[serde(default)]
    pub format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    #[serde(alias = "warning")]
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Returns the filter directive.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, one event per line.
    #[default]
    Text,
    /// Condensed human readable.
    Compact,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Returns the configuration spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}
