// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Modbus/TCP configuration.

use std::time::Duration;

use ccb_core::ConfigurationError;
use serde::{Deserialize, Serialize};

fn default_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_operation_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_tcp_nodelay() -> bool {
    true
}

/// Modbus TCP connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModbusTcpConfig {
    /// Host address (IP or hostname).
    pub host: String,

    /// TCP port (default: 502).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Unit/slave ID (default: 1).
    #[serde(default = "default_unit_id", alias = "unit")]
    pub unit_id: u8,

    /// Connection timeout (default: 5s).
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Per-request timeout (default: 3s).
    #[serde(default = "default_operation_timeout", with = "humantime_serde")]
    pub operation_timeout: Duration,

    /// Enable TCP_NODELAY (default: true).
    #[serde(default = "default_tcp_nodelay")]
    pub tcp_nodelay: bool,

    /// Holding register read by `is_open()` to verify the connection.
    ///
    /// Without it `is_open()` only reports whether a connection exists.
    #[serde(default)]
    pub probe_register: Option<u16>,
}

impl ModbusTcpConfig {
    /// Creates a configuration with default settings.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            unit_id: default_unit_id(),
            connect_timeout: default_connect_timeout(),
            operation_timeout: default_operation_timeout(),
            tcp_nodelay: default_tcp_nodelay(),
            probe_register: None,
        }
    }

    /// Creates a builder.
    pub fn builder() -> ModbusTcpConfigBuilder {
        ModbusTcpConfigBuilder::default()
    }

    /// Returns the `host:port` address.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.host.trim().is_empty() {
            return Err(ConfigurationError::invalid("host", "host cannot be empty"));
        }
        if self.port == 0 {
            return Err(ConfigurationError::invalid("port", "port cannot be 0"));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigurationError::invalid(
                "connect_timeout",
                "timeout must be greater than zero",
            ));
        }
        if self.operation_timeout.is_zero() {
            return Err(ConfigurationError::invalid(
                "operation_timeout",
                "timeout must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Builder for [`ModbusTcpConfig`].
#[derive(Debug, Default)]
pub struct ModbusTcpConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    unit_id: Option<u8>,
    connect_timeout: Option<Duration>,
    operation_timeout: Option<Duration>,
    tcp_nodelay: Option<bool>,
    probe_register: Option<u16>,
}

impl ModbusTcpConfigBuilder {
    /// Sets the host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the unit ID.
    pub fn unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = Some(unit_id);
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the per-request timeout.
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Sets TCP_NODELAY.
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = Some(enabled);
        self
    }

    /// Sets the liveness probe register.
    pub fn probe_register(mut self, address: u16) -> Self {
        self.probe_register = Some(address);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> Result<ModbusTcpConfig, ConfigurationError> {
        let host = self.host.ok_or_else(|| ConfigurationError::missing("host"))?;

        let config = ModbusTcpConfig {
            host,
            port: self.port.unwrap_or_else(default_port),
            unit_id: self.unit_id.unwrap_or_else(default_unit_id),
            connect_timeout: self.connect_timeout.unwrap_or_else(default_connect_timeout),
            operation_timeout: self
                .operation_timeout
                .unwrap_or_else(default_operation_timeout),
            tcp_nodelay: self.tcp_nodelay.unwrap_or_else(default_tcp_nodelay),
            probe_register: self.probe_register,
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ModbusTcpConfig::builder().host("10.0.0.2").build().unwrap();
        assert_eq!(config.port, 502);
        assert_eq!(config.unit_id, 1);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.operation_timeout, Duration::from_secs(3));
        assert_eq!(config.probe_register, None);
        assert_eq!(config.socket_addr(), "10.0.0.2:502");
    }

    #[test]
    fn test_validation() {
        assert!(ModbusTcpConfig::builder().build().is_err());
        assert!(ModbusTcpConfig::builder().host(" ").build().is_err());
        assert!(ModbusTcpConfig::builder().host("plc").port(0).build().is_err());
    }

    #[test]
    fn test_deserialize() {
        let json = r#"{"host": "plc.local", "unit": 7, "operation_timeout": "750ms", "probe_register": 40}"#;
        let config: ModbusTcpConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.unit_id, 7);
        assert_eq!(config.operation_timeout, Duration::from_millis(750));
        assert_eq!(config.probe_register, Some(40));
        assert_eq!(config.port, 502);
    }
}
