// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! VISA resource and polling configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use ccb_core::ConfigurationError;
use serde::{Deserialize, Serialize};

// =============================================================================
// InterfaceType
// =============================================================================

/// VISA interface type of the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceType {
    /// Raw SCPI over a TCP socket (`TCPIP::host::port::SOCKET`).
    #[default]
    TcpipSocket,
    /// VXI-11 / HiSLIP instrument (`TCPIP::host::INSTR`).
    TcpipInstr,
}

impl InterfaceType {
    /// Returns the configuration spelling.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TcpipSocket => "tcpip_socket",
            Self::TcpipInstr => "tcpip_instr",
        }
    }
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterfaceType {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "tcpip_socket" | "socket" => Ok(Self::TcpipSocket),
            "tcpip_instr" | "instr" => Ok(Self::TcpipInstr),
            other => Err(ConfigurationError::invalid(
                "interface",
                format!("unknown VISA interface '{other}'"),
            )),
        }
    }
}

// =============================================================================
// VisaConfig
// =============================================================================

fn default_port() -> u16 {
    5025
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_open_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_termination() -> String {
    "\n".to_string()
}

/// VISA communication settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisaConfig {
    /// Interface type (default: `tcpip_socket`).
    #[serde(default)]
    pub interface: InterfaceType,

    /// Instrument host name or IP address.
    pub host: String,

    /// TCP port of a socket resource (default: 5025).
    #[serde(default = "default_port")]
    pub port: u16,

    /// VISA board number (default: 0).
    #[serde(default)]
    pub board: u16,

    /// I/O timeout of a single read or write (default: 5s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Timeout for opening the resource (default: 1s).
    #[serde(default = "default_open_timeout", with = "humantime_serde")]
    pub open_timeout: Duration,

    /// Appended to every written message (default: `\n`).
    #[serde(default = "default_termination")]
    pub write_termination: String,

    /// Ends every read message (default: `\n`).
    #[serde(default = "default_termination")]
    pub read_termination: String,
}

impl VisaConfig {
    /// Creates a socket configuration with default settings.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            interface: InterfaceType::default(),
            host: host.into(),
            port: default_port(),
            board: 0,
            timeout: default_timeout(),
            open_timeout: default_open_timeout(),
            write_termination: default_termination(),
            read_termination: default_termination(),
        }
    }

    /// Creates a builder.
    pub fn builder() -> VisaConfigBuilder {
        VisaConfigBuilder::default()
    }

    /// VISA resource string, e.g. `TCPIP0::10.0.0.7::5025::SOCKET`.
    pub fn resource(&self) -> String {
        match self.interface {
            InterfaceType::TcpipSocket => {
                format!("TCPIP{}::{}::{}::SOCKET", self.board, self.host, self.port)
            }
            InterfaceType::TcpipInstr => format!("TCPIP{}::{}::INSTR", self.board, self.host),
        }
    }

    /// `host:port` of a socket resource.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.host.trim().is_empty() {
            return Err(ConfigurationError::invalid("host", "host cannot be empty"));
        }
        if self.interface == InterfaceType::TcpipSocket && self.port == 0 {
            return Err(ConfigurationError::invalid("port", "port cannot be 0"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigurationError::invalid(
                "timeout",
                "timeout must be greater than zero",
            ));
        }
        if self.open_timeout.is_zero() {
            return Err(ConfigurationError::invalid(
                "open_timeout",
                "open timeout must be greater than zero",
            ));
        }
        if self.read_termination.is_empty() {
            return Err(ConfigurationError::invalid(
                "read_termination",
                "read termination cannot be empty",
            ));
        }
        Ok(())
    }
}

/// Builder for [`VisaConfig`].
#[derive(Debug, Default)]
pub struct VisaConfigBuilder {
    interface: Option<InterfaceType>,
    host: Option<String>,
    port: Option<u16>,
    board: Option<u16>,
    timeout: Option<Duration>,
    open_timeout: Option<Duration>,
    write_termination: Option<String>,
    read_termination: Option<String>,
}

impl VisaConfigBuilder {
    /// Sets the interface type.
    pub fn interface(mut self, interface: InterfaceType) -> Self {
        self.interface = Some(interface);
        self
    }

    /// Sets the instrument host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the socket port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the board number.
    pub fn board(mut self, board: u16) -> Self {
        self.board = Some(board);
        self
    }

    /// Sets the I/O timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the open timeout.
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = Some(timeout);
        self
    }

    /// Sets the write termination.
    pub fn write_termination(mut self, termination: impl Into<String>) -> Self {
        self.write_termination = Some(termination.into());
        self
    }

    /// Sets the read termination.
    pub fn read_termination(mut self, termination: impl Into<String>) -> Self {
        self.read_termination = Some(termination.into());
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> Result<VisaConfig, ConfigurationError> {
        let host = self.host.ok_or_else(|| ConfigurationError::missing("host"))?;

        let config = VisaConfig {
            interface: self.interface.unwrap_or_default(),
            host,
            port: self.port.unwrap_or_else(default_port),
            board: self.board.unwrap_or_default(),
            timeout: self.timeout.unwrap_or_else(default_timeout),
            open_timeout: self.open_timeout.unwrap_or_else(default_open_timeout),
            write_termination: self.write_termination.unwrap_or_else(default_termination),
            read_termination: self.read_termination.unwrap_or_else(default_termination),
        };

        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// VisaDeviceConfig
// =============================================================================

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_poll_start_delay() -> Duration {
    Duration::from_secs(2)
}

/// Settings of a [`VisaDevice`](crate::VisaDevice): the communication plus
/// its status polling cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisaDeviceConfig {
    /// Communication settings.
    #[serde(flatten)]
    pub com: VisaConfig,

    /// Interval of the status byte poll (default: 500ms).
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Delay between start and the first poll (default: 2s).
    #[serde(default = "default_poll_start_delay", with = "humantime_serde")]
    pub poll_start_delay: Duration,
}

impl VisaDeviceConfig {
    /// Wraps a communication configuration with default polling settings.
    pub fn new(com: VisaConfig) -> Self {
        Self {
            com,
            poll_interval: default_poll_interval(),
            poll_start_delay: default_poll_start_delay(),
        }
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the delay before the first poll.
    pub fn with_poll_start_delay(mut self, delay: Duration) -> Self {
        self.poll_start_delay = delay;
        self
    }

    /// Validates the communication and polling settings.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.com.validate()?;
        if self.poll_interval.is_zero() {
            return Err(ConfigurationError::invalid(
                "poll_interval",
                "poll interval must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_strings() {
        let socket = VisaConfig::builder().host("10.0.0.7").build().unwrap();
        assert_eq!(socket.resource(), "TCPIP0::10.0.0.7::5025::SOCKET");

        let instr = VisaConfig::builder()
            .host("scope")
            .interface(InterfaceType::TcpipInstr)
            .board(1)
            .build()
            .unwrap();
        assert_eq!(instr.resource(), "TCPIP1::scope::INSTR");
    }

    #[test]
    fn test_defaults() {
        let config = VisaConfig::new("psu");
        assert_eq!(config.port, 5025);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.open_timeout, Duration::from_secs(1));
        assert_eq!(config.write_termination, "\n");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(VisaConfig::builder().build().is_err());
        assert!(VisaConfig::builder()
            .host("psu")
            .read_termination("")
            .build()
            .is_err());
        assert!(VisaDeviceConfig::new(VisaConfig::new("psu"))
            .with_poll_interval(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_interface_spellings() {
        assert_eq!(
            "TCPIP-SOCKET".parse::<InterfaceType>().unwrap(),
            InterfaceType::TcpipSocket
        );
        assert_eq!("instr".parse::<InterfaceType>().unwrap(), InterfaceType::TcpipInstr);
        assert!("gpib".parse::<InterfaceType>().is_err());
    }

    #[test]
    fn test_device_config_deserialize() {
        let yaml = "host: 10.0.0.7\ninterface: tcpip_instr\npoll_interval: 250ms\n";
        let config: VisaDeviceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.com.interface, InterfaceType::TcpipInstr);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.poll_start_delay, Duration::from_secs(2));
    }
}
