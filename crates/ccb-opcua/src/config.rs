// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA client configuration.

use std::path::PathBuf;
use std::time::Duration;

use ccb_core::ConfigurationError;
use serde::{Deserialize, Serialize};

fn default_port() -> u16 {
    4840
}

fn default_update_parameter() -> Duration {
    Duration::from_millis(500)
}

fn default_wait_timeout_retry() -> Duration {
    Duration::from_secs(1)
}

fn default_max_timeout_retry_nr() -> u32 {
    5
}

fn default_session_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_application_name() -> String {
    "ccb".to_string()
}

fn default_trust_server_certs() -> bool {
    true
}

/// OPC UA client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpcUaConfig {
    /// Server host name or IP address.
    pub host: String,

    /// Endpoint path appended to the URL (default: empty).
    #[serde(default)]
    pub endpoint_name: String,

    /// Server port (default: 4840).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Publishing and sampling interval of subscriptions (default: 500ms).
    #[serde(default = "default_update_parameter", with = "humantime_serde")]
    pub update_parameter: Duration,

    /// Pause before a timed-out operation is retried (default: 1s).
    #[serde(default = "default_wait_timeout_retry", with = "humantime_serde")]
    pub wait_timeout_retry: Duration,

    /// Retries of a timed-out operation before giving up (default: 5).
    #[serde(default = "default_max_timeout_retry_nr")]
    pub max_timeout_retry_nr: u32,

    /// Requested session timeout (default: 60s).
    #[serde(default = "default_session_timeout", with = "humantime_serde")]
    pub session_timeout: Duration,

    /// Client application name (default: "ccb").
    #[serde(default = "default_application_name")]
    pub application_name: String,

    /// Client application URI; derived from the name when unset.
    #[serde(default)]
    pub application_uri: Option<String>,

    /// PKI directory for client and trusted server certificates.
    #[serde(default)]
    pub pki_dir: Option<PathBuf>,

    /// Accept server certificates without a trust list (default: true).
    #[serde(default = "default_trust_server_certs")]
    pub trust_server_certs: bool,
}

impl OpcUaConfig {
    /// Creates a configuration with default settings.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            endpoint_name: String::new(),
            port: default_port(),
            update_parameter: default_update_parameter(),
            wait_timeout_retry: default_wait_timeout_retry(),
            max_timeout_retry_nr: default_max_timeout_retry_nr(),
            session_timeout: default_session_timeout(),
            application_name: default_application_name(),
            application_uri: None,
            pki_dir: None,
            trust_server_certs: default_trust_server_certs(),
        }
    }

    /// Creates a builder.
    pub fn builder() -> OpcUaConfigBuilder {
        OpcUaConfigBuilder::default()
    }

    /// Endpoint URL, `opc.tcp://host:port/endpoint_name`.
    pub fn url(&self) -> String {
        format!(
            "opc.tcp://{}:{}/{}",
            self.host,
            self.port,
            self.endpoint_name.trim_start_matches('/')
        )
    }

    /// `host:port`, as resolved before connecting.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Application URI, derived from the name when not configured.
    pub fn effective_application_uri(&self) -> String {
        self.application_uri
            .clone()
            .unwrap_or_else(|| format!("urn:{}", self.application_name))
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.host.trim().is_empty() {
            return Err(ConfigurationError::invalid("host", "host cannot be empty"));
        }
        if self.port == 0 {
            return Err(ConfigurationError::invalid("port", "port cannot be 0"));
        }
        if self.update_parameter.is_zero() {
            return Err(ConfigurationError::invalid(
                "update_parameter",
                "update period must be greater than zero",
            ));
        }
        if self.application_name.trim().is_empty() {
            return Err(ConfigurationError::invalid(
                "application_name",
                "application name cannot be empty",
            ));
        }
        Ok(())
    }
}

/// Builder for [`OpcUaConfig`].
#[derive(Debug, Default)]
pub struct OpcUaConfigBuilder {
    host: Option<String>,
    endpoint_name: Option<String>,
    port: Option<u16>,
    update_parameter: Option<Duration>,
    wait_timeout_retry: Option<Duration>,
    max_timeout_retry_nr: Option<u32>,
    session_timeout: Option<Duration>,
    application_name: Option<String>,
    application_uri: Option<String>,
    pki_dir: Option<PathBuf>,
    trust_server_certs: Option<bool>,
}

impl OpcUaConfigBuilder {
    /// Sets the server host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the endpoint path.
    pub fn endpoint_name(mut self, name: impl Into<String>) -> Self {
        self.endpoint_name = Some(name.into());
        self
    }

    /// Sets the server port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the subscription update period.
    pub fn update_parameter(mut self, period: Duration) -> Self {
        self.update_parameter = Some(period);
        self
    }

    /// Sets the pause before a timeout retry.
    pub fn wait_timeout_retry(mut self, wait: Duration) -> Self {
        self.wait_timeout_retry = Some(wait);
        self
    }

    /// Sets the maximum number of timeout retries.
    pub fn max_timeout_retry_nr(mut self, retries: u32) -> Self {
        self.max_timeout_retry_nr = Some(retries);
        self
    }

    /// Sets the session timeout.
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Sets the application name.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Sets the application URI.
    pub fn application_uri(mut self, uri: impl Into<String>) -> Self {
        self.application_uri = Some(uri.into());
        self
    }

    /// Sets the PKI directory.
    pub fn pki_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pki_dir = Some(dir.into());
        self
    }

    /// Sets whether unknown server certificates are accepted.
    pub fn trust_server_certs(mut self, trust: bool) -> Self {
        self.trust_server_certs = Some(trust);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> Result<OpcUaConfig, ConfigurationError> {
        let host = self.host.ok_or_else(|| ConfigurationError::missing("host"))?;

        let config = OpcUaConfig {
            host,
            endpoint_name: self.endpoint_name.unwrap_or_default(),
            port: self.port.unwrap_or_else(default_port),
            update_parameter: self.update_parameter.unwrap_or_else(default_update_parameter),
            wait_timeout_retry: self
                .wait_timeout_retry
                .unwrap_or_else(default_wait_timeout_retry),
            max_timeout_retry_nr: self
                .max_timeout_retry_nr
                .unwrap_or_else(default_max_timeout_retry_nr),
            session_timeout: self.session_timeout.unwrap_or_else(default_session_timeout),
            application_name: self
                .application_name
                .unwrap_or_else(default_application_name),
            application_uri: self.application_uri,
            pki_dir: self.pki_dir,
            trust_server_certs: self
                .trust_server_certs
                .unwrap_or_else(default_trust_server_certs),
        };

        config.validate()?;
        Ok(config)
    }
}
