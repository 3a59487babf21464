// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration error types for ccb-config.

use std::path::PathBuf;

use ccb_core::{CcbError, ConfigurationError};
use thiserror::Error;

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating an experiment configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to parse the configuration file.
    #[error("Failed to parse config file '{path}': {message}")]
    Parse {
        /// Path to the configuration file.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// A top-level value is invalid.
    #[error("Validation failed for '{field}': {message}")]
    Validation {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// A device entry is invalid.
    #[error("Invalid configuration for device '{device}': {source}")]
    InvalidDevice {
        /// The device name.
        device: String,
        /// The protocol's rejection.
        #[source]
        source: ConfigurationError,
    },

    /// Two devices share a name.
    #[error("Duplicate device name: {name}")]
    DuplicateDevice {
        /// The duplicated name.
        name: String,
    },

    /// The file could not be read.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        /// Path to the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file does not exist.
    #[error("File not found: {path}")]
    FileNotFound {
        /// The path that was not found.
        path: PathBuf,
    },

    /// The file extension is not a known format.
    #[error("Unsupported configuration format: {format}")]
    UnsupportedFormat {
        /// The unsupported extension.
        format: String,
    },

    /// An override variable holds an unusable value.
    #[error("Invalid environment variable value for '{name}': {message}")]
    InvalidEnvVar {
        /// The variable name.
        name: String,
        /// Error message.
        message: String,
    },

    /// Parsing or serializing a string failed.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message.
        message: String,
    },
}

impl ConfigError {
    /// Creates a parse error.
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid device error.
    pub fn invalid_device(device: impl Into<String>, source: ConfigurationError) -> Self {
        Self::InvalidDevice {
            device: device.into(),
            source,
        }
    }

    /// Creates a duplicate device error.
    pub fn duplicate_device(name: impl Into<String>) -> Self {
        Self::DuplicateDevice { name: name.into() }
    }

    /// Creates an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a file not found error.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates an unsupported format error.
    pub fn unsupported_format(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    /// Creates an invalid environment variable error.
    pub fn invalid_env_var(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEnvVar {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns `true` for errors in the file contents, as opposed to
    /// errors accessing the file.
    pub fn is_content_error(&self) -> bool {
        !matches!(
            self,
            Self::Io { .. } | Self::FileNotFound { .. } | Self::UnsupportedFormat { .. }
        )
    }
}

impl From<ConfigError> for CcbError {
    fn from(err: ConfigError) -> Self {
        let configuration = match err {
            ConfigError::Validation { field, message } => ConfigurationError::invalid(field, message),
            ConfigError::InvalidDevice { device, source } => match source {
                ConfigurationError::Invalid { field, message } => {
                    ConfigurationError::invalid(format!("devices.{device}.{field}"), message)
                }
                ConfigurationError::Missing { field } => {
                    ConfigurationError::missing(format!("devices.{device}.{field}"))
                }
                other => ConfigurationError::parse(format!("device '{device}': {other}")),
            },
            other => ConfigurationError::parse(other.to_string()),
        };
        CcbError::Configuration(configuration)
    }
}
