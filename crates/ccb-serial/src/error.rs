// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Serial error types.

use std::time::Duration;

use ccb_core::{BoxError, CcbError, ConfigurationError, ConnectionError};
use thiserror::Error;

/// Protocol name used in [`ConnectionError`]s raised by this crate.
pub const PROTOCOL: &str = "serial";

/// Result type for serial operations.
pub type SerialResult<T> = Result<T, SerialError>;

/// Errors raised by [`SerialCommunication`](crate::SerialCommunication).
#[derive(Debug, Error)]
pub enum SerialError {
    /// Invalid serial settings.
    #[error("Serial configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// The port is not open.
    #[error("Serial port {port} is not open")]
    NotOpen {
        /// Port name.
        port: String,
    },

    /// Opening the port failed.
    #[error("Failed to open serial port {port}: {message}")]
    Open {
        /// Port name.
        port: String,
        /// Failure description.
        message: String,
        /// Underlying cause.
        #[source]
        source: Option<BoxError>,
    },

    /// The platform driver cannot apply a configured setting.
    #[error("Serial port {port} does not support {setting}")]
    Unsupported {
        /// Port name.
        port: String,
        /// The rejected setting.
        setting: String,
    },

    /// Reading or writing failed.
    #[error("Serial I/O error on {port}: {source}")]
    Io {
        /// Port name.
        port: String,
        /// Underlying cause.
        #[source]
        source: std::io::Error,
    },

    /// A raw byte read did not complete in time.
    #[error("Reading from serial port {port} timed out after {timeout:?}")]
    ReadTimeout {
        /// Port name.
        port: String,
        /// The configured read timeout.
        timeout: Duration,
    },

    /// Received bytes are not valid text.
    #[error("Invalid text received on serial port {port}: {message}")]
    Decode {
        /// Port name.
        port: String,
        /// Decoder message.
        message: String,
    },
}

impl SerialError {
    /// Creates a not-open error.
    pub fn not_open(port: impl Into<String>) -> Self {
        Self::NotOpen { port: port.into() }
    }

    /// Creates an open error from a message.
    pub fn open(port: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Open {
            port: port.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates an open error with an underlying cause.
    pub fn open_with<E>(port: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Open {
            port: port.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates an unsupported-setting error.
    pub fn unsupported(port: impl Into<String>, setting: impl Into<String>) -> Self {
        Self::Unsupported {
            port: port.into(),
            setting: setting.into(),
        }
    }

    /// Creates an I/O error.
    pub fn io(port: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            port: port.into(),
            source,
        }
    }

    /// Creates a read timeout error.
    pub fn read_timeout(port: impl Into<String>, timeout: Duration) -> Self {
        Self::ReadTimeout {
            port: port.into(),
            timeout,
        }
    }

    /// Creates a decode error.
    pub fn decode(port: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            port: port.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if the operation may succeed when repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ReadTimeout { .. } | Self::Decode { .. })
    }
}

impl From<SerialError> for CcbError {
    fn from(err: SerialError) -> Self {
        let connection = match err {
            SerialError::Configuration(e) => return CcbError::Configuration(e),
            SerialError::NotOpen { port } => ConnectionError::not_open(PROTOCOL, port),
            SerialError::Open {
                port,
                message,
                source,
            } => ConnectionError::Open {
                protocol: PROTOCOL,
                target: port,
                message,
                source,
            },
            SerialError::Unsupported { port, setting } => {
                ConnectionError::open(PROTOCOL, port, format!("unsupported setting: {setting}"))
            }
            SerialError::Io { port, source } => ConnectionError::io_with(PROTOCOL, port, source),
            SerialError::ReadTimeout { port, timeout } => {
                ConnectionError::io(PROTOCOL, port, format!("read timed out after {timeout:?}"))
            }
            SerialError::Decode { port, message } => {
                ConnectionError::protocol(PROTOCOL, port, message)
            }
        };
        CcbError::Connection(connection)
    }
}
