// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! VISA error types.

use std::time::Duration;

use ccb_core::{BoxError, CcbError, ConfigurationError, ConnectionError};
use thiserror::Error;

/// Protocol name used in [`ConnectionError`]s raised by this crate.
pub const PROTOCOL: &str = "visa";

/// Result type for VISA operations.
pub type VisaResult<T> = Result<T, VisaError>;

/// Errors raised by [`VisaCommunication`](crate::VisaCommunication).
#[derive(Debug, Error)]
pub enum VisaError {
    /// Invalid VISA settings.
    #[error("VISA configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// The resource is not open.
    #[error("VISA resource {resource} is not open")]
    NotOpen {
        /// Resource string.
        resource: String,
    },

    /// Opening the resource failed.
    #[error("Failed to open VISA resource {resource}: {message}")]
    Open {
        /// Resource string.
        resource: String,
        /// Failure description.
        message: String,
        /// Underlying cause.
        #[source]
        source: Option<BoxError>,
    },

    /// The selected backend cannot serve this resource.
    #[error("VISA resource {resource} is not supported: {message}")]
    Unsupported {
        /// Resource string.
        resource: String,
        /// Why the backend refused.
        message: String,
    },

    /// Reading or writing failed.
    #[error("VISA I/O error on {resource}: {message}")]
    Io {
        /// Resource string.
        resource: String,
        /// Failure description.
        message: String,
        /// Underlying cause.
        #[source]
        source: Option<BoxError>,
    },

    /// No complete response arrived in time.
    #[error("VISA read from {resource} timed out after {timeout:?}")]
    Timeout {
        /// Resource string.
        resource: String,
        /// The configured I/O timeout.
        timeout: Duration,
    },

    /// The instrument answered with something unexpected.
    #[error("Invalid response from {resource} to '{command}': '{response}'")]
    InvalidResponse {
        /// Resource string.
        resource: String,
        /// The command that was sent.
        command: String,
        /// The raw response.
        response: String,
    },
}

impl VisaError {
    /// Creates a not-open error.
    pub fn not_open(resource: impl Into<String>) -> Self {
        Self::NotOpen {
            resource: resource.into(),
        }
    }

    /// Creates an open error from a message.
    pub fn open(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Open {
            resource: resource.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates an open error with an underlying cause.
    pub fn open_with<E>(resource: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Open {
            resource: resource.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates an unsupported-resource error.
    pub fn unsupported(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unsupported {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Creates an I/O error from a message.
    pub fn io(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Io {
            resource: resource.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates an I/O error with an underlying cause.
    pub fn io_with<E>(resource: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Io {
            resource: resource.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(resource: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            resource: resource.into(),
            timeout,
        }
    }

    /// Creates an invalid-response error.
    pub fn invalid_response(
        resource: impl Into<String>,
        command: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        Self::InvalidResponse {
            resource: resource.into(),
            command: command.into(),
            response: response.into(),
        }
    }

    /// Returns `true` if the operation may succeed when repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::InvalidResponse { .. })
    }

    /// Returns `true` if the link to the instrument is gone.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::NotOpen { .. })
    }
}

impl From<VisaError> for CcbError {
    fn from(err: VisaError) -> Self {
        let connection = match err {
            VisaError::Configuration(e) => return CcbError::Configuration(e),
            VisaError::NotOpen { resource } => ConnectionError::not_open(PROTOCOL, resource),
            VisaError::Open {
                resource,
                message,
                source,
            } => ConnectionError::Open {
                protocol: PROTOCOL,
                target: resource,
                message,
                source,
            },
            VisaError::Unsupported { resource, message } => {
                ConnectionError::open(PROTOCOL, resource, message)
            }
            VisaError::Io {
                resource,
                message,
                source,
            } => ConnectionError::Io {
                protocol: PROTOCOL,
                target: resource,
                message,
                source,
            },
            VisaError::Timeout { resource, timeout } => {
                ConnectionError::io(PROTOCOL, resource, format!("read timed out after {timeout:?}"))
            }
            VisaError::InvalidResponse {
                resource,
                command,
                response,
            } => ConnectionError::protocol(
                PROTOCOL,
                resource,
                format!("invalid response to '{command}': '{response}'"),
            ),
        };
        CcbError::Connection(connection)
    }
}
