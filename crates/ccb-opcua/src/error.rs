// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA error types.
//!
//! ```text
//! TransportFailure { kind, message }      raised by an OpcUaTransport
//!   kind = AddressResolution | Socket | Cancelled | Protocol
//!       -> OpcUaError::Io       (no retry)
//!   kind = Timeout
//!       -> retried, then OpcUaError::Timeout
//! ```

use std::fmt;

use ccb_core::{CcbError, ConfigurationError, ConnectionError, TimeoutError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol name used in [`ConnectionError`]s raised by this crate.
pub const PROTOCOL: &str = "opcua";

/// Result type for OPC UA operations.
pub type OpcUaResult<T> = Result<T, OpcUaError>;

// =============================================================================
// Failure classification
// =============================================================================

/// Class of a low-level transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The server address could not be resolved.
    AddressResolution,
    /// The socket or the OS reported an error.
    Socket,
    /// The request was cancelled.
    Cancelled,
    /// The server rejected the request or answered with a bad status.
    Protocol,
    /// The request timed out.
    Timeout,
}

impl FailureKind {
    /// Returns `true` for the only class that is retried.
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Returns the class name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AddressResolution => "address resolution",
            Self::Socket => "socket",
            Self::Cancelled => "cancelled",
            Self::Protocol => "protocol",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure reported by an [`OpcUaTransport`](crate::OpcUaTransport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} failure: {message}")]
pub struct TransportFailure {
    /// Failure class.
    pub kind: FailureKind,
    /// Failure description.
    pub message: String,
}

impl TransportFailure {
    /// Creates a failure.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates an address resolution failure.
    pub fn address_resolution(message: impl Into<String>) -> Self {
        Self::new(FailureKind::AddressResolution, message)
    }

    /// Creates a socket failure.
    pub fn socket(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Socket, message)
    }

    /// Creates a cancellation failure.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Cancelled, message)
    }

    /// Creates a protocol failure.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Protocol, message)
    }

    /// Creates a timeout failure.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }
}

// =============================================================================
// OpcUaError
// =============================================================================

/// Errors raised by [`OpcUaCommunication`](crate::OpcUaCommunication).
#[derive(Debug, Error)]
pub enum OpcUaError {
    /// Invalid configuration.
    #[error("OPC UA configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// No session is open.
    #[error("OPC UA session with {url} is not open")]
    NotConnected {
        /// Endpoint URL.
        url: String,
    },

    /// Non-retried transport failure.
    #[error("OPC UA {operation} on {url} failed ({kind}): {message}")]
    Io {
        /// Failure class.
        kind: FailureKind,
        /// Operation being performed.
        operation: &'static str,
        /// Endpoint URL.
        url: String,
        /// Failure description.
        message: String,
    },

    /// Timeout retries exhausted.
    #[error("OPC UA {0}")]
    Timeout(TimeoutError),
}

impl OpcUaError {
    /// Creates a not-connected error.
    pub fn not_connected(url: impl Into<String>) -> Self {
        Self::NotConnected { url: url.into() }
    }

    /// Wraps a non-retried transport failure.
    pub fn io(operation: &'static str, url: impl Into<String>, failure: TransportFailure) -> Self {
        Self::Io {
            kind: failure.kind,
            operation,
            url: url.into(),
            message: failure.message,
        }
    }

    /// Creates a retry exhaustion error.
    pub fn timeout(operation: &'static str, url: impl Into<String>, attempts: u32) -> Self {
        Self::Timeout(TimeoutError::new(operation, url, attempts))
    }

    /// Returns the failure class of an [`OpcUaError::Io`].
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Io { kind, .. } => Some(*kind),
            Self::Timeout(_) => Some(FailureKind::Timeout),
            _ => None,
        }
    }

    /// Returns `true` once timeout retries are exhausted.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<OpcUaError> for CcbError {
    fn from(err: OpcUaError) -> Self {
        match err {
            OpcUaError::Configuration(e) => CcbError::Configuration(e),
            OpcUaError::NotConnected { url } => ConnectionError::not_open(PROTOCOL, url).into(),
            OpcUaError::Io {
                kind,
                operation,
                url,
                message,
            } => {
                let message = format!("{operation} ({kind}): {message}");
                match operation {
                    "open" => ConnectionError::open(PROTOCOL, url, message),
                    "close" => ConnectionError::close(PROTOCOL, url, message),
                    _ => ConnectionError::io(PROTOCOL, url, message),
                }
                .into()
            }
            OpcUaError::Timeout(e) => CcbError::Timeout(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_keeps_kind() {
        let err = OpcUaError::io(
            "read",
            "opc.tcp://plc:4840/",
            TransportFailure::socket("connection reset"),
        );
        assert_eq!(err.failure_kind(), Some(FailureKind::Socket));
        let ccb: CcbError = err.into();
        assert!(ccb.is_connection());
    }

    #[test]
    fn test_timeout_maps_to_timeout() {
        let ccb: CcbError = OpcUaError::timeout("read", "opc.tcp://plc:4840/", 6).into();
        assert!(ccb.is_timeout());
        assert_eq!(
            ccb.to_string(),
            "read on opc.tcp://plc:4840/ timed out after 6 attempt(s)"
        );
    }
}
