// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Modbus error types.
//!
//! Every failure of the TCP connection itself, whether refused, reset,
//! timed out or garbled, surfaces as [`ModbusError::Connection`]. Exception
//! responses sent by the device are kept apart since the link is healthy.

use std::time::Duration;

use ccb_core::{BoxError, CcbError, ConfigurationError, ConnectionError};
use thiserror::Error;

/// Protocol name used in [`ConnectionError`]s raised by this crate.
pub const PROTOCOL: &str = "modbus_tcp";

/// Result type for Modbus operations.
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Errors raised by [`ModbusTcpCommunication`](crate::ModbusTcpCommunication).
#[derive(Debug, Error)]
pub enum ModbusError {
    /// Invalid configuration.
    #[error("Modbus configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// The connection failed or broke.
    #[error("Modbus connection to {address} failed during {operation}: {message}")]
    Connection {
        /// `host:port`.
        address: String,
        /// Operation being performed.
        operation: &'static str,
        /// Failure description.
        message: String,
        /// Underlying cause.
        #[source]
        source: Option<BoxError>,
    },

    /// No connection is open.
    #[error("Modbus connection to {address} is not open")]
    NotConnected {
        /// `host:port`.
        address: String,
    },

    /// The device answered with an exception response.
    #[error("Modbus exception 0x{code:02X} from {address} during {operation}")]
    Exception {
        /// `host:port`.
        address: String,
        /// Operation being performed.
        operation: &'static str,
        /// Modbus exception code.
        code: u8,
    },
}

impl ModbusError {
    /// Creates a connection error from a message.
    pub fn connection(
        address: impl Into<String>,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::Connection {
            address: address.into(),
            operation,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a connection error with an underlying cause.
    pub fn connection_with<E>(address: impl Into<String>, operation: &'static str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection {
            address: address.into(),
            operation,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a connection error for an elapsed timeout.
    pub fn timed_out(address: impl Into<String>, operation: &'static str, after: Duration) -> Self {
        Self::connection(address, operation, format!("timed out after {after:?}"))
    }

    /// Creates a not-connected error.
    pub fn not_connected(address: impl Into<String>) -> Self {
        Self::NotConnected {
            address: address.into(),
        }
    }

    /// Creates an exception response error.
    pub fn exception(address: impl Into<String>, operation: &'static str, code: u8) -> Self {
        Self::Exception {
            address: address.into(),
            operation,
            code,
        }
    }

    /// Returns `true` if the connection should be considered lost.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

impl From<ModbusError> for CcbError {
    fn from(err: ModbusError) -> Self {
        let connection = match err {
            ModbusError::Configuration(e) => return CcbError::Configuration(e),
            ModbusError::Connection {
                address,
                operation,
                message,
                source,
            } => {
                let message = format!("{operation}: {message}");
                if operation == "connect" {
                    ConnectionError::Open {
                        protocol: PROTOCOL,
                        target: address,
                        message,
                        source,
                    }
                } else {
                    ConnectionError::Io {
                        protocol: PROTOCOL,
                        target: address,
                        message,
                        source,
                    }
                }
            }
            ModbusError::NotConnected { address } => ConnectionError::not_open(PROTOCOL, address),
            ModbusError::Exception {
                address,
                operation,
                code,
            } => ConnectionError::protocol(
                PROTOCOL,
                address,
                format!("{operation}: exception 0x{code:02X}"),
            ),
        };
        CcbError::Connection(connection)
    }
}
