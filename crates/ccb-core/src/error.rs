// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Unified error hierarchy for CCB.
//!
//! Every failure that reaches the generic device layer is expressed as a
//! [`CcbError`]. Protocol crates keep their own, richer error types and
//! convert into this one at the protocol boundary, so raw transport errors
//! never leak into orchestration code.
//!
//! # Error Hierarchy
//!
//! ```text
//! CcbError (root)
//! ├── ConfigurationError  - option validation and coercion
//! ├── ConnectionError     - open/close/transport failures
//! ├── TimeoutError        - bounded retries exhausted
//! ├── DeviceExistingError - duplicate device name
//! ├── DeviceFailures      - aggregate of a start()/stop() pass
//! └── ExperimentError     - anything that reaches the experiment manager
//! ```
//!
//! # Examples
//!
//! ```
//! use ccb_core::error::{CcbError, ConnectionError};
//!
//! let error = ConnectionError::not_open("serial", "/dev/ttyUSB0");
//! let ccb_error: CcbError = error.into();
//! assert!(ccb_error.is_connection());
//! ```

use std::fmt;

use thiserror::Error;

use crate::experiment::ExperimentStatus;

/// Boxed error used as an opaque source.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for CCB operations.
pub type CcbResult<T> = Result<T, CcbError>;

// =============================================================================
// CcbError - Root Error Type
// =============================================================================

/// The root error type for CCB.
#[derive(Debug, Error)]
pub enum CcbError {
    /// Invalid configuration.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// Transport failure.
    #[error("{0}")]
    Connection(#[from] ConnectionError),

    /// Retries exhausted after repeated timeouts.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),

    /// A device with the same name is already registered.
    #[error("{0}")]
    DeviceExists(#[from] DeviceExistingError),

    /// The device name is not acceptable for a sequence.
    #[error("Invalid device name '{name}': {reason}")]
    InvalidDeviceName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// No device with the given name is registered.
    #[error("Unknown device '{name}'")]
    UnknownDevice {
        /// The requested name.
        name: String,
    },

    /// One or more devices failed during a bulk start or stop.
    #[error("{0}")]
    DeviceFailures(#[from] DeviceFailures),

    /// Experiment-level failure.
    #[error("{0}")]
    Experiment(#[from] ExperimentError),

    /// A background poller ended abnormally.
    #[error("Polling failed: {message}")]
    Polling {
        /// Failure description.
        message: String,
    },

    /// Device-specific failure raised by device implementations.
    #[error("Device error: {message}")]
    Device {
        /// Failure description.
        message: String,
        /// Underlying cause, if any.
        #[source]
        source: Option<BoxError>,
    },
}

impl CcbError {
    /// Creates a device error from a message.
    pub fn device(message: impl Into<String>) -> Self {
        Self::Device {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a device error with an underlying cause.
    pub fn device_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Device {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns `true` for connection errors.
    pub fn is_connection(&self) -> bool {
        matches!(self, CcbError::Connection(_))
    }

    /// Returns `true` for timeout errors.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CcbError::Timeout(_))
    }

    /// Returns `true` for experiment errors.
    pub fn is_experiment(&self) -> bool {
        matches!(self, CcbError::Experiment(_))
    }

    /// Returns the error type as a string for logging.
    pub fn error_type(&self) -> &'static str {
        match self {
            CcbError::Configuration(_) => "configuration",
            CcbError::Connection(_) => "connection",
            CcbError::Timeout(_) => "timeout",
            CcbError::DeviceExists(_) => "device_exists",
            CcbError::InvalidDeviceName { .. } => "invalid_device_name",
            CcbError::UnknownDevice { .. } => "unknown_device",
            CcbError::DeviceFailures(_) => "device_failures",
            CcbError::Experiment(_) => "experiment",
            CcbError::Polling { .. } => "polling",
            CcbError::Device { .. } => "device",
        }
    }
}

// =============================================================================
// ConfigurationError
// =============================================================================

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// An option has an unacceptable value.
    #[error("Invalid configuration value for '{field}': {message}")]
    Invalid {
        /// The offending option.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// A required option was not supplied.
    #[error("Missing required configuration field: {field}")]
    Missing {
        /// The missing option.
        field: String,
    },

    /// A value could not be coerced into the expected type.
    #[error("Failed to parse configuration: {message}")]
    Parse {
        /// Parser message.
        message: String,
    },
}

impl ConfigurationError {
    /// Creates an invalid-value error.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a missing-field error.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::Missing {
            field: field.into(),
        }
    }

    /// Creates a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Returns the field name, if the error refers to one.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Invalid { field, .. } | Self::Missing { field } => Some(field),
            Self::Parse { .. } => None,
        }
    }
}

// =============================================================================
// ConnectionError
// =============================================================================

/// Transport-level failures, tagged with the protocol and its target.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Opening the transport failed.
    #[error("{protocol}: failed to open {target}: {message}")]
    Open {
        /// Protocol name.
        protocol: &'static str,
        /// Port, host or resource string.
        target: String,
        /// Failure description.
        message: String,
        /// Underlying cause.
        #[source]
        source: Option<BoxError>,
    },

    /// Closing the transport failed.
    #[error("{protocol}: failed to close {target}: {message}")]
    Close {
        /// Protocol name.
        protocol: &'static str,
        /// Port, host or resource string.
        target: String,
        /// Failure description.
        message: String,
        /// Underlying cause.
        #[source]
        source: Option<BoxError>,
    },

    /// An operation was attempted on a closed transport.
    #[error("{protocol}: communication with {target} is not open")]
    NotOpen {
        /// Protocol name.
        protocol: &'static str,
        /// Port, host or resource string.
        target: String,
    },

    /// I/O failure during a data exchange.
    #[error("{protocol}: I/O error with {target}: {message}")]
    Io {
        /// Protocol name.
        protocol: &'static str,
        /// Port, host or resource string.
        target: String,
        /// Failure description.
        message: String,
        /// Underlying cause.
        #[source]
        source: Option<BoxError>,
    },

    /// The peer answered with something the protocol rejects.
    #[error("{protocol}: protocol error with {target}: {message}")]
    Protocol {
        /// Protocol name.
        protocol: &'static str,
        /// Port, host or resource string.
        target: String,
        /// Failure description.
        message: String,
    },
}

impl ConnectionError {
    /// Creates an open failure.
    pub fn open(protocol: &'static str, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Open {
            protocol,
            target: target.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates an open failure with an underlying cause.
    pub fn open_with<E>(protocol: &'static str, target: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Open {
            protocol,
            target: target.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a close failure.
    pub fn close(protocol: &'static str, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Close {
            protocol,
            target: target.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a not-open error.
    pub fn not_open(protocol: &'static str, target: impl Into<String>) -> Self {
        Self::NotOpen {
            protocol,
            target: target.into(),
        }
    }

    /// Creates an I/O failure.
    pub fn io(protocol: &'static str, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Io {
            protocol,
            target: target.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates an I/O failure with an underlying cause.
    pub fn io_with<E>(protocol: &'static str, target: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Io {
            protocol,
            target: target.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a protocol error.
    pub fn protocol(
        protocol: &'static str,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Protocol {
            protocol,
            target: target.into(),
            message: message.into(),
        }
    }

    /// Returns the protocol name.
    pub fn protocol_name(&self) -> &'static str {
        match self {
            Self::Open { protocol, .. }
            | Self::Close { protocol, .. }
            | Self::NotOpen { protocol, .. }
            | Self::Io { protocol, .. }
            | Self::Protocol { protocol, .. } => protocol,
        }
    }

    /// Returns the target the failure refers to.
    pub fn target(&self) -> &str {
        match self {
            Self::Open { target, .. }
            | Self::Close { target, .. }
            | Self::NotOpen { target, .. }
            | Self::Io { target, .. }
            | Self::Protocol { target, .. } => target,
        }
    }
}

// =============================================================================
// TimeoutError
// =============================================================================

/// Raised once a bounded retry budget is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} on {target} timed out after {attempts} attempt(s)")]
pub struct TimeoutError {
    /// The operation that timed out.
    pub operation: String,
    /// Host or endpoint.
    pub target: String,
    /// Number of attempts made, including the first.
    pub attempts: u32,
}

impl TimeoutError {
    /// Creates a new timeout error.
    pub fn new(operation: impl Into<String>, target: impl Into<String>, attempts: u32) -> Self {
        Self {
            operation: operation.into(),
            target: target.into(),
            attempts,
        }
    }
}

// =============================================================================
// DeviceExistingError
// =============================================================================

/// A device name is already taken in a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Device '{name}' already exists")]
pub struct DeviceExistingError {
    /// The duplicated name.
    pub name: String,
}

impl DeviceExistingError {
    /// Creates a new error for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

// =============================================================================
// DeviceFailures
// =============================================================================

/// Which bulk lifecycle operation produced a [`DeviceFailures`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleOperation {
    /// `start()` pass.
    Start,
    /// `stop()` pass.
    Stop,
}

impl fmt::Display for LifecycleOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleOperation::Start => write!(f, "start"),
            LifecycleOperation::Stop => write!(f, "stop"),
        }
    }
}

/// Aggregate of per-device failures from one bulk start or stop pass.
///
/// Entries keep the order in which the devices were visited.
#[derive(Debug)]
pub struct DeviceFailures {
    operation: LifecycleOperation,
    failures: Vec<(String, CcbError)>,
}

impl DeviceFailures {
    /// Creates an aggregate from the collected failures.
    pub fn new(operation: LifecycleOperation, failures: Vec<(String, CcbError)>) -> Self {
        Self {
            operation,
            failures,
        }
    }

    /// The operation that failed.
    pub fn operation(&self) -> LifecycleOperation {
        self.operation
    }

    /// Number of failed devices.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Returns `true` if no device failed.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Names of the failed devices, in visiting order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|(name, _)| name.as_str())
    }

    /// Error reported by the named device.
    pub fn get(&self, name: &str) -> Option<&CcbError> {
        self.failures
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e)
    }

    /// Iterates over `(name, error)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CcbError)> {
        self.failures.iter().map(|(n, e)| (n.as_str(), e))
    }

    /// Consumes the aggregate into its entries.
    pub fn into_inner(self) -> Vec<(String, CcbError)> {
        self.failures
    }
}

impl fmt::Display for DeviceFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to {} {} device(s):", self.operation, self.failures.len())?;
        for (name, error) in &self.failures {
            write!(f, " [{}: {}]", name, error)?;
        }
        Ok(())
    }
}

impl std::error::Error for DeviceFailures {}

// =============================================================================
// ExperimentError
// =============================================================================

/// Failures surfaced by the experiment manager.
#[derive(Debug, Error)]
pub enum ExperimentError {
    /// A lifecycle operation failed; the experiment is now in `ERROR`.
    #[error("Experiment {operation} failed: {source}")]
    Failed {
        /// The manager operation (`run`, `finish`, `add_device`).
        operation: &'static str,
        /// The wrapped failure.
        #[source]
        source: Box<CcbError>,
    },

    /// The experiment is in `ERROR`; the operation is refused.
    #[error("Experiment is in error state, refusing {operation}")]
    InErrorState {
        /// The refused operation.
        operation: &'static str,
    },

    /// The operation is not allowed in the current status.
    #[error("Cannot {operation} while experiment is {status}")]
    InvalidState {
        /// The refused operation.
        operation: &'static str,
        /// Status at the time of the call.
        status: ExperimentStatus,
    },
}

impl ExperimentError {
    /// Wraps a failure of `operation`.
    pub fn failed(operation: &'static str, source: CcbError) -> Self {
        Self::Failed {
            operation,
            source: Box::new(source),
        }
    }

    /// Returns the wrapped failure, if this error wraps one.
    pub fn inner(&self) -> Option<&CcbError> {
        match self {
            Self::Failed { source, .. } => Some(source),
            _ => None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
