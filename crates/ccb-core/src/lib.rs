// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # ccb-core
//!
//! Core abstractions for controlling laboratory instruments as one experiment.
//!
//! This crate provides the protocol-independent part of CCB:
//!
//! - **Error**: unified error hierarchy ([`CcbError`])
//! - **Comm**: the [`CommunicationProtocol`] lifecycle trait implemented by
//!   `ccb-serial`, `ccb-modbus`, `ccb-opcua` and `ccb-visa`
//! - **Poller**: cadence-driven background handler execution
//! - **Device**: start/stop lifecycle, scoped use, [`SingleCommDevice`]
//! - **Sequence**: ordered named devices with aggregated failures
//! - **Experiment**: the seven-state [`ExperimentManager`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ccb_core::{Device, ExperimentManager, SingleCommDevice};
//! use ccb_serial::{SerialCommunication, SerialConfig};
//!
//! let laser = SingleCommDevice::<SerialCommunication>::from_config(
//!     SerialConfig::builder().port("/dev/ttyUSB0").baudrate(19200).build()?,
//! )?;
//!
//! let manager = ExperimentManager::new();
//! manager.add_device("laser", Arc::new(laser)).await?;
//! manager.run().await?;
//! // ...
//! manager.finish().await?;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Core Modules
// =============================================================================

pub mod comm;
pub mod error;
pub mod poller;

// =============================================================================
// Device & Experiment Modules
// =============================================================================

pub mod device;
pub mod experiment;
pub mod sequence;

// =============================================================================
// Re-exports
// =============================================================================

pub use comm::{CommunicationProtocol, FromConfig, ProtocolState};
pub use device::{with_started, Device, DeviceGuard, SingleCommDevice};
pub use error::{
    BoxError, CcbError, CcbResult, ConfigurationError, ConnectionError, DeviceExistingError,
    DeviceFailures, ExperimentError, LifecycleOperation, TimeoutError,
};
pub use experiment::{experiment_failure, ExperimentManager, ExperimentStatus};
pub use poller::{Poller, PollerError};
pub use sequence::{DeviceSequence, SequenceOrder, RESERVED_NAMES};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
