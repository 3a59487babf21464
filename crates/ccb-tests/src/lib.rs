// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # CCB Integration Tests
//!
//! Shared helpers and cross-crate tests for CCB.
//!
//! ## Module Structure
//!
//! - [`common`]: Shared test utilities
//!   - `fixtures`: configuration texts and prepared configs
//!   - `mocks`: devices, protocols and an OPC UA transport with failure
//!     injection and call recording
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p ccb-tests
//! cargo test -p ccb-tests --test integration_experiment
//! cargo test -p ccb-tests -- --nocapture
//! ```
//!
//! ## Test Categories
//!
//! - `integration_experiment.rs`: sequence and experiment lifecycle
//! - `integration_poller.rs`: polling cadence, stop and result semantics
//! - `integration_serial.rs`: serial exchanges over the loopback port
//! - `integration_opcua.rs`: OPC UA retry and reconnect behavior
//! - `integration_config.rs`: configuration files and the device factory

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod common;

/// Re-export commonly used items for convenience.
pub mod prelude {
    pub use crate::common::fixtures::*;
    pub use crate::common::mocks::*;
    pub use crate::common::{init_test_logging, temp_test_dir};
}
