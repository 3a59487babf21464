// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # ccb-bin
//!
//! Command line runner for CCB experiments.
//!
//! - CLI argument parsing with clap
//! - Experiment runtime: load, run, wait, finish
//! - Shutdown on OS signals
//! - Logging initialization
//!
//! ## Usage
//!
//! ```bash
//! # Run the experiment in experiment.yaml until Ctrl+C
//! ccb
//!
//! # Run a specific configuration for ten minutes
//! ccb -c bench.toml run --duration 10m
//!
//! # Validate configuration
//! ccb validate --show-config
//!
//! # Show version
//! ccb version
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod shutdown;

// =============================================================================
// Re-exports
// =============================================================================

pub use cli::{Cli, Commands};
pub use error::{BinError, BinResult};
pub use logging::init_logging;
pub use runtime::{ExperimentRuntime, RuntimeBuilder};
pub use shutdown::ShutdownCoordinator;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
