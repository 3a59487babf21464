// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # ccb-config
//!
//! Experiment configuration for CCB.
//!
//! ## Features
//!
//! - **Schema**: one file describes the experiment, its logging and its
//!   devices, each device tagged by `protocol`
//! - **Multi-Format Support**: YAML, TOML and JSON
//! - **Environment Overrides**: `${VAR:default}` placeholders and
//!   `CCB_*` overrides
//! - **Factory**: builds devices and an [`ExperimentManager`](ccb_core::ExperimentManager)
//!
//! ## Quick Start
//!
//! ```no_run
//! use ccb_config::{build_manager, load_config};
//!
//! let config = load_config("experiment.yaml").unwrap();
//! let manager = build_manager(&config).unwrap();
//! println!("{}: {:?}", config.experiment.name, config.device_names());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod factory;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use factory::{build_device, build_manager};
pub use loader::{load_config, resolve_env_placeholders, ConfigFormat, ConfigLoader};
pub use schema::{
    DeviceEntry, ExperimentConfig, ExperimentSection, LogFormat, LogLevel, LoggingConfig,
    ProtocolConfig,
};

/// Prefix of the environment variables that override configuration values.
pub const DEFAULT_ENV_PREFIX: &str = "CCB";

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
