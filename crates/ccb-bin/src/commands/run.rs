// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `run` command.

use tracing::{debug, info};

use crate::cli::{Cli, RunArgs};
use crate::error::BinResult;
use crate::logging::init_logging;
use crate::runtime::{ExperimentRuntime, RuntimeBuilder};

/// Executes the `run` command.
///
/// Logging follows the configuration file unless overridden on the
/// command line, so the configuration is loaded first.
pub async fn run(cli: &Cli, args: RunArgs) -> BinResult<()> {
    let (config, duration) = RuntimeBuilder::new()
        .config_path(&cli.config)
        .duration(args.duration)
        .load()?;

    init_logging(
        cli.effective_log_level(config.logging.level),
        cli.effective_log_format(config.logging.format),
    );
    info!("Loaded configuration from {}", cli.config.display());
    debug!(devices = ?config.device_names(), "Configured devices");

    let runtime = ExperimentRuntime::new(config)?.with_duration(duration);
    runtime.run().await
}
