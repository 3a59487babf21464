// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subcommands of the `ccb` binary.

mod run;
mod validate;
mod version;

pub use run::run;
pub use validate::validate;
pub use version::version;

use ccb_config::{LogFormat, LogLevel};

use crate::cli::{Cli, Commands};
use crate::error::BinResult;
use crate::logging::init_logging;

/// Dispatches to the selected subcommand; `run` is the default.
///
/// `run` initializes logging itself once the configuration is loaded.
/// `validate` only logs warnings unless asked for more.
pub async fn execute(cli: Cli) -> BinResult<()> {
    match cli.effective_command() {
        Commands::Run(args) => run(&cli, args).await,
        Commands::Validate(args) => {
            init_logging(
                cli.effective_log_level(LogLevel::Warn),
                cli.effective_log_format(LogFormat::Text),
            );
            validate(&cli, args)
        }
        Commands::Version => version(&cli),
    }
}
