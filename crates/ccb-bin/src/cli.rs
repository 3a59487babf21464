// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing and command definitions.
//!
//! - `run`: Start the experiment (default)
//! - `validate`: Validate configuration file
//! - `version`: Show version information

use std::path::PathBuf;
use std::time::Duration;

use ccb_config::{LogFormat, LogLevel};
use clap::{Args, Parser, Subcommand};

// =============================================================================
// Main CLI Structure
// =============================================================================

/// CCB - runs a configured set of laboratory devices as one experiment.
#[derive(Parser, Debug)]
#[command(
    name = "ccb",
    author = "Sylvex <contact@sylvex.io>",
    version = ccb_core::VERSION,
    about = "Device communication and experiment control",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "experiment.yaml",
        env = "CCB_CONFIG",
        global = true
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the file
    #[arg(short, long, global = true)]
    pub log_level: Option<LogLevel>,

    /// Log format (text, compact, json); overrides the file
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    /// Enable quiet mode (warnings and errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start all devices and keep the experiment running
    ///
    /// This is the default command. The experiment runs until Ctrl+C,
    /// a termination signal or the end of `--duration`, then every device
    /// is stopped.
    Run(RunArgs),

    /// Validate the configuration file
    ///
    /// Parses and validates the configuration and builds every device
    /// without opening any connection.
    Validate(ValidateArgs),

    /// Show version information
    Version,
}

// =============================================================================
// Command Arguments
// =============================================================================

/// Arguments for the `run` command.
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Finish the experiment after this long (e.g. "30s", "2h 15m")
    #[arg(short, long, value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,
}

/// Arguments for the `validate` command.
#[derive(Args, Debug, Clone, Default)]
pub struct ValidateArgs {
    /// Show parsed configuration after validation
    #[arg(short, long)]
    pub show_config: bool,

    /// Output format for validation results
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,

    /// Strict mode: treat warnings as errors
    #[arg(long)]
    pub strict: bool,
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for programmatic parsing
    Json,
    /// YAML format
    Yaml,
}

// =============================================================================
// Helper Methods
// =============================================================================

impl Cli {
    /// Parse CLI arguments from the command line.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the effective command, defaulting to `Run` if none specified.
    pub fn effective_command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or_else(|| Commands::Run(RunArgs::default()))
    }

    /// Log level after flags, falling back to `configured`.
    pub fn effective_log_level(&self, configured: LogLevel) -> LogLevel {
        if self.quiet {
            LogLevel::Warn
        } else if self.verbose {
            LogLevel::Debug
        } else {
            self.log_level.unwrap_or(configured)
        }
    }

    /// Log format, falling back to `configured`.
    pub fn effective_log_format(&self, configured: LogFormat) -> LogFormat {
        self.log_format.unwrap_or(configured)
    }
}

// =============================================================================
// Tests
// =============================================================================
