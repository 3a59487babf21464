// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Errors of the `ccb` binary and their process exit codes.

use ccb_config::ConfigError;
use ccb_core::CcbError;
use thiserror::Error;

/// Result alias used by the commands.
pub type BinResult<T> = Result<T, BinError>;

/// Exit code for unusable configuration.
pub const EXIT_CONFIG: i32 = 1;
/// Exit code when a report could not be rendered.
pub const EXIT_OUTPUT: i32 = 2;
/// Exit code when the experiment failed.
pub const EXIT_EXPERIMENT: i32 = 3;
/// Exit code for I/O failures outside the experiment.
pub const EXIT_IO: i32 = 4;

/// Failures surfaced by a `ccb` command.
#[derive(Debug, Error)]
pub enum BinError {
    /// The configuration is semantically unusable.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The configuration file could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A command could not render its report.
    #[error("Cannot render output: {0}")]
    Output(String),

    /// Starting or finishing the experiment failed.
    #[error("Experiment failed: {0}")]
    Experiment(#[source] CcbError),

    /// Terminal or file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Another error annotated with what was being done.
    #[error("{context}: {source}")]
    Context {
        /// What the command was doing.
        context: String,
        /// The annotated error.
        #[source]
        source: Box<BinError>,
    },
}

impl BinError {
    /// An unusable configuration.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// A rendering failure.
    pub fn output(message: impl Into<String>) -> Self {
        Self::Output(message.into())
    }

    /// Annotates the error with what was being done.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Process exit code; annotations keep the code of the inner error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::Config(_) => EXIT_CONFIG,
            Self::Output(_) => EXIT_OUTPUT,
            Self::Experiment(_) => EXIT_EXPERIMENT,
            Self::Io(_) => EXIT_IO,
            Self::Context { source, .. } => source.exit_code(),
        }
    }

    /// Messages of the error and every underlying cause, outermost first.
    pub fn causes(&self) -> Vec<String> {
        let mut messages = vec![self.to_string()];
        let mut next = std::error::Error::source(self);
        while let Some(cause) = next {
            messages.push(cause.to_string());
            next = cause.source();
        }
        messages
    }
}

impl From<CcbError> for BinError {
    fn from(err: CcbError) -> Self {
        match err {
            CcbError::Configuration(e) => Self::Configuration(e.to_string()),
            other => Self::Experiment(other),
        }
    }
}

/// Prints the error and its causes to stderr.
pub fn report_error(error: &BinError) {
    let mut causes = error.causes().into_iter();
    if let Some(first) = causes.next() {
        eprintln!("error: {first}");
    }
    for cause in causes {
        eprintln!("  caused by: {cause}");
    }
}

/// Prints the error and exits with its code.
pub fn report_error_and_exit(error: BinError) -> ! {
    report_error(&error);
    std::process::exit(error.exit_code())
}
