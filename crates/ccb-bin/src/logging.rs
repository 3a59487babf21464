// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Logging and tracing initialization.

use ccb_config::{LogFormat, LogLevel};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directives applied on top of the chosen level to keep protocol stacks quiet.
const DEPENDENCY_DIRECTIVES: &str = "opcua=warn,tokio_modbus=info,mio=warn";

// =============================================================================
// Logging Initialization
// =============================================================================

/// Initializes the logging subsystem.
///
/// `RUST_LOG`, when set, takes precedence over `level`. Calling this more
/// than once keeps the first subscriber and returns `false`.
///
/// # Example
///
/// ```ignore
/// use ccb_bin::logging::init_logging;
/// use ccb_config::{LogFormat, LogLevel};
///
/// init_logging(LogLevel::Info, LogFormat::Text);
/// ```
pub fn init_logging(level: LogLevel, format: LogFormat) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| build_filter(level));

    match format {
        LogFormat::Text => init_text_logging(env_filter),
        LogFormat::Json => init_json_logging(env_filter),
        LogFormat::Compact => init_compact_logging(env_filter),
    }
}

/// Builds the filter for `level` plus the dependency directives.
pub fn build_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_new(format!("{},{}", level.as_str(), DEPENDENCY_DIRECTIVES))
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Initializes text-based logging (default).
fn init_text_logging(filter: EnvFilter) -> bool {
    let is_terminal = std::io::IsTerminal::is_terminal(&std::io::stdout());

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(is_terminal),
        )
        .try_init()
        .is_ok()
}

/// Initializes JSON logging (for log aggregation).
fn init_json_logging(filter: EnvFilter) -> bool {
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_current_span(true)
                .with_span_list(true),
        )
        .try_init()
        .is_ok()
}

/// Initializes compact logging (minimal output).
fn init_compact_logging(filter: EnvFilter) -> bool {
    let is_terminal = std::io::IsTerminal::is_terminal(&std::io::stdout());

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .compact()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(is_terminal),
        )
        .try_init()
        .is_ok()
}

/// Returns a human-readable description of log levels.
pub fn log_level_help() -> &'static str {
    r#"Log levels (from most to least verbose):
  trace  - Every frame sent and received
  debug  - Protocol and device details
  info   - Experiment and device lifecycle (default)
  warn   - Recoverable problems
  error  - Error messages only"#
}

// =============================================================================
// Tests
// =============================================================================
