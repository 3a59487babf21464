// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `validate` command.

use std::collections::HashMap;

use ccb_config::{build_manager, load_config, ExperimentConfig};

use crate::cli::{Cli, OutputFormat, ValidateArgs};
use crate::error::{BinError, BinResult};

/// Executes the `validate` command.
///
/// Every device is built, but no connection is opened.
pub fn validate(cli: &Cli, args: ValidateArgs) -> BinResult<()> {
    let config_path = &cli.config;

    let config = load_config(config_path)
        .map_err(|e| BinError::from(e).with_context("Configuration validation failed"))?;
    build_manager(&config)?;

    let warnings = collect_warnings(&config);

    match args.format {
        OutputFormat::Text => {
            println!("✓ Configuration is valid: {}", config_path.display());
            println!();
            println!("Summary:");
            println!("  Experiment: {}", config.experiment.name);
            println!("  Stop order: {}", config.experiment.stop_order);
            println!("  Devices: {}", config.devices.len());
            for device in &config.devices {
                println!(
                    "    {} ({}): {}",
                    device.name,
                    device.protocol.protocol_type(),
                    device.protocol.target()
                );
            }

            if !warnings.is_empty() {
                println!();
                println!("Warnings:");
                for warning in &warnings {
                    println!("  ⚠ {}", warning);
                }
            }

            if args.show_config {
                println!();
                println!("Parsed configuration:");
                println!("{}", render_json(&config)?);
            }
        }
        OutputFormat::Json => {
            let devices: Vec<_> = config
                .devices
                .iter()
                .map(|d| {
                    serde_json::json!({
                        "name": d.name,
                        "protocol": d.protocol.protocol_type(),
                        "target": d.protocol.target(),
                    })
                })
                .collect();
            let output = serde_json::json!({
                "valid": true,
                "config_path": config_path.display().to_string(),
                "summary": {
                    "experiment": config.experiment.name,
                    "stop_order": config.experiment.stop_order,
                    "devices": devices,
                },
                "warnings": warnings,
                "config": if args.show_config { Some(&config) } else { None },
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&output)
                    .map_err(|e| BinError::output(format!("Failed to render output: {e}")))?
            );
        }
        OutputFormat::Yaml => {
            println!("valid: true");
            println!("config_path: {}", config_path.display());
            println!("experiment: {}", config.experiment.name);
            println!("device_count: {}", config.devices.len());
            if !warnings.is_empty() {
                println!("warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
            if args.show_config {
                let rendered = serde_yaml::to_string(&config)
                    .map_err(|e| BinError::output(format!("Failed to render output: {e}")))?;
                println!("config:");
                for line in rendered.lines() {
                    println!("  {}", line);
                }
            }
        }
    }

    if args.strict && !warnings.is_empty() {
        return Err(BinError::config(format!(
            "Strict mode: {} warning(s) found",
            warnings.len()
        )));
    }

    Ok(())
}

fn render_json(config: &ExperimentConfig) -> BinResult<String> {
    serde_json::to_string_pretty(config)
        .map_err(|e| BinError::output(format!("Failed to render configuration: {e}")))
}

/// Problems that do not make the configuration invalid.
pub(crate) fn collect_warnings(config: &ExperimentConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.devices.is_empty() {
        warnings.push("No devices configured".to_string());
    }

    let mut targets: HashMap<String, Vec<&str>> = HashMap::new();
    for device in &config.devices {
        targets
            .entry(device.protocol.target())
            .or_default()
            .push(device.name.as_str());
    }
    let mut shared: Vec<_> = targets.into_iter().filter(|(_, names)| names.len() > 1).collect();
    shared.sort();
    for (target, names) in shared {
        warnings.push(format!(
            "Devices {} share the target {}",
            names.join(", "),
            target
        ));
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccb_config::{DeviceEntry, ProtocolConfig};
    use ccb_serial::SerialConfig;

    #[test]
    fn test_empty_config_warns() {
        let warnings = collect_warnings(&ExperimentConfig::default());
        assert_eq!(warnings, vec!["No devices configured".to_string()]);
    }

    #[test]
    fn test_shared_port_warns() {
        let config = ExperimentConfig {
            devices: vec![
                DeviceEntry::new("a", ProtocolConfig::Serial(SerialConfig::new("COM1"))),
                DeviceEntry::new("b", ProtocolConfig::Serial(SerialConfig::new("COM1"))),
                DeviceEntry::new("c", ProtocolConfig::Serial(SerialConfig::new("COM2"))),
            ],
            ..Default::default()
        };
        let warnings = collect_warnings(&config);
        assert_eq!(warnings, vec!["Devices a, b share the target COM1".to_string()]);
    }
}
