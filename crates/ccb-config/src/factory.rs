// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Turns configuration entries into devices and experiments.

use std::sync::Arc;

use ccb_core::{CcbResult, Device, ExperimentManager, SingleCommDevice};
use ccb_modbus::ModbusTcpCommunication;
use ccb_opcua::OpcUaCommunication;
use ccb_serial::SerialCommunication;
use ccb_visa::VisaDevice;
use tracing::{debug, info};

use crate::schema::{DeviceEntry, ExperimentConfig, ProtocolConfig};

/// Builds the device described by `entry`. Nothing is opened.
///
/// Serial, Modbus/TCP and OPC UA entries become a [`SingleCommDevice`];
/// VISA entries become a [`VisaDevice`] with status polling.
///
/// # Errors
///
/// Returns a configuration error if the protocol rejects its settings.
pub fn build_device(entry: &DeviceEntry) -> CcbResult<Arc<dyn Device>> {
    let device: Arc<dyn Device> = match &entry.protocol {
        ProtocolConfig::Serial(config) => Arc::new(
            SingleCommDevice::<SerialCommunication>::from_config(config.clone())?,
        ),
        ProtocolConfig::ModbusTcp(config) => Arc::new(
            SingleCommDevice::<ModbusTcpCommunication>::from_config(config.clone())?,
        ),
        ProtocolConfig::OpcUa(config) => Arc::new(
            SingleCommDevice::<OpcUaCommunication>::from_config(config.clone())?,
        ),
        ProtocolConfig::Visa(config) => Arc::new(VisaDevice::new(config.clone())?),
    };

    debug!(
        device = %entry.name,
        protocol = entry.protocol.protocol_type(),
        target = %entry.protocol.target(),
        "Built device"
    );
    Ok(device)
}

/// Builds an [`ExperimentManager`] owning every configured device in order.
///
/// # Errors
///
/// Fails if the configuration is invalid or a device cannot be built.
pub fn build_manager(config: &ExperimentConfig) -> CcbResult<ExperimentManager> {
    config.validate()?;

    let devices = config
        .devices
        .iter()
        .map(|entry| Ok((entry.name.clone(), build_device(entry)?)))
        .collect::<CcbResult<Vec<_>>>()?;

    let manager =
        ExperimentManager::with_devices(devices)?.with_stop_order(config.experiment.stop_order);

    info!(
        experiment = %config.experiment.name,
        devices = config.devices.len(),
        stop_order = %config.experiment.stop_order,
        "Experiment assembled"
    );
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use ccb_core::{CcbError, ExperimentStatus, SequenceOrder};
    use ccb_modbus::ModbusTcpConfig;
    use ccb_opcua::OpcUaConfig;
    use ccb_serial::SerialConfig;
    use ccb_visa::{VisaConfig, VisaDeviceConfig};

    fn config() -> ExperimentConfig {
        let mut config = ExperimentConfig {
            devices: vec![
                DeviceEntry::new("laser", ProtocolConfig::Serial(SerialConfig::new("/dev/ttyUSB0"))),
                DeviceEntry::new("pump", ProtocolConfig::ModbusTcp(ModbusTcpConfig::new("10.0.0.8"))),
                DeviceEntry::new("plc", ProtocolConfig::OpcUa(OpcUaConfig::new("10.0.0.5"))),
                DeviceEntry::new(
                    "psu",
                    ProtocolConfig::Visa(VisaDeviceConfig::new(VisaConfig::new("10.0.0.7"))),
                ),
            ],
            ..Default::default()
        };
        config.experiment.stop_order = SequenceOrder::Reverse;
        config
    }

    #[tokio::test]
    async fn test_build_manager_keeps_order() {
        let manager = build_manager(&config()).unwrap();
        assert_eq!(manager.status(), ExperimentStatus::Initialized);
        assert_eq!(manager.device_names().await, vec!["laser", "pump", "plc", "psu"]);
        assert_eq!(manager.stop_order().await, SequenceOrder::Reverse);
    }

    #[test]
    fn test_build_manager_rejects_invalid() {
        let mut config = config();
        config.devices.push(config.devices[0].clone());
        assert!(matches!(
            build_manager(&config),
            Err(CcbError::Configuration(_))
        ));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateDevice { .. })
        ));
    }

    #[test]
    fn test_build_device_rejects_invalid_protocol() {
        let entry = DeviceEntry::new("laser", ProtocolConfig::Serial(SerialConfig::new("")));
        assert!(matches!(build_device(&entry), Err(CcbError::Configuration(_))));
    }
}
