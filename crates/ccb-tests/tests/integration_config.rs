// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Configuration Integration Tests
//!
//! Loading experiment files from disk and building managers from them.

use std::time::Duration;

use ccb_config::{
    build_manager, load_config, ConfigError, ConfigFormat, ConfigLoader, LogFormat, LogLevel,
    ProtocolConfig,
};
use ccb_core::{ExperimentStatus, SequenceOrder};
use ccb_tests::common::{init_test_logging, ConfigFixtures};

#[test]
fn test_config_loads_yaml_bench() {
    init_test_logging();
    let file = ConfigFixtures::write_temp(ConfigFixtures::BENCH_YAML, ".yaml");
    let config = ConfigLoader::new()
        .with_env_prefix("CCB_IT_YAML")
        .load(file.path())
        .unwrap();

    assert_eq!(config.experiment.name, "bench-1");
    assert_eq!(config.experiment.stop_order, SequenceOrder::Reverse);
    assert_eq!(config.logging.level, LogLevel::Debug);
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.device_names(), vec!["laser", "pump", "plc", "psu"]);

    match &config.get_device("laser").unwrap().protocol {
        ProtocolConfig::Serial(serial) => {
            assert_eq!(serial.baudrate, 19200);
            assert_eq!(serial.terminator, "\r");
            assert_eq!(serial.timeout, Duration::from_millis(500));
        }
        other => panic!("unexpected protocol: {other:?}"),
    }
    match &config.get_device("pump").unwrap().protocol {
        ProtocolConfig::ModbusTcp(modbus) => {
            assert_eq!(modbus.unit_id, 3);
            assert_eq!(modbus.port, 502);
        }
        other => panic!("unexpected protocol: {other:?}"),
    }
    assert_eq!(
        config.get_device("plc").unwrap().protocol.target(),
        "opc.tcp://10.0.0.5:4840/freeopcua/server/"
    );
    match &config.get_device("psu").unwrap().protocol {
        ProtocolConfig::Visa(visa) => assert_eq!(visa.poll_interval, Duration::from_millis(250)),
        other => panic!("unexpected protocol: {other:?}"),
    }
}

#[test]
fn test_config_loads_toml_bench() {
    let file = ConfigFixtures::write_temp(ConfigFixtures::BENCH_TOML, ".toml");
    let config = ConfigLoader::new()
        .with_env_prefix("CCB_IT_TOML")
        .load(file.path())
        .unwrap();

    assert_eq!(config.device_names(), vec!["laser", "plc"]);
    assert_eq!(config.experiment.stop_order, SequenceOrder::Reverse);
    assert_eq!(config.get_device("plc").unwrap().protocol.protocol_type(), "opcua");
}

#[test]
fn test_config_json_render_reloads() {
    let loader = ConfigLoader::new().with_env_prefix("CCB_IT_JSON");
    let original = loader
        .load_from_str(ConfigFixtures::BENCH_YAML, ConfigFormat::Yaml)
        .unwrap();

    let rendered = ConfigFormat::Json.render(&original).unwrap();
    let file = ConfigFixtures::write_temp(&rendered, ".json");
    let reloaded = loader.load(file.path()).unwrap();

    assert_eq!(reloaded, original);
}

#[test]
fn test_config_yaml_render_reloads() {
    let loader = ConfigLoader::new().with_env_prefix("CCB_IT_RENDER");
    let original = loader
        .load_from_str(ConfigFixtures::BENCH_TOML, ConfigFormat::Toml)
        .unwrap();

    let rendered = ConfigFormat::Yaml.render(&original).unwrap();
    let reloaded = loader.load_from_str(&rendered, ConfigFormat::Yaml).unwrap();

    assert_eq!(reloaded, original);
}

#[test]
fn test_config_placeholder_defaults() {
    let file = ConfigFixtures::write_temp(ConfigFixtures::PLACEHOLDER_YAML, ".yml");
    let config = load_config(file.path()).unwrap();

    assert_eq!(config.experiment.name, "placeholder-bench");
    assert_eq!(
        config.get_device("laser").unwrap().protocol.target(),
        "/dev/ttyS7"
    );
}

#[test]
fn test_config_unsupported_extension() {
    let file = ConfigFixtures::write_temp(ConfigFixtures::BENCH_YAML, ".ini");
    assert!(matches!(
        load_config(file.path()),
        Err(ConfigError::UnsupportedFormat { .. })
    ));
}

#[test]
fn test_config_invalid_device_is_named() {
    let yaml = r#"
devices:
  - name: laser
    protocol: serial
    port: /dev/ttyUSB0
    baudrate: 0
"#;
    let file = ConfigFixtures::write_temp(yaml, ".yaml");
    let err = load_config(file.path()).unwrap_err();

    assert!(matches!(err, ConfigError::InvalidDevice { ref device, .. } if device == "laser"));
}

#[tokio::test]
async fn test_config_builds_manager_from_file() {
    let file = ConfigFixtures::write_temp(ConfigFixtures::BENCH_YAML, ".yaml");
    let config = ConfigLoader::new()
        .with_env_prefix("CCB_IT_MANAGER")
        .load(file.path())
        .unwrap();

    let manager = build_manager(&config).unwrap();
    assert_eq!(
        manager.device_names().await,
        vec!["laser", "pump", "plc", "psu"]
    );
    assert_eq!(manager.stop_order().await, SequenceOrder::Reverse);
    assert_eq!(manager.status(), ExperimentStatus::Initialized);
}
