// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures
//!
//! Configuration texts and prepared values shared by the integration tests.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use ccb_opcua::{OpcUaCommunication, OpcUaConfig};
use ccb_serial::{LoopbackOpener, LoopbackPeer, SerialCommunication, SerialConfig};
use tempfile::NamedTempFile;
use tokio::sync::mpsc;

use super::mocks::MockOpcUaTransport;

// =============================================================================
// Configuration Texts
// =============================================================================

/// Configuration fixtures.
pub struct ConfigFixtures;

impl ConfigFixtures {
    /// A bench with one device of every protocol, in YAML.
    pub const BENCH_YAML: &'static str = r#"
experiment:
  name: bench-1
  description: one device per protocol
  stop_order: reverse
logging:
  level: debug
  format: json
devices:
  - name: laser
    protocol: serial
    port: /dev/ttyUSB0
    baudrate: 19200
    terminator: "\r"
    timeout: 500ms
  - name: pump
    protocol: modbus_tcp
    host: 10.0.0.8
    unit: 3
    probe_register: 0
  - name: plc
    protocol: opcua
    host: 10.0.0.5
    endpoint_name: /freeopcua/server/
    max_timeout_retry_nr: 2
  - name: psu
    protocol: visa
    host: 10.0.0.7
    poll_interval: 250ms
"#;

    /// The same bench in TOML.
    pub const BENCH_TOML: &'static str = r#"
[experiment]
name = "bench-1"
stop_order = "reverse"

[[devices]]
name = "laser"
protocol = "serial"
port = "/dev/ttyUSB0"
baudrate = 19200

[[devices]]
name = "plc"
protocol = "opcua"
host = "10.0.0.5"
"#;

    /// A bench with placeholders for host and port.
    pub const PLACEHOLDER_YAML: &'static str = r#"
experiment:
  name: ${CCB_FIXTURE_EXPERIMENT:placeholder-bench}
devices:
  - name: laser
    protocol: serial
    port: ${CCB_FIXTURE_UNSET_PORT:/dev/ttyS7}
"#;

    /// Writes `content` to a temporary file with `suffix`.
    pub fn write_temp(content: &str, suffix: &str) -> NamedTempFile {
        let mut file = NamedTempFile::with_suffix(suffix).expect("create temp file");
        file.write_all(content.as_bytes()).expect("write temp file");
        file.flush().expect("flush temp file");
        file
    }
}

// =============================================================================
// Protocol Fixtures
// =============================================================================

/// Serial fixtures over the loopback port.
pub struct SerialFixtures;

impl SerialFixtures {
    /// A loopback serial communication and the channel its peers arrive on.
    pub fn loopback(port: &str) -> (SerialCommunication, mpsc::UnboundedReceiver<LoopbackPeer>) {
        let config = SerialConfig::builder()
            .port(port)
            .terminator("\n")
            .timeout(Duration::from_millis(200))
            .build()
            .expect("valid serial config");
        let (opener, peers) = LoopbackOpener::new();
        let com = SerialCommunication::with_opener(config, Arc::new(opener))
            .expect("valid serial communication");
        (com, peers)
    }
}

/// OPC UA fixtures over the mock transport.
pub struct OpcUaFixtures;

impl OpcUaFixtures {
    /// Configuration with short retry waits.
    pub fn config(max_timeout_retry_nr: u32) -> OpcUaConfig {
        OpcUaConfig::builder()
            .host("plc.local")
            .wait_timeout_retry(Duration::from_millis(100))
            .max_timeout_retry_nr(max_timeout_retry_nr)
            .build()
            .expect("valid opcua config")
    }

    /// A communication bound to a fresh mock transport.
    pub fn mock(max_timeout_retry_nr: u32) -> (OpcUaCommunication, Arc<MockOpcUaTransport>) {
        let transport = MockOpcUaTransport::new().shared();
        let com = OpcUaCommunication::with_transport(
            Self::config(max_timeout_retry_nr),
            Arc::clone(&transport) as Arc<dyn ccb_opcua::OpcUaTransport>,
        )
        .expect("valid opcua communication");
        (com, transport)
    }
}
