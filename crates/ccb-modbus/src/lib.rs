// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # ccb-modbus
//!
//! Modbus/TCP communication for CCB devices, built on `tokio-modbus`.
//!
//! Register and coil access goes through [`ModbusTcpCommunication`], which
//! serializes every request through one lock and reports every transport
//! failure as [`ModbusError::Connection`].
//!
//! ```rust,ignore
//! use ccb_modbus::{ModbusTcpCommunication, ModbusTcpConfig};
//!
//! let config = ModbusTcpConfig::builder()
//!     .host("192.168.1.100")
//!     .unit_id(1)
//!     .probe_register(0)
//!     .build()?;
//! let com = ModbusTcpCommunication::new(config)?;
//! com.open().await?;
//! let values = com.read_holding_registers(100, 4).await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod comm;
pub mod config;
pub mod error;

pub use comm::ModbusTcpCommunication;
pub use config::{ModbusTcpConfig, ModbusTcpConfigBuilder};
pub use error::{ModbusError, ModbusResult};
