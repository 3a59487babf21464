// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # ccb-serial
//!
//! Serial line communication for CCB devices.
//!
//! - [`SerialConfig`]: validated port settings with coercing enum options
//! - [`SerialCommunication`]: terminator-framed text and raw byte exchange,
//!   serialized through one lock
//! - [`transport`]: the port opener seam, with a real `tokio-serial` opener
//!   and an in-memory loopback for tests
//!
//! ```rust,ignore
//! use ccb_serial::{SerialCommunication, SerialConfig};
//!
//! let config = SerialConfig::builder()
//!     .port("/dev/ttyUSB0")
//!     .baudrate(19200)
//!     .terminator("\r")
//!     .build()?;
//! let com = SerialCommunication::new(config)?;
//! com.open().await?;
//! let reply = com.query("*IDN?").await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod comm;
pub mod config;
pub mod error;
pub mod transport;

pub use comm::{SerialCommunication, SerialSession};
pub use config::{ByteSize, Parity, SerialConfig, SerialConfigBuilder, StopBits};
pub use error::{SerialError, SerialResult};
pub use transport::{
    DynSerial, LoopbackOpener, LoopbackPeer, SerialOpener, SerialPortIO, TokioSerialOpener,
};
