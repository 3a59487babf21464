// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # ccb-visa
//!
//! SCPI instruments over VISA resources for CCB devices.
//!
//! - [`VisaConfig`]: resource description (`TCPIP0::host::5025::SOCKET`)
//! - [`VisaCommunication`]: write, query and status byte poll, serialized
//!   through one lock
//! - [`VisaDevice`]: a single communication device that polls the status
//!   byte in the background while started
//! - [`backend`]: the resource seam. Raw sockets work out of the box; the
//!   `ni-visa` feature adds the vendor library through `visa-rs`.
//!
//! ```rust,ignore
//! use ccb_visa::{VisaCommunication, VisaConfig};
//!
//! let com = VisaCommunication::new(VisaConfig::builder().host("10.0.0.7").build()?)?;
//! com.open().await?;
//! com.write(&["VOLT 10", "OUTP ON"]).await?;
//! let answers = com.query(&["MEAS:VOLT?", "MEAS:CURR?"]).await?;
//! let status = com.spoll().await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod backend;
pub mod comm;
pub mod config;
pub mod device;
pub mod error;
#[cfg(feature = "ni-visa")]
pub mod ni_visa;
pub mod status;

#[cfg(test)]
mod testing;

pub use backend::{default_backend, TcpSocketBackend, VisaBackend, VisaSession};
pub use comm::VisaCommunication;
pub use config::{InterfaceType, VisaConfig, VisaConfigBuilder, VisaDeviceConfig};
pub use device::{StatusSnapshot, VisaDevice};
pub use error::{VisaError, VisaResult};
#[cfg(feature = "ni-visa")]
pub use ni_visa::NiVisaBackend;
pub use status::{EventStatus, StatusByte};
