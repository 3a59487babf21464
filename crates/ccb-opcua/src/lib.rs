// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # ccb-opcua
//!
//! OPC UA client communication for CCB devices.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              OpcUaCommunication              │
//! │   (lock, open/close, read/write/subscribe)   │
//! ├──────────────────────────────────────────────┤
//! │                retry::execute                │
//! │    (failure classification, timeout retry)   │
//! ├──────────────────────────────────────────────┤
//! │            dyn OpcUaTransport                │
//! │  (RealOpcUaTransport over the opcua crate)   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Every transport failure carries a [`FailureKind`]. Address resolution,
//! socket, cancellation and protocol failures are raised at once as
//! [`OpcUaError::Io`]. Timeouts are retried after
//! [`OpcUaConfig::wait_timeout_retry`], at most
//! [`OpcUaConfig::max_timeout_retry_nr`] times per call, and then raised as
//! [`OpcUaError::Timeout`].
//!
//! ```rust,ignore
//! use ccb_opcua::{OpcUaCommunication, OpcUaConfig, OpcUaValue};
//!
//! let config = OpcUaConfig::builder().host("10.0.0.5").build()?;
//! let com = OpcUaCommunication::new(config)?;
//! com.open().await?;
//! com.write("\"Ix_Allg_Remote\"", 3, OpcUaValue::Boolean(true)).await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod comm;
pub mod config;
pub mod error;
pub mod handler;
pub mod real_transport;
pub mod retry;
pub mod transport;
pub mod types;

pub use comm::OpcUaCommunication;
pub use config::{OpcUaConfig, OpcUaConfigBuilder};
pub use error::{FailureKind, OpcUaError, OpcUaResult, TransportFailure};
pub use handler::{DataChange, DataChangeHandler, LoggingHandler};
pub use real_transport::RealOpcUaTransport;
pub use retry::RetryPolicy;
pub use transport::OpcUaTransport;
pub use types::{NodeId, NodeIdentifier, OpcUaValue, SERVER_STATE_NODE};
