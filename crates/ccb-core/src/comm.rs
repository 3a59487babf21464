// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Communication protocol abstraction.
//!
//! A [`CommunicationProtocol`] owns exactly one transport handle (serial port,
//! TCP socket, OPC UA session) together with the lock that serializes access
//! to it. Concrete protocols live in their own crates (`ccb-serial`,
//! `ccb-modbus`, `ccb-opcua`, `ccb-visa`) and only the lifecycle part of
//! their API is shared here.
//!
//! # Contract
//!
//! - `open()` raises a typed connection error on failure but treats an
//!   already open transport as success (logged, not raised).
//! - `close()` always releases the handle; closing a closed protocol is a
//!   no-op.
//! - `is_open()` probes the transport. Network protocols perform a real
//!   round-trip and close themselves when the probe finds a dead link.
//! - Every data exchange holds the protocol lock for its whole duration.

use std::fmt;

use async_trait::async_trait;

use crate::error::CcbResult;

// =============================================================================
// ProtocolState
// =============================================================================

/// Lifecycle state of a protocol instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolState {
    /// Constructed or closed; no transport handle.
    #[default]
    Closed,
    /// `open()` in progress.
    Opening,
    /// Transport handle is live.
    Open,
    /// The last open or probe failed.
    Error,
}

impl ProtocolState {
    /// Returns `true` if a transport handle is held.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Error => "error",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// CommunicationProtocol Trait
// =============================================================================

/// Serialized, fail-safe access to one transport.
///
/// Methods take `&self`: implementations keep their transport behind an
/// internal async mutex so one instance can be shared between foreground
/// commands and a device's background poller.
///
/// # Example
///
/// ```rust,ignore
/// use ccb_core::comm::CommunicationProtocol;
///
/// async fn cycle<C: CommunicationProtocol>(com: &C) -> ccb_core::CcbResult<()> {
///     com.open().await?;
///     com.open().await?; // already open: logged, not an error
///     assert!(com.is_open().await);
///     com.close().await
/// }
/// ```
#[async_trait]
pub trait CommunicationProtocol: Send + Sync + 'static {
    /// Short protocol identifier used in logs and errors (`"serial"`, ...).
    fn protocol(&self) -> &'static str;

    /// Human readable target (port name, `host:port`, resource string).
    fn target(&self) -> String;

    /// Opens the transport.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the transport cannot be established.
    async fn open(&self) -> CcbResult<()>;

    /// Closes the transport and releases its handle.
    async fn close(&self) -> CcbResult<()>;

    /// Probes whether the transport is usable.
    async fn is_open(&self) -> bool;

    /// Returns the last known lifecycle state without probing.
    fn state(&self) -> ProtocolState;

    /// Display name combining protocol and target.
    fn display_name(&self) -> String {
        format!("{}://{}", self.protocol(), self.target())
    }
}

// =============================================================================
// FromConfig Trait
// =============================================================================

/// Builds a closed protocol instance from its configuration.
///
/// This is the path by which plain configuration values become live
/// connections; see [`SingleCommDevice::from_config`](crate::device::SingleCommDevice::from_config).
pub trait FromConfig: Sized {
    /// The validated configuration type.
    type Config: Clone + Send + Sync + 'static;

    /// Creates the protocol. The transport is not opened.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the configuration is rejected.
    fn from_config(config: Self::Config) -> CcbResult<Self>;

    /// Returns the configuration the instance was built from.
    fn config(&self) -> &Self::Config;
}

// =============================================================================
// Tests
// =============================================================================
