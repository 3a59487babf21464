// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Device lifecycle.
//!
//! A [`Device`] is anything with an explicit `start()`/`stop()` lifecycle.
//! [`SingleCommDevice`] is the common case: a device that exclusively owns one
//! [`CommunicationProtocol`] and opens/closes it as part of its lifecycle.
//!
//! # Scoped use
//!
//! Two forms guarantee that `stop()` runs on every exit path once `start()`
//! has been attempted:
//!
//! - [`with_started`] runs an async body between start and stop and always
//!   stops, also when `start()` itself failed.
//! - [`DeviceGuard`] holds a started device; dropping it without calling
//!   [`DeviceGuard::stop`] schedules the stop on the runtime.
//!
//! ```rust,ignore
//! use ccb_core::device::{with_started, SingleCommDevice};
//!
//! let device = SingleCommDevice::<SerialCommunication>::from_config(config)?;
//! let reply = with_started(&device, |dev| async move {
//!     dev.com().query("*IDN?").await.map_err(Into::into)
//! })
//! .await?;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::comm::{CommunicationProtocol, FromConfig};
use crate::error::CcbResult;

// =============================================================================
// Device Trait
// =============================================================================

/// A controllable unit with a start/stop lifecycle.
#[async_trait]
pub trait Device: Send + Sync {
    /// Brings the device into a usable state.
    async fn start(&self) -> CcbResult<()>;

    /// Releases the device. Must be safe to call after a failed `start()`.
    async fn stop(&self) -> CcbResult<()>;
}

#[async_trait]
impl<D: Device + ?Sized> Device for Arc<D> {
    async fn start(&self) -> CcbResult<()> {
        (**self).start().await
    }

    async fn stop(&self) -> CcbResult<()> {
        (**self).stop().await
    }
}

// =============================================================================
// Scoped Acquisition
// =============================================================================

/// Starts `device`, runs `body`, then stops the device unconditionally.
///
/// If `start()` fails the device is stopped and the start error returned.
/// If the body fails its error wins over a stop error, which is only logged.
pub async fn with_started<'a, D, F, Fut, T>(device: &'a D, body: F) -> CcbResult<T>
where
    D: Device + ?Sized,
    F: FnOnce(&'a D) -> Fut,
    Fut: Future<Output = CcbResult<T>>,
{
    if let Err(e) = device.start().await {
        if let Err(stop_error) = device.stop().await {
            warn!(error = %stop_error, "Stop after failed start also failed");
        }
        return Err(e);
    }

    let result = body(device).await;
    let stopped = device.stop().await;

    match (result, stopped) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(stop_error)) => Err(stop_error),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(stop_error)) => {
            warn!(error = %stop_error, "Stop after failed body also failed");
            Err(e)
        }
    }
}

/// A started device that is stopped when the guard goes away.
///
/// Prefer [`DeviceGuard::stop`], which reports the stop outcome. When the
/// guard is dropped instead (early return, panic unwinding) the stop is
/// spawned onto the current tokio runtime and its failure is logged.
pub struct DeviceGuard {
    device: Option<Arc<dyn Device>>,
}

impl DeviceGuard {
    /// Starts `device` and wraps it.
    ///
    /// # Errors
    ///
    /// Returns the start error after stopping the device.
    pub async fn start(device: Arc<dyn Device>) -> CcbResult<Self> {
        if let Err(e) = device.start().await {
            if let Err(stop_error) = device.stop().await {
                warn!(error = %stop_error, "Stop after failed start also failed");
            }
            return Err(e);
        }
        Ok(Self {
            device: Some(device),
        })
    }

    /// The guarded device.
    pub fn device(&self) -> Option<&Arc<dyn Device>> {
        self.device.as_ref()
    }

    /// Stops the device and consumes the guard.
    pub async fn stop(mut self) -> CcbResult<()> {
        match self.device.take() {
            Some(device) => device.stop().await,
            None => Ok(()),
        }
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        let Some(device) = self.device.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Device guard dropped, stopping device in background");
                handle.spawn(async move {
                    if let Err(e) = device.stop().await {
                        warn!(error = %e, "Background stop of dropped device failed");
                    }
                });
            }
            Err(_) => warn!("Device guard dropped outside a runtime, device not stopped"),
        }
    }
}

impl fmt::Debug for DeviceGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceGuard")
            .field("active", &self.device.is_some())
            .finish()
    }
}

// =============================================================================
// SingleCommDevice
// =============================================================================

/// A device that exclusively owns one communication protocol.
///
/// `start()` opens the protocol and `stop()` closes it. Devices with a
/// richer command set wrap this type and add their commands on top of
/// [`SingleCommDevice::com`].
pub struct SingleCommDevice<C: CommunicationProtocol> {
    com: Arc<C>,
}

impl<C: CommunicationProtocol> SingleCommDevice<C> {
    /// Wraps an already built protocol instance (open or not).
    pub fn new(com: C) -> Self {
        Self { com: Arc::new(com) }
    }

    /// Builds the protocol from a plain configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the protocol rejects `config`.
    pub fn from_config(config: C::Config) -> CcbResult<Self>
    where
        C: FromConfig,
    {
        let com = C::from_config(config)?;
        debug!(target = %com.display_name(), "Built communication protocol from configuration");
        Ok(Self::new(com))
    }

    /// The owned protocol; shared with background pollers of this device.
    pub fn com(&self) -> &Arc<C> {
        &self.com
    }
}

#[async_trait]
impl<C: CommunicationProtocol> Device for SingleCommDevice<C> {
    async fn start(&self) -> CcbResult<()> {
        self.com.open().await
    }

    async fn stop(&self) -> CcbResult<()> {
        self.com.close().await
    }
}

impl<C: CommunicationProtocol> fmt::Debug for SingleCommDevice<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleCommDevice")
            .field("com", &self.com.display_name())
            .field("state", &self.com.state())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
