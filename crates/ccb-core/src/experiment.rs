// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Experiment lifecycle state machine.
//!
//! [`ExperimentManager`] wraps a [`DeviceSequence`] behind seven states:
//!
//! ```text
//! INITIALIZING ──new()──────► INITIALIZED
//! INITIALIZED | FINISHED ──run()──► STARTING ──ok──► RUNNING
//!                                       └──error──► ERROR
//! RUNNING ──finish()──► FINISHING ──ok──► FINISHED
//!                           └──error──► ERROR
//! ```
//!
//! Every lifecycle call takes the sequence lock first, so transitions are
//! strictly sequential even with concurrent callers. Status can be read at
//! any time without waiting, and observed through [`ExperimentManager::subscribe_status`].
//!
//! Once in `ERROR` the manager refuses `run()` and `add_device()`. `finish()`
//! is still accepted as a best-effort teardown of the devices, but the status
//! stays `ERROR`.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use crate::device::Device;
use crate::error::{CcbError, CcbResult, ExperimentError};
use crate::sequence::{DeviceSequence, SequenceOrder};

// =============================================================================
// ExperimentStatus
// =============================================================================

/// Status of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentStatus {
    /// Manager is being constructed.
    Initializing,
    /// Constructed, devices not started.
    Initialized,
    /// `run()` in progress.
    Starting,
    /// All devices started.
    Running,
    /// `finish()` in progress.
    Finishing,
    /// All devices stopped.
    Finished,
    /// A lifecycle operation failed.
    Error,
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initializing => "INITIALIZING",
            Self::Initialized => "INITIALIZED",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Finishing => "FINISHING",
            Self::Finished => "FINISHED",
            Self::Error => "ERROR",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// ExperimentManager
// =============================================================================

/// Runs a set of devices as one experiment.
///
/// # Example
///
/// ```rust,ignore
/// use ccb_core::experiment::{ExperimentManager, ExperimentStatus};
///
/// let manager = ExperimentManager::with_devices([
///     ("supply", supply as Arc<dyn Device>),
///     ("laser", laser as Arc<dyn Device>),
/// ])?;
///
/// manager.run().await?;
/// assert_eq!(manager.status(), ExperimentStatus::Running);
/// manager.finish().await?;
/// ```
pub struct ExperimentManager {
    status: watch::Sender<ExperimentStatus>,
    sequence: Mutex<DeviceSequence>,
}

impl ExperimentManager {
    /// Creates a manager without devices.
    pub fn new() -> Self {
        let (status, _) = watch::channel(ExperimentStatus::Initializing);
        let manager = Self {
            status,
            sequence: Mutex::new(DeviceSequence::new()),
        };
        manager.change_status(ExperimentStatus::Initialized);
        manager
    }

    /// Creates a manager owning the given devices, in order.
    ///
    /// # Errors
    ///
    /// Fails on duplicate or reserved device names.
    pub fn with_devices<I, S>(devices: I) -> CcbResult<Self>
    where
        I: IntoIterator<Item = (S, Arc<dyn Device>)>,
        S: Into<String>,
    {
        let (status, _) = watch::channel(ExperimentStatus::Initializing);
        let manager = Self {
            status,
            sequence: Mutex::new(DeviceSequence::with_devices(devices)?),
        };
        manager.change_status(ExperimentStatus::Initialized);
        Ok(manager)
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Current status.
    pub fn status(&self) -> ExperimentStatus {
        *self.status.borrow()
    }

    /// Receiver notified on every status change.
    pub fn subscribe_status(&self) -> watch::Receiver<ExperimentStatus> {
        self.status.subscribe()
    }

    /// Returns `true` while the experiment is starting or running.
    pub fn is_running(&self) -> bool {
        matches!(
            self.status(),
            ExperimentStatus::Starting | ExperimentStatus::Running
        )
    }

    /// Returns `true` while the experiment is finishing or finished.
    pub fn is_finished(&self) -> bool {
        matches!(
            self.status(),
            ExperimentStatus::Finishing | ExperimentStatus::Finished
        )
    }

    /// Returns `true` if the experiment is in `ERROR`.
    pub fn is_error(&self) -> bool {
        self.status() == ExperimentStatus::Error
    }

    fn change_status(&self, new: ExperimentStatus) {
        let old = self.status.send_replace(new);
        if old != new {
            info!(from = %old, to = %new, "Experiment status changed");
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Starts every device.
    ///
    /// Allowed from `INITIALIZED` and `FINISHED`. Calling it while already
    /// running is a logged no-op.
    ///
    /// # Errors
    ///
    /// Any device failure moves the experiment to `ERROR` and is returned
    /// wrapped in [`ExperimentError::Failed`].
    pub async fn run(&self) -> CcbResult<()> {
        let mut sequence = self.sequence.lock().await;

        match self.status() {
            ExperimentStatus::Initialized | ExperimentStatus::Finished => {}
            ExperimentStatus::Running => {
                warn!("Experiment is already running");
                return Ok(());
            }
            ExperimentStatus::Error => {
                return Err(ExperimentError::InErrorState { operation: "run" }.into());
            }
            status => {
                return Err(ExperimentError::InvalidState {
                    operation: "run",
                    status,
                }
                .into());
            }
        }

        self.change_status(ExperimentStatus::Starting);
        match sequence.start().await {
            Ok(()) => {
                self.change_status(ExperimentStatus::Running);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Experiment failed to start");
                self.change_status(ExperimentStatus::Error);
                Err(ExperimentError::failed("run", e).into())
            }
        }
    }

    /// Stops every device.
    ///
    /// Allowed from `RUNNING`; from `INITIALIZED` or `FINISHED` it is a logged
    /// no-op. From `ERROR` devices are stopped but the status is kept.
    ///
    /// # Errors
    ///
    /// Any device failure moves the experiment to `ERROR` and is returned
    /// wrapped in [`ExperimentError::Failed`].
    pub async fn finish(&self) -> CcbResult<()> {
        let mut sequence = self.sequence.lock().await;

        match self.status() {
            ExperimentStatus::Running => {}
            ExperimentStatus::Initialized | ExperimentStatus::Finished => {
                warn!("Experiment is not running, nothing to finish");
                return Ok(());
            }
            ExperimentStatus::Error => {
                warn!("Stopping devices of failed experiment");
                return sequence
                    .stop()
                    .await
                    .map_err(|e| ExperimentError::failed("finish", e).into());
            }
            status => {
                return Err(ExperimentError::InvalidState {
                    operation: "finish",
                    status,
                }
                .into());
            }
        }

        self.change_status(ExperimentStatus::Finishing);
        match sequence.stop().await {
            Ok(()) => {
                self.change_status(ExperimentStatus::Finished);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Experiment failed to finish");
                self.change_status(ExperimentStatus::Error);
                Err(ExperimentError::failed("finish", e).into())
            }
        }
    }

    // =========================================================================
    // Devices
    // =========================================================================

    /// Adds a device.
    ///
    /// While `RUNNING` the device is started right away on the caller's task;
    /// if that start fails the experiment moves to `ERROR`.
    ///
    /// # Errors
    ///
    /// - [`ExperimentError::InErrorState`] while in `ERROR`.
    /// - [`CcbError::DeviceExists`] / [`CcbError::InvalidDeviceName`] for bad names.
    /// - [`ExperimentError::Failed`] if the immediate start fails.
    pub async fn add_device(&self, name: impl Into<String>, device: Arc<dyn Device>) -> CcbResult<()> {
        let name = name.into();
        let mut sequence = self.sequence.lock().await;

        let status = self.status();
        if status == ExperimentStatus::Error {
            return Err(ExperimentError::InErrorState {
                operation: "add_device",
            }
            .into());
        }

        sequence.add_device(name.clone(), Arc::clone(&device))?;

        if status == ExperimentStatus::Running {
            info!(device = %name, "Starting device added to running experiment");
            if let Err(e) = device.start().await {
                error!(device = %name, error = %e, "Could not start added device");
                sequence.record_failed_start(&name);
                self.change_status(ExperimentStatus::Error);
                return Err(ExperimentError::failed("add_device", e).into());
            }
        }
        Ok(())
    }

    /// Removes a device. Refused while the experiment is running.
    ///
    /// # Errors
    ///
    /// - [`ExperimentError::InvalidState`] while starting, running or finishing.
    /// - [`CcbError::UnknownDevice`] if the name is unknown.
    pub async fn remove_device(&self, name: &str) -> CcbResult<Arc<dyn Device>> {
        let mut sequence = self.sequence.lock().await;
        let status = self.status();
        if matches!(
            status,
            ExperimentStatus::Starting | ExperimentStatus::Running | ExperimentStatus::Finishing
        ) {
            return Err(ExperimentError::InvalidState {
                operation: "remove_device",
                status,
            }
            .into());
        }
        sequence.remove_device(name)
    }

    /// Looks up a device by name.
    pub async fn get_device(&self, name: &str) -> Option<Arc<dyn Device>> {
        self.sequence.lock().await.get_device(name)
    }

    /// Device names in start order.
    pub async fn device_names(&self) -> Vec<String> {
        self.sequence.lock().await.device_names()
    }

    /// Devices that failed in the last start pass.
    pub async fn devices_failed_start(&self) -> BTreeSet<String> {
        self.sequence.lock().await.devices_failed_start().clone()
    }

    /// Devices that failed in the last stop pass.
    pub async fn devices_failed_stop(&self) -> BTreeSet<String> {
        self.sequence.lock().await.devices_failed_stop().clone()
    }

    /// Sets the order in which `finish()` stops devices.
    pub async fn set_stop_order(&self, order: SequenceOrder) {
        self.sequence.lock().await.set_stop_order(order);
    }

    /// Order in which `finish()` stops devices.
    pub async fn stop_order(&self) -> SequenceOrder {
        self.sequence.lock().await.stop_order()
    }

    /// Builder form of [`set_stop_order`](Self::set_stop_order).
    pub fn with_stop_order(mut self, order: SequenceOrder) -> Self {
        self.sequence.get_mut().set_stop_order(order);
        self
    }
}

impl Default for ExperimentManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExperimentManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ExperimentManager");
        s.field("status", &self.status());
        match self.sequence.try_lock() {
            Ok(sequence) => s.field("devices", &sequence.device_names()),
            Err(_) => s.field("devices", &"<busy>"),
        };
        s.finish()
    }
}

/// Unwraps the failure carried by an [`ExperimentError::Failed`].
pub fn experiment_failure(error: &CcbError) -> Option<&CcbError> {
    match error {
        CcbError::Experiment(e) => e.inner(),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Default)]
    struct Switch {
        fail_start: AtomicBool,
        starts: AtomicU32,
        stops: AtomicU32,
    }

    impl Switch {
        fn failing() -> Arc<Self> {
            let switch = Self::default();
            switch.fail_start.store(true, Ordering::SeqCst);
            Arc::new(switch)
        }
    }

    #[async_trait]
    impl Device for Switch {
        async fn start(&self) -> CcbResult<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(CcbError::device("interlock open"));
            }
            Ok(())
        }

        async fn stop(&self) -> CcbResult<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_run_finish_cycle() {
        let a = Arc::new(Switch::default());
        let manager = ExperimentManager::with_devices([("a", a.clone() as Arc<dyn Device>)]).unwrap();
        assert_eq!(manager.status(), ExperimentStatus::Initialized);

        manager.run().await.unwrap();
        assert_eq!(manager.status(), ExperimentStatus::Running);
        assert!(manager.is_running());

        manager.finish().await.unwrap();
        assert_eq!(manager.status(), ExperimentStatus::Finished);

        // A finished experiment can be run again.
        manager.run().await.unwrap();
        assert_eq!(a.starts.load(Ordering::SeqCst), 2);
        assert_eq!(a.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_failure_moves_to_error() {
        let manager = ExperimentManager::with_devices([
            ("ok", Arc::new(Switch::default()) as Arc<dyn Device>),
            ("bad", Switch::failing() as Arc<dyn Device>),
        ])
        .unwrap();

        let error = manager.run().await.unwrap_err();
        assert!(error.is_experiment());
        assert!(matches!(
            experiment_failure(&error),
            Some(CcbError::DeviceFailures(_))
        ));
        assert_eq!(manager.status(), ExperimentStatus::Error);
        assert!(manager.devices_failed_start().await.contains("bad"));

        // ERROR is sticky.
        assert!(manager.run().await.unwrap_err().is_experiment());
        let added = manager
            .add_device("late", Arc::new(Switch::default()))
            .await
            .unwrap_err();
        assert!(matches!(
            added,
            CcbError::Experiment(ExperimentError::InErrorState { .. })
        ));
        assert_eq!(manager.status(), ExperimentStatus::Error);
    }

    #[tokio::test]
    async fn test_finish_from_error_stops_devices_but_keeps_status() {
        let ok = Arc::new(Switch::default());
        let manager = ExperimentManager::with_devices([
            ("ok", ok.clone() as Arc<dyn Device>),
            ("bad", Switch::failing() as Arc<dyn Device>),
        ])
        .unwrap();

        let _ = manager.run().await;
        manager.finish().await.unwrap();
        assert_eq!(ok.stops.load(Ordering::SeqCst), 1);
        assert_eq!(manager.status(), ExperimentStatus::Error);
    }

    #[tokio::test]
    async fn test_add_device_while_running_starts_it() {
        let manager = ExperimentManager::new();
        manager.run().await.unwrap();

        let late = Arc::new(Switch::default());
        manager.add_device("late", late.clone()).await.unwrap();
        assert_eq!(late.starts.load(Ordering::SeqCst), 1);
        assert_eq!(manager.status(), ExperimentStatus::Running);

        let broken = Switch::failing();
        let error = manager.add_device("broken", broken).await.unwrap_err();
        assert!(error.is_experiment());
        assert_eq!(manager.status(), ExperimentStatus::Error);
        assert!(manager.devices_failed_start().await.contains("broken"));
    }

    #[tokio::test]
    async fn test_add_device_before_run_does_not_start() {
        let manager = ExperimentManager::new();
        let device = Arc::new(Switch::default());
        manager.add_device("pump", device.clone()).await.unwrap();
        assert_eq!(device.starts.load(Ordering::SeqCst), 0);

        assert!(matches!(
            manager.add_device("pump", device.clone()).await,
            Err(CcbError::DeviceExists(_))
        ));
        assert!(matches!(
            manager.add_device("run", device).await,
            Err(CcbError::InvalidDeviceName { .. })
        ));
        assert_eq!(manager.status(), ExperimentStatus::Initialized);
    }

    #[tokio::test]
    async fn test_remove_device_refused_while_running() {
        let manager = ExperimentManager::with_devices([(
            "a",
            Arc::new(Switch::default()) as Arc<dyn Device>,
        )])
        .unwrap();

        manager.run().await.unwrap();
        assert!(manager.remove_device("a").await.is_err());

        manager.finish().await.unwrap();
        assert!(manager.remove_device("a").await.is_ok());
        assert!(manager.get_device("a").await.is_none());
    }

    #[tokio::test]
    async fn test_status_subscription_observes_transitions() {
        let manager = ExperimentManager::new();
        let mut rx = manager.subscribe_status();

        manager.run().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ExperimentStatus::Running);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ExperimentStatus::Finishing.to_string(), "FINISHING");
        assert_eq!(ExperimentStatus::Error.to_string(), "ERROR");
    }
}
