// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Ordered, named device collections with partial-failure-tolerant
//! bulk lifecycle operations.
//!
//! [`DeviceSequence::start`] and [`DeviceSequence::stop`] visit every device,
//! log and record individual failures, and only after the full pass return
//! one aggregate [`DeviceFailures`] error. Names of the devices that failed
//! during the most recent call are available from
//! [`DeviceSequence::devices_failed_start`] and
//! [`DeviceSequence::devices_failed_stop`]; each call clears both sets first.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::device::Device;
use crate::error::{CcbError, CcbResult, DeviceExistingError, DeviceFailures, LifecycleOperation};

/// Names a device may not take because they denote operations of the
/// sequence or the experiment manager wrapping it.
pub const RESERVED_NAMES: &[&str] = &[
    "add_device",
    "remove_device",
    "get_device",
    "get_devices",
    "device_names",
    "contains",
    "len",
    "is_empty",
    "start",
    "stop",
    "stop_order",
    "set_stop_order",
    "devices_failed_start",
    "devices_failed_stop",
    "run",
    "finish",
    "status",
    "subscribe_status",
    "is_running",
    "is_finished",
    "is_error",
];

// =============================================================================
// SequenceOrder
// =============================================================================

/// Order in which [`DeviceSequence::stop`] visits devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceOrder {
    /// Insertion order, the same as `start()`.
    #[default]
    Forward,
    /// Reverse insertion order.
    Reverse,
}

impl fmt::Display for SequenceOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => write!(f, "forward"),
            Self::Reverse => write!(f, "reverse"),
        }
    }
}

// =============================================================================
// DeviceSequence
// =============================================================================

/// An ordered collection of uniquely named devices.
///
/// Insertion order is the start order. Stop order defaults to the same
/// forward order and can be switched with [`DeviceSequence::set_stop_order`].
#[derive(Default)]
pub struct DeviceSequence {
    devices: Vec<(String, Arc<dyn Device>)>,
    failed_start: BTreeSet<String>,
    failed_stop: BTreeSet<String>,
    stop_order: SequenceOrder,
}

impl DeviceSequence {
    /// Creates an empty sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sequence from `(name, device)` pairs, in order.
    ///
    /// # Errors
    ///
    /// Fails on the first duplicate or reserved name.
    pub fn with_devices<I, S>(devices: I) -> CcbResult<Self>
    where
        I: IntoIterator<Item = (S, Arc<dyn Device>)>,
        S: Into<String>,
    {
        let mut sequence = Self::new();
        for (name, device) in devices {
            sequence.add_device(name, device)?;
        }
        Ok(sequence)
    }

    /// Checks that `name` could be added.
    pub fn check_name(&self, name: &str) -> CcbResult<()> {
        if name.trim().is_empty() {
            return Err(CcbError::InvalidDeviceName {
                name: name.to_string(),
                reason: "name must not be empty".to_string(),
            });
        }
        if RESERVED_NAMES.contains(&name) {
            return Err(CcbError::InvalidDeviceName {
                name: name.to_string(),
                reason: "name collides with a sequence operation".to_string(),
            });
        }
        if self.contains(name) {
            return Err(DeviceExistingError::new(name).into());
        }
        Ok(())
    }

    /// Appends a device under `name`.
    ///
    /// # Errors
    ///
    /// - [`CcbError::DeviceExists`] if the name is taken.
    /// - [`CcbError::InvalidDeviceName`] if the name is empty or reserved.
    pub fn add_device(&mut self, name: impl Into<String>, device: Arc<dyn Device>) -> CcbResult<()> {
        let name = name.into();
        self.check_name(&name)?;
        debug!(device = %name, position = self.devices.len(), "Device added to sequence");
        self.devices.push((name, device));
        Ok(())
    }

    /// Removes and returns the named device, purging it from the failure sets.
    ///
    /// # Errors
    ///
    /// Returns [`CcbError::UnknownDevice`] if no such device exists.
    pub fn remove_device(&mut self, name: &str) -> CcbResult<Arc<dyn Device>> {
        let index = self
            .devices
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| CcbError::UnknownDevice {
                name: name.to_string(),
            })?;
        let (_, device) = self.devices.remove(index);
        self.failed_start.remove(name);
        self.failed_stop.remove(name);
        debug!(device = %name, "Device removed from sequence");
        Ok(device)
    }

    /// Looks up a device by name.
    pub fn get_device(&self, name: &str) -> Option<Arc<dyn Device>> {
        self.devices
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| Arc::clone(d))
    }

    /// Iterates over `(name, device)` in insertion order.
    pub fn get_devices(&self) -> impl Iterator<Item = (&str, &Arc<dyn Device>)> {
        self.devices.iter().map(|(n, d)| (n.as_str(), d))
    }

    /// Device names in insertion order.
    pub fn device_names(&self) -> Vec<String> {
        self.devices.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Returns `true` if a device with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.devices.iter().any(|(n, _)| n == name)
    }

    /// Number of devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns `true` if the sequence holds no devices.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// The order used by `stop()`.
    pub fn stop_order(&self) -> SequenceOrder {
        self.stop_order
    }

    /// Changes the order used by `stop()`.
    pub fn set_stop_order(&mut self, order: SequenceOrder) {
        self.stop_order = order;
    }

    /// Names of devices whose `start()` failed in the last `start()` call.
    pub fn devices_failed_start(&self) -> &BTreeSet<String> {
        &self.failed_start
    }

    /// Names of devices whose `stop()` failed in the last `stop()` call.
    pub fn devices_failed_stop(&self) -> &BTreeSet<String> {
        &self.failed_stop
    }

    /// Records a start failure that happened outside `start()`, e.g. when a
    /// device is started on its own after being added to a running
    /// experiment.
    pub(crate) fn record_failed_start(&mut self, name: &str) {
        if self.contains(name) {
            self.failed_start.insert(name.to_string());
        }
    }

    /// Starts all devices in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`CcbError::DeviceFailures`] with one entry per failed device
    /// after every device has been visited.
    pub async fn start(&mut self) -> CcbResult<()> {
        self.failed_start.clear();
        self.failed_stop.clear();

        let mut failures = Vec::new();
        for (name, device) in &self.devices {
            match device.start().await {
                Ok(()) => debug!(device = %name, "Device started"),
                Err(e) => {
                    error!(device = %name, error = %e, "Could not start device");
                    self.failed_start.insert(name.clone());
                    failures.push((name.clone(), e));
                }
            }
        }

        Self::finish_pass(LifecycleOperation::Start, self.devices.len(), failures)
    }

    /// Stops all devices in [`stop_order`](Self::stop_order).
    ///
    /// # Errors
    ///
    /// Returns [`CcbError::DeviceFailures`] with one entry per failed device
    /// after every device has been visited.
    pub async fn stop(&mut self) -> CcbResult<()> {
        self.failed_start.clear();
        self.failed_stop.clear();

        let order: Vec<usize> = match self.stop_order {
            SequenceOrder::Forward => (0..self.devices.len()).collect(),
            SequenceOrder::Reverse => (0..self.devices.len()).rev().collect(),
        };

        let mut failures = Vec::new();
        for index in order {
            let (name, device) = &self.devices[index];
            match device.stop().await {
                Ok(()) => debug!(device = %name, "Device stopped"),
                Err(e) => {
                    error!(device = %name, error = %e, "Could not stop device");
                    self.failed_stop.insert(name.clone());
                    failures.push((name.clone(), e));
                }
            }
        }

        Self::finish_pass(LifecycleOperation::Stop, self.devices.len(), failures)
    }

    fn finish_pass(
        operation: LifecycleOperation,
        total: usize,
        failures: Vec<(String, CcbError)>,
    ) -> CcbResult<()> {
        if failures.is_empty() {
            info!(%operation, devices = total, "Device sequence pass completed");
            return Ok(());
        }
        error!(
            %operation,
            devices = total,
            failed = failures.len(),
            "Device sequence pass completed with failures"
        );
        Err(DeviceFailures::new(operation, failures).into())
    }
}

impl fmt::Debug for DeviceSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSequence")
            .field("devices", &self.device_names())
            .field("failed_start", &self.failed_start)
            .field("failed_stop", &self.failed_stop)
            .field("stop_order", &self.stop_order)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct Probe {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_start: bool,
        fail_stop: bool,
    }

    #[async_trait]
    impl Device for Probe {
        async fn start(&self) -> CcbResult<()> {
            self.log.lock().push(format!("start:{}", self.name));
            if self.fail_start {
                return Err(CcbError::device(format!("{} refused to start", self.name)));
            }
            Ok(())
        }

        async fn stop(&self) -> CcbResult<()> {
            self.log.lock().push(format!("stop:{}", self.name));
            if self.fail_stop {
                return Err(CcbError::device(format!("{} refused to stop", self.name)));
            }
            Ok(())
        }
    }

    fn sequence_of(
        names: &[&'static str],
        failing: &[&str],
    ) -> (DeviceSequence, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut sequence = DeviceSequence::new();
        for &name in names {
            let fail = failing.contains(&name);
            let device = Arc::new(Probe {
                name,
                log: Arc::clone(&log),
                fail_start: fail,
                fail_stop: fail,
            });
            sequence.add_device(name, device).unwrap();
        }
        (sequence, log)
    }

    #[tokio::test]
    async fn test_start_visits_every_device() {
        let (mut sequence, log) = sequence_of(&["a", "b", "c", "d"], &["b"]);

        let error = sequence.start().await.unwrap_err();
        assert_eq!(
            *log.lock(),
            vec!["start:a", "start:b", "start:c", "start:d"]
        );
        assert_eq!(
            sequence.devices_failed_start().iter().collect::<Vec<_>>(),
            vec!["b"]
        );

        let CcbError::DeviceFailures(failures) = error else {
            panic!("expected aggregate failure");
        };
        assert_eq!(failures.operation(), LifecycleOperation::Start);
        assert_eq!(failures.len(), 1);
        assert!(failures.get("b").is_some());
    }

    #[tokio::test]
    async fn test_failure_sets_are_reset_per_call() {
        let (mut sequence, _) = sequence_of(&["a", "b"], &["a"]);

        assert!(sequence.start().await.is_err());
        assert_eq!(sequence.devices_failed_start().len(), 1);

        assert!(sequence.stop().await.is_err());
        assert!(sequence.devices_failed_start().is_empty());
        assert_eq!(sequence.devices_failed_stop().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_order_is_configurable() {
        let (mut sequence, log) = sequence_of(&["a", "b", "c"], &[]);

        sequence.stop().await.unwrap();
        assert_eq!(*log.lock(), vec!["stop:a", "stop:b", "stop:c"]);

        log.lock().clear();
        sequence.set_stop_order(SequenceOrder::Reverse);
        sequence.stop().await.unwrap();
        assert_eq!(*log.lock(), vec!["stop:c", "stop:b", "stop:a"]);
    }

    #[test]
    fn test_add_device_rejects_duplicates_and_reserved_names() {
        let (mut sequence, log) = sequence_of(&["laser"], &[]);
        let extra = || -> Arc<dyn Device> {
            Arc::new(Probe {
                name: "x",
                log: Arc::clone(&log),
                fail_start: false,
                fail_stop: false,
            })
        };

        assert!(matches!(
            sequence.add_device("laser", extra()),
            Err(CcbError::DeviceExists(_))
        ));
        for reserved in RESERVED_NAMES {
            assert!(matches!(
                sequence.add_device(*reserved, extra()),
                Err(CcbError::InvalidDeviceName { .. })
            ));
        }
        assert!(sequence.add_device("", extra()).is_err());
        assert_eq!(sequence.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_device_purges_failures() {
        let (mut sequence, _) = sequence_of(&["a", "b"], &["b"]);
        let _ = sequence.start().await;
        assert!(sequence.devices_failed_start().contains("b"));

        sequence.remove_device("b").unwrap();
        assert!(sequence.devices_failed_start().is_empty());
        assert!(sequence.get_device("b").is_none());
        assert!(matches!(
            sequence.remove_device("b"),
            Err(CcbError::UnknownDevice { .. })
        ));
    }

    #[test]
    fn test_get_device_and_names() {
        let (sequence, _) = sequence_of(&["x1", "x2"], &[]);
        assert!(sequence.get_device("x1").is_some());
        assert!(sequence.get_device("nope").is_none());
        assert_eq!(sequence.device_names(), vec!["x1", "x2"]);
        assert_eq!(sequence.get_devices().count(), 2);
    }
}
