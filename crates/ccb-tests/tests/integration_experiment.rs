// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Experiment Integration Tests
//!
//! - `test_sequence_*`: ordered bulk start/stop with failure aggregation
//! - `test_experiment_*`: the experiment state machine
//! - `test_single_comm_*`: devices owning one protocol

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use ccb_core::{
    experiment_failure, CcbError, CommunicationProtocol, Device, DeviceSequence, ExperimentError,
    ExperimentManager, ExperimentStatus, LifecycleOperation, ProtocolState, SequenceOrder,
    SingleCommDevice,
};
use ccb_tests::common::{init_test_logging, CallLog, MockDevice, MockProtocol};

fn names(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn abc(log: &CallLog) -> (Arc<MockDevice>, Arc<MockDevice>, Arc<MockDevice>) {
    (
        MockDevice::with_log("A", log.clone()).shared(),
        MockDevice::with_log("B", log.clone()).shared(),
        MockDevice::with_log("C", log.clone()).shared(),
    )
}

// =============================================================================
// DeviceSequence
// =============================================================================

#[tokio::test]
async fn test_sequence_start_visits_every_device() {
    init_test_logging();
    let log = CallLog::new();
    let (a, b, c) = abc(&log);
    b.set_fail_start(true);

    let mut sequence = DeviceSequence::with_devices([
        ("A", a.clone() as Arc<dyn Device>),
        ("B", b.clone() as Arc<dyn Device>),
        ("C", c.clone() as Arc<dyn Device>),
    ])
    .unwrap();

    let err = sequence.start().await.unwrap_err();
    assert_eq!(log.entries(), vec!["A.start", "B.start", "C.start"]);
    assert_eq!(sequence.devices_failed_start(), &names(&["B"]));

    match err {
        CcbError::DeviceFailures(failures) => {
            assert_eq!(failures.operation(), LifecycleOperation::Start);
            assert_eq!(failures.len(), 1);
            assert!(failures.get("B").is_some());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_sequence_failure_sets_are_exclusive() {
    let log = CallLog::new();
    let (a, b, c) = abc(&log);
    a.set_fail_start(true);
    c.set_fail_stop(true);

    let mut sequence = DeviceSequence::with_devices([
        ("A", a as Arc<dyn Device>),
        ("B", b as Arc<dyn Device>),
        ("C", c as Arc<dyn Device>),
    ])
    .unwrap();

    assert!(sequence.start().await.is_err());
    assert_eq!(sequence.devices_failed_start(), &names(&["A"]));
    assert!(sequence.devices_failed_stop().is_empty());

    assert!(sequence.stop().await.is_err());
    assert!(sequence.devices_failed_start().is_empty());
    assert_eq!(sequence.devices_failed_stop(), &names(&["C"]));
}

#[tokio::test]
async fn test_sequence_reverse_stop_order() {
    let log = CallLog::new();
    let (a, b, c) = abc(&log);
    let mut sequence = DeviceSequence::with_devices([
        ("A", a as Arc<dyn Device>),
        ("B", b as Arc<dyn Device>),
        ("C", c as Arc<dyn Device>),
    ])
    .unwrap();

    sequence.stop().await.unwrap();
    assert_eq!(log.entries(), vec!["A.stop", "B.stop", "C.stop"]);

    log.clear();
    sequence.set_stop_order(SequenceOrder::Reverse);
    sequence.stop().await.unwrap();
    assert_eq!(log.entries(), vec!["C.stop", "B.stop", "A.stop"]);
}

#[tokio::test]
async fn test_sequence_rejects_bad_names() {
    let mut sequence = DeviceSequence::new();
    sequence
        .add_device("laser", MockDevice::new("laser").shared())
        .unwrap();

    assert!(matches!(
        sequence.add_device("laser", MockDevice::new("laser").shared()),
        Err(CcbError::DeviceExists(_))
    ));
    assert!(matches!(
        sequence.add_device("start", MockDevice::new("start").shared()),
        Err(CcbError::InvalidDeviceName { .. })
    ));
    assert!(matches!(
        sequence.remove_device("pump"),
        Err(CcbError::UnknownDevice { .. })
    ));
    assert_eq!(sequence.device_names(), vec!["laser"]);
}

// =============================================================================
// ExperimentManager
// =============================================================================

#[tokio::test]
async fn test_experiment_abc_failure_scenario() {
    init_test_logging();
    let log = CallLog::new();
    let (a, b, c) = abc(&log);
    b.set_fail_start(true);

    let manager = ExperimentManager::new();
    manager.add_device("A", a.clone()).await.unwrap();
    manager.add_device("B", b.clone()).await.unwrap();
    manager.add_device("C", c.clone()).await.unwrap();

    let err = manager.run().await.unwrap_err();

    assert_eq!(a.start_count(), 1);
    assert_eq!(c.start_count(), 1);
    assert_eq!(manager.devices_failed_start().await, names(&["B"]));
    assert_eq!(manager.status(), ExperimentStatus::Error);
    assert!(matches!(
        err,
        CcbError::Experiment(ExperimentError::Failed { .. })
    ));
    assert!(matches!(
        experiment_failure(&err),
        Some(CcbError::DeviceFailures(_))
    ));
}

#[tokio::test]
async fn test_experiment_full_lifecycle() {
    let log = CallLog::new();
    let (a, b, _) = abc(&log);
    let manager = ExperimentManager::with_devices([
        ("A", a.clone() as Arc<dyn Device>),
        ("B", b.clone() as Arc<dyn Device>),
    ])
    .unwrap()
    .with_stop_order(SequenceOrder::Reverse);

    let mut status = manager.subscribe_status();
    assert_eq!(*status.borrow_and_update(), ExperimentStatus::Initialized);

    manager.run().await.unwrap();
    assert!(manager.is_running());
    assert!(a.is_started() && b.is_started());

    manager.finish().await.unwrap();
    assert!(manager.is_finished());
    assert_eq!(log.entries(), vec!["A.start", "B.start", "B.stop", "A.stop"]);

    manager.run().await.unwrap();
    assert!(manager.is_running());
    assert_eq!(a.start_count(), 2);
    manager.finish().await.unwrap();
    assert!(status.has_changed().unwrap());
}

#[tokio::test]
async fn test_experiment_error_is_sticky() {
    let device = MockDevice::new("laser").failing_start().shared();
    let manager = ExperimentManager::new();
    manager.add_device("laser", device.clone()).await.unwrap();

    assert!(manager.run().await.is_err());
    assert!(manager.is_error());

    assert!(matches!(
        manager.run().await,
        Err(CcbError::Experiment(ExperimentError::InErrorState { .. }))
    ));
    assert!(matches!(
        manager.add_device("pump", MockDevice::new("pump").shared()).await,
        Err(CcbError::Experiment(ExperimentError::InErrorState { .. }))
    ));

    manager.finish().await.unwrap();
    assert_eq!(device.stop_count(), 1);
    assert!(manager.is_error());
}

#[tokio::test]
async fn test_experiment_finish_failure_moves_to_error() {
    let manager = ExperimentManager::new();
    let device = MockDevice::new("laser").failing_stop().shared();
    manager.add_device("laser", device).await.unwrap();
    manager.run().await.unwrap();

    assert!(manager.finish().await.is_err());
    assert_eq!(manager.status(), ExperimentStatus::Error);
    assert_eq!(manager.devices_failed_stop().await, names(&["laser"]));
}

#[tokio::test]
async fn test_experiment_add_device_while_running_starts_it() {
    let manager = ExperimentManager::new();
    manager.run().await.unwrap();

    let device = MockDevice::new("laser").shared();
    manager.add_device("laser", device.clone()).await.unwrap();
    assert!(device.is_started());

    let failing = MockDevice::new("pump").failing_start().shared();
    assert!(manager.add_device("pump", failing).await.is_err());
    assert!(manager.is_error());
    assert_eq!(manager.devices_failed_start().await, names(&["pump"]));
}

#[tokio::test]
async fn test_experiment_concurrent_runs_are_serialized() {
    let device = MockDevice::new("laser");
    device.set_start_latency(Duration::from_millis(20));
    let device = device.shared();

    let manager = Arc::new(ExperimentManager::new());
    manager.add_device("laser", device.clone()).await.unwrap();

    let first = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.run().await }
    });
    let second = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.run().await }
    });

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    assert_eq!(device.start_count(), 1);
    assert!(manager.is_running());
}

#[tokio::test]
async fn test_experiment_remove_device_refused_while_running() {
    let manager = ExperimentManager::new();
    manager
        .add_device("laser", MockDevice::new("laser").shared())
        .await
        .unwrap();
    manager.run().await.unwrap();

    assert!(manager.remove_device("laser").await.is_err());
    manager.finish().await.unwrap();
    assert!(manager.remove_device("laser").await.is_ok());
    assert!(manager.get_device("laser").await.is_none());
}

// =============================================================================
// SingleCommDevice
// =============================================================================

#[tokio::test]
async fn test_single_comm_device_lifecycle() {
    let device = SingleCommDevice::new(MockProtocol::new("bench"));
    assert_eq!(device.com().state(), ProtocolState::Closed);

    device.start().await.unwrap();
    assert!(device.com().is_open().await);
    assert_eq!(device.com().display_name(), "mock://bench");

    device.stop().await.unwrap();
    assert_eq!(device.com().state(), ProtocolState::Closed);
    assert_eq!(device.com().open_count(), 1);
    assert_eq!(device.com().close_count(), 1);
}

#[tokio::test]
async fn test_single_comm_device_open_failure() {
    let device = SingleCommDevice::new(MockProtocol::new("bench"));
    device.com().set_fail_open(true);

    let err = device.start().await.unwrap_err();
    assert!(err.is_connection());
    assert_eq!(device.com().state(), ProtocolState::Error);
}
