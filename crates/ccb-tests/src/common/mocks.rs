// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Mock Implementations
//!
//! Mocks for testing CCB components in isolation. Every mock records its
//! calls and can be told to fail.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use ccb_core::{CcbError, CcbResult, CommunicationProtocol, ConnectionError, Device, ProtocolState};
use ccb_opcua::transport::TransportResult;
use ccb_opcua::{
    DataChange, DataChangeHandler, NodeId, OpcUaConfig, OpcUaTransport, OpcUaValue,
    TransportFailure, SERVER_STATE_NODE,
};

// =============================================================================
// Call Log
// =============================================================================

/// Ordered record of calls shared between several mocks.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    /// Returns all entries in call order.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Removes all entries.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

// =============================================================================
// Mock Device
// =============================================================================

/// A device whose start and stop can be made to fail.
#[derive(Debug)]
pub struct MockDevice {
    /// Name used in the call log.
    name: String,

    /// Shared call log.
    log: CallLog,

    /// Whether the device is currently started.
    started: AtomicBool,

    /// Force start to fail.
    fail_start: AtomicBool,

    /// Force stop to fail.
    fail_stop: AtomicBool,

    /// Simulated start latency.
    start_latency: Mutex<Duration>,

    /// Start count for verification.
    start_count: AtomicU64,

    /// Stop count for verification.
    stop_count: AtomicU64,
}

impl MockDevice {
    /// Creates a device with its own call log.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_log(name, CallLog::new())
    }

    /// Creates a device recording into `log`.
    pub fn with_log(name: impl Into<String>, log: CallLog) -> Self {
        Self {
            name: name.into(),
            log,
            started: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            start_latency: Mutex::new(Duration::ZERO),
            start_count: AtomicU64::new(0),
            stop_count: AtomicU64::new(0),
        }
    }

    /// Wraps the device in an `Arc`.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Builder form of [`set_fail_start`](Self::set_fail_start).
    pub fn failing_start(self) -> Self {
        self.set_fail_start(true);
        self
    }

    /// Builder form of [`set_fail_stop`](Self::set_fail_stop).
    pub fn failing_stop(self) -> Self {
        self.set_fail_stop(true);
        self
    }

    /// Makes `start()` fail.
    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Makes `stop()` fail.
    pub fn set_fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    /// Sets how long `start()` takes.
    pub fn set_start_latency(&self, latency: Duration) {
        *self.start_latency.lock() = latency;
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true between a successful start and the next stop.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Number of `start()` calls.
    pub fn start_count(&self) -> u64 {
        self.start_count.load(Ordering::SeqCst)
    }

    /// Number of `stop()` calls.
    pub fn stop_count(&self) -> u64 {
        self.stop_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Device for MockDevice {
    async fn start(&self) -> CcbResult<()> {
        self.start_count.fetch_add(1, Ordering::SeqCst);
        self.log.record(format!("{}.start", self.name));

        let latency = *self.start_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.fail_start.load(Ordering::SeqCst) {
            return Err(CcbError::device(format!("{} refused to start", self.name)));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> CcbResult<()> {
        self.stop_count.fetch_add(1, Ordering::SeqCst);
        self.log.record(format!("{}.stop", self.name));

        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(CcbError::device(format!("{} refused to stop", self.name)));
        }
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Mock Protocol
// =============================================================================

/// A protocol that only tracks its lifecycle.
#[derive(Debug)]
pub struct MockProtocol {
    target: String,
    state: Mutex<ProtocolState>,
    fail_open: AtomicBool,
    open_count: AtomicU64,
    close_count: AtomicU64,
}

impl MockProtocol {
    /// Creates a closed protocol for `target`.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            state: Mutex::new(ProtocolState::Closed),
            fail_open: AtomicBool::new(false),
            open_count: AtomicU64::new(0),
            close_count: AtomicU64::new(0),
        }
    }

    /// Makes `open()` fail.
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Number of `open()` calls.
    pub fn open_count(&self) -> u64 {
        self.open_count.load(Ordering::SeqCst)
    }

    /// Number of `close()` calls.
    pub fn close_count(&self) -> u64 {
        self.close_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommunicationProtocol for MockProtocol {
    fn protocol(&self) -> &'static str {
        "mock"
    }

    fn target(&self) -> String {
        self.target.clone()
    }

    async fn open(&self) -> CcbResult<()> {
        self.open_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_open.load(Ordering::SeqCst) {
            *self.state.lock() = ProtocolState::Error;
            return Err(ConnectionError::open("mock", &self.target, "refused").into());
        }
        *self.state.lock() = ProtocolState::Open;
        Ok(())
    }

    async fn close(&self) -> CcbResult<()> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = ProtocolState::Closed;
        Ok(())
    }

    async fn is_open(&self) -> bool {
        self.state.lock().is_open()
    }

    fn state(&self) -> ProtocolState {
        *self.state.lock()
    }
}

// =============================================================================
// Mock OPC UA Transport
// =============================================================================

/// In-memory OPC UA server session.
///
/// Nodes live in a map; reads of unknown nodes fail with a protocol
/// failure. Failures pushed with [`push_failure`](Self::push_failure) are
/// returned by the next read or write attempts, one per attempt.
#[derive(Default)]
pub struct MockOpcUaTransport {
    nodes: Mutex<HashMap<NodeId, OpcUaValue>>,
    failures: Mutex<VecDeque<TransportFailure>>,
    connect_failure: Mutex<Option<TransportFailure>>,
    connected: AtomicBool,
    handlers: Mutex<HashMap<u32, Arc<dyn DataChangeHandler>>>,
    monitored: Mutex<Vec<(u32, NodeId)>>,
    connect_count: AtomicU64,
    read_count: AtomicU64,
    write_count: AtomicU64,
}

impl MockOpcUaTransport {
    /// Creates a transport whose server reports the running state.
    pub fn new() -> Self {
        let transport = Self::default();
        transport
            .nodes
            .lock()
            .insert(SERVER_STATE_NODE, OpcUaValue::Int32(0));
        transport
    }

    /// Wraps the transport in an `Arc`.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Sets a node value.
    pub fn set_node(&self, node: NodeId, value: OpcUaValue) {
        self.nodes.lock().insert(node, value);
    }

    /// Returns a node value.
    pub fn node(&self, node: &NodeId) -> Option<OpcUaValue> {
        self.nodes.lock().get(node).cloned()
    }

    /// Queues a failure for the next read or write attempt.
    pub fn push_failure(&self, failure: TransportFailure) {
        self.failures.lock().push_back(failure);
    }

    /// Queues `count` timeouts.
    pub fn push_timeouts(&self, count: usize) {
        let mut failures = self.failures.lock();
        for _ in 0..count {
            failures.push_back(TransportFailure::timeout("request timed out"));
        }
    }

    /// Makes the next `connect()` fail.
    pub fn fail_next_connect(&self, failure: TransportFailure) {
        *self.connect_failure.lock() = Some(failure);
    }

    /// Delivers a data change to every subscription monitoring `node`.
    pub fn emit(&self, node: &NodeId, value: OpcUaValue) -> usize {
        self.set_node(node.clone(), value.clone());
        let subscriptions: Vec<u32> = self
            .monitored
            .lock()
            .iter()
            .filter(|(_, n)| n == node)
            .map(|(id, _)| *id)
            .collect();
        let handlers: Vec<_> = {
            let handlers = self.handlers.lock();
            subscriptions
                .iter()
                .filter_map(|id| handlers.get(id).cloned())
                .collect()
        };
        let change = DataChange::new(node.clone(), value);
        for handler in &handlers {
            handler.datachange_notification(&change);
        }
        handlers.len()
    }

    /// Number of subscriptions created.
    pub fn subscription_count(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Nodes monitored so far, per subscription.
    pub fn monitored(&self) -> Vec<(u32, NodeId)> {
        self.monitored.lock().clone()
    }

    /// Number of `connect()` calls.
    pub fn connect_count(&self) -> u64 {
        self.connect_count.load(Ordering::SeqCst)
    }

    /// Number of read attempts.
    pub fn read_count(&self) -> u64 {
        self.read_count.load(Ordering::SeqCst)
    }

    /// Number of write attempts.
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::SeqCst)
    }

    fn next_failure(&self) -> TransportResult<()> {
        match self.failures.lock().pop_front() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    fn ensure_connected(&self) -> TransportResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportFailure::socket("no session"))
        }
    }
}

#[async_trait]
impl OpcUaTransport for MockOpcUaTransport {
    async fn connect(&self, _config: &OpcUaConfig) -> TransportResult<()> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.connect_failure.lock().take() {
            return Err(failure);
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn read(&self, node: &NodeId) -> TransportResult<OpcUaValue> {
        self.read_count.fetch_add(1, Ordering::SeqCst);
        self.ensure_connected()?;
        self.next_failure()?;
        self.node(node)
            .ok_or_else(|| TransportFailure::protocol(format!("BadNodeIdUnknown: {node}")))
    }

    async fn write(&self, node: &NodeId, value: OpcUaValue) -> TransportResult<()> {
        self.write_count.fetch_add(1, Ordering::SeqCst);
        self.ensure_connected()?;
        self.next_failure()?;
        self.set_node(node.clone(), value);
        Ok(())
    }

    async fn create_subscription(
        &self,
        _period: Duration,
        handler: Arc<dyn DataChangeHandler>,
    ) -> TransportResult<u32> {
        self.ensure_connected()?;
        let mut handlers = self.handlers.lock();
        let id = handlers.len() as u32 + 1;
        handlers.insert(id, handler);
        Ok(id)
    }

    async fn monitor_nodes(
        &self,
        subscription_id: u32,
        _period: Duration,
        nodes: &[NodeId],
    ) -> TransportResult<()> {
        self.ensure_connected()?;
        let mut monitored = self.monitored.lock();
        monitored.extend(nodes.iter().map(|n| (subscription_id, n.clone())));
        Ok(())
    }
}

impl std::fmt::Debug for MockOpcUaTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockOpcUaTransport")
            .field("connected", &self.is_connected())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}
