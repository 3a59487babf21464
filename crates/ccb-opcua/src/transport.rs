// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA transport abstraction.
//!
//! An [`OpcUaTransport`] performs single attempts and classifies what went
//! wrong. Retrying, locking and error translation happen one layer up, in
//! [`OpcUaCommunication`](crate::OpcUaCommunication).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::OpcUaConfig;
use crate::error::TransportFailure;
use crate::handler::DataChangeHandler;
use crate::types::{NodeId, OpcUaValue};

/// Result type of a single transport attempt.
pub type TransportResult<T> = Result<T, TransportFailure>;

/// One OPC UA client session.
#[async_trait]
pub trait OpcUaTransport: Send + Sync + 'static {
    /// Opens a session with the server described by `config`.
    async fn connect(&self, config: &OpcUaConfig) -> TransportResult<()>;

    /// Closes the session. Closing without a session is not an error.
    async fn disconnect(&self) -> TransportResult<()>;

    /// Returns `true` while a session object exists.
    fn is_connected(&self) -> bool;

    /// Reads the value attribute of `node`.
    async fn read(&self, node: &NodeId) -> TransportResult<OpcUaValue>;

    /// Writes the value attribute of `node`.
    async fn write(&self, node: &NodeId, value: OpcUaValue) -> TransportResult<()>;

    /// Creates a subscription publishing every `period` whose data changes
    /// are delivered to `handler`. Returns the subscription id.
    async fn create_subscription(
        &self,
        period: Duration,
        handler: Arc<dyn DataChangeHandler>,
    ) -> TransportResult<u32>;

    /// Adds monitored items for `nodes` to a subscription, sampling every
    /// `period`.
    async fn monitor_nodes(
        &self,
        subscription_id: u32,
        period: Duration,
        nodes: &[NodeId],
    ) -> TransportResult<()>;
}
