// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription notifications.
//!
//! Handlers are called from the client's notification thread and must not
//! block. Long-running reactions belong on a task of their own.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::types::{NodeId, OpcUaValue};

/// A value change reported for a monitored node.
#[derive(Debug, Clone, PartialEq)]
pub struct DataChange {
    /// The node that changed.
    pub node: NodeId,
    /// The new value.
    pub value: OpcUaValue,
    /// Source timestamp reported by the server, if any.
    pub source_timestamp: Option<DateTime<Utc>>,
}

impl DataChange {
    /// Creates a change without a source timestamp.
    pub fn new(node: NodeId, value: OpcUaValue) -> Self {
        Self {
            node,
            value,
            source_timestamp: None,
        }
    }
}

/// Receives data change notifications of monitored nodes.
pub trait DataChangeHandler: Send + Sync + 'static {
    /// Called once per changed node.
    fn datachange_notification(&self, change: &DataChange);
}

/// Logs every change at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

impl DataChangeHandler for LoggingHandler {
    fn datachange_notification(&self, change: &DataChange) {
        debug!(node = %change.node, value = %change.value, "OPC UA datachange");
    }
}

impl<F> DataChangeHandler for F
where
    F: Fn(&DataChange) + Send + Sync + 'static,
{
    fn datachange_notification(&self, change: &DataChange) {
        self(change)
    }
}
