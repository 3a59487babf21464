// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA client communication protocol.
//!
//! Every operation runs through [`retry::execute`], holding the protocol lock
//! for the whole retry sequence. Timeouts are retried as configured by
//! `wait_timeout_retry` and `max_timeout_retry_nr`; every other transport
//! failure is raised at once.

use std::sync::Arc;

use async_trait::async_trait;
use ccb_core::{CcbResult, CommunicationProtocol, FromConfig, ProtocolState};
use parking_lot::Mutex as StateLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::OpcUaConfig;
use crate::error::{OpcUaError, OpcUaResult, PROTOCOL};
use crate::handler::{DataChangeHandler, LoggingHandler};
use crate::real_transport::RealOpcUaTransport;
use crate::retry::{self, RetryPolicy};
use crate::transport::OpcUaTransport;
use crate::types::{NodeId, NodeIdentifier, OpcUaValue, SERVER_STATE_NODE};

/// OPC UA client bound to one server endpoint.
pub struct OpcUaCommunication {
    config: OpcUaConfig,
    url: String,
    policy: RetryPolicy,
    transport: Arc<dyn OpcUaTransport>,
    handler: Arc<dyn DataChangeHandler>,
    lock: Mutex<()>,
    state: StateLock<ProtocolState>,
    subscription: StateLock<Option<u32>>,
}

impl OpcUaCommunication {
    /// Creates a closed client using the `opcua` crate transport.
    ///
    /// # Errors
    ///
    /// Returns [`OpcUaError::Configuration`] if the configuration is invalid.
    pub fn new(config: OpcUaConfig) -> OpcUaResult<Self> {
        Self::with_transport(config, Arc::new(RealOpcUaTransport::new()))
    }

    /// Creates a closed client over a custom transport.
    pub fn with_transport(
        config: OpcUaConfig,
        transport: Arc<dyn OpcUaTransport>,
    ) -> OpcUaResult<Self> {
        config.validate()?;
        Ok(Self {
            url: config.url(),
            policy: RetryPolicy::from_config(&config),
            config,
            transport,
            handler: Arc::new(LoggingHandler),
            lock: Mutex::new(()),
            state: StateLock::new(ProtocolState::Closed),
            subscription: StateLock::new(None),
        })
    }

    /// Replaces the handler receiving data change notifications.
    ///
    /// Takes effect for the next subscription, i.e. after a reconnect when
    /// nodes are already monitored.
    pub fn with_handler(mut self, handler: Arc<dyn DataChangeHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &OpcUaConfig {
        &self.config
    }

    /// Returns the endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the retry policy applied to every operation.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    fn set_state(&self, state: ProtocolState) {
        *self.state.lock() = state;
    }

    fn ensure_connected(&self) -> OpcUaResult<()> {
        if self.transport.is_connected() {
            Ok(())
        } else {
            Err(OpcUaError::not_connected(&self.url))
        }
    }

    async fn connect(&self) -> OpcUaResult<()> {
        let _guard = self.lock.lock().await;

        if self.transport.is_connected() {
            warn!(url = %self.url, "OPC UA session is already open");
            self.set_state(ProtocolState::Open);
            return Ok(());
        }

        self.set_state(ProtocolState::Opening);
        info!(url = %self.url, "Opening OPC UA session");

        let config = &self.config;
        let transport = &self.transport;
        match retry::execute(self.policy, "open", &self.url, || transport.connect(config)).await {
            Ok(()) => {
                *self.subscription.lock() = None;
                self.set_state(ProtocolState::Open);
                info!(url = %self.url, "OPC UA session open");
                Ok(())
            }
            Err(e) => {
                self.set_state(ProtocolState::Error);
                warn!(url = %self.url, error = %e, "Failed to open OPC UA session");
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> OpcUaResult<()> {
        let _guard = self.lock.lock().await;
        self.disconnect_locked().await
    }

    async fn disconnect_locked(&self) -> OpcUaResult<()> {
        *self.subscription.lock() = None;

        if !self.transport.is_connected() {
            if self.state().is_open() {
                debug!(url = %self.url, "OPC UA session already gone");
            } else {
                warn!(url = %self.url, "OPC UA session is not open");
            }
            self.set_state(ProtocolState::Closed);
            return Ok(());
        }

        let transport = &self.transport;
        let result = retry::execute(self.policy, "close", &self.url, || transport.disconnect()).await;
        self.set_state(ProtocolState::Closed);
        match &result {
            Ok(()) => info!(url = %self.url, "OPC UA session closed"),
            Err(e) => warn!(url = %self.url, error = %e, "OPC UA session closed with error"),
        }
        result
    }

    async fn probe(&self) -> bool {
        let _guard = self.lock.lock().await;

        if !self.transport.is_connected() {
            if self.state().is_open() {
                self.set_state(ProtocolState::Error);
            }
            return false;
        }

        let transport = &self.transport;
        let node = SERVER_STATE_NODE;
        match retry::execute(self.policy, "probe", &self.url, || {
            transport.read(&node)
        })
        .await
        {
            Ok(state) => {
                debug!(url = %self.url, server_state = %state, "OPC UA probe succeeded");
                true
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "OPC UA probe failed, closing session");
                if let Err(close_err) = self.disconnect_locked().await {
                    debug!(url = %self.url, error = %close_err, "Close after failed probe failed");
                }
                self.set_state(ProtocolState::Error);
                false
            }
        }
    }

    /// Reads the value of a node.
    ///
    /// # Errors
    ///
    /// [`OpcUaError::NotConnected`] without a session,
    /// [`OpcUaError::Timeout`] once retries are exhausted and
    /// [`OpcUaError::Io`] for any other failure.
    pub async fn read(
        &self,
        node: impl Into<NodeIdentifier>,
        namespace: u16,
    ) -> OpcUaResult<OpcUaValue> {
        let node = NodeId::new(namespace, node);
        let _guard = self.lock.lock().await;
        self.ensure_connected()?;

        let transport = &self.transport;
        let value = retry::execute(self.policy, "read", &self.url, || transport.read(&node)).await?;
        debug!(url = %self.url, node = %node, value = %value, "OPC UA read");
        Ok(value)
    }

    /// Writes a value to a node.
    ///
    /// # Errors
    ///
    /// Same as [`read`](Self::read).
    pub async fn write(
        &self,
        node: impl Into<NodeIdentifier>,
        namespace: u16,
        value: impl Into<OpcUaValue>,
    ) -> OpcUaResult<()> {
        let node = NodeId::new(namespace, node);
        let value = value.into();
        let _guard = self.lock.lock().await;
        self.ensure_connected()?;

        debug!(url = %self.url, node = %node, value = %value, "OPC UA write");
        let transport = &self.transport;
        retry::execute(self.policy, "write", &self.url, || {
            transport.write(&node, value.clone())
        })
        .await
    }

    /// Subscribes to data changes of `nodes` in `namespace`.
    ///
    /// The first call creates the session's subscription, publishing every
    /// `update_parameter`; later calls add items to it. Notifications go to
    /// the configured [`DataChangeHandler`].
    ///
    /// # Errors
    ///
    /// Same as [`read`](Self::read).
    pub async fn init_monitored_nodes<I, N>(&self, nodes: I, namespace: u16) -> OpcUaResult<()>
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeIdentifier>,
    {
        let nodes: Vec<NodeId> = nodes
            .into_iter()
            .map(|node| NodeId::new(namespace, node))
            .collect();
        if nodes.is_empty() {
            return Ok(());
        }

        let _guard = self.lock.lock().await;
        self.ensure_connected()?;

        let period = self.config.update_parameter;
        let transport = &self.transport;

        let existing = *self.subscription.lock();
        let subscription_id = match existing {
            Some(id) => id,
            None => {
                let handler = &self.handler;
                let id = retry::execute(self.policy, "create_subscription", &self.url, || {
                    transport.create_subscription(period, handler.clone())
                })
                .await?;
                *self.subscription.lock() = Some(id);
                id
            }
        };

        retry::execute(self.policy, "monitor", &self.url, || {
            transport.monitor_nodes(subscription_id, period, &nodes)
        })
        .await?;

        info!(
            url = %self.url,
            subscription_id,
            count = nodes.len(),
            "Monitoring OPC UA nodes"
        );
        Ok(())
    }
}

#[async_trait]
impl CommunicationProtocol for OpcUaCommunication {
    fn protocol(&self) -> &'static str {
        PROTOCOL
    }

    fn target(&self) -> String {
        self.url.clone()
    }

    async fn open(&self) -> CcbResult<()> {
        self.connect().await.map_err(Into::into)
    }

    async fn close(&self) -> CcbResult<()> {
        self.disconnect().await.map_err(Into::into)
    }

    async fn is_open(&self) -> bool {
        self.probe().await
    }

    fn state(&self) -> ProtocolState {
        *self.state.lock()
    }
}

impl FromConfig for OpcUaCommunication {
    type Config = OpcUaConfig;

    fn from_config(config: OpcUaConfig) -> CcbResult<Self> {
        Self::new(config).map_err(Into::into)
    }

    fn config(&self) -> &OpcUaConfig {
        &self.config
    }
}

impl std::fmt::Debug for OpcUaCommunication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpcUaCommunication")
            .field("url", &self.url)
            .field("state", &self.state())
            .finish()
    }
}
