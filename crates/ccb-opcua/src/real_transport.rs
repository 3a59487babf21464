// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA transport over the `opcua` crate.
//!
//! The `opcua` 0.12 client API is blocking, so every session call runs on
//! tokio's blocking pool. Status codes returned by the client are mapped to
//! a [`FailureKind`] by [`classify_status`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opcua::client::prelude::*;
use opcua::sync::RwLock as OpcUaRwLock;
use opcua::types::{
    Array, ByteString, DataValue, ExtensionObject, QualifiedName, UAString, Variant, VariantTypeId,
};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::config::OpcUaConfig;
use crate::error::{FailureKind, TransportFailure};
use crate::handler::{DataChange, DataChangeHandler};
use crate::transport::{OpcUaTransport, TransportResult};
use crate::types::{NodeId, NodeIdentifier, OpcUaValue};

type SharedSession = Arc<OpcUaRwLock<Session>>;

const SUBSCRIPTION_LIFETIME_COUNT: u32 = 60;
const SUBSCRIPTION_KEEPALIVE_COUNT: u32 = 10;
const MONITORED_QUEUE_SIZE: u32 = 10;

struct ActiveSession {
    session: SharedSession,
    run_loop: Option<tokio::sync::oneshot::Sender<SessionCommand>>,
}

/// Maps a client status code to a failure class.
pub fn classify_status(status: StatusCode) -> FailureKind {
    let code = status.bits() & 0xFFFF_0000;
    let is = |candidate: StatusCode| code == candidate.bits();

    if is(StatusCode::BadTimeout) {
        FailureKind::Timeout
    } else if is(StatusCode::BadRequestCancelledByClient)
        || is(StatusCode::BadRequestCancelledByRequest)
    {
        FailureKind::Cancelled
    } else if is(StatusCode::BadTcpEndpointUrlInvalid) {
        FailureKind::AddressResolution
    } else if is(StatusCode::BadCommunicationError)
        || is(StatusCode::BadConnectionClosed)
        || is(StatusCode::BadConnectionRejected)
        || is(StatusCode::BadNotConnected)
        || is(StatusCode::BadSecureChannelClosed)
        || is(StatusCode::BadServerNotConnected)
        || is(StatusCode::BadDisconnect)
    {
        FailureKind::Socket
    } else {
        FailureKind::Protocol
    }
}

fn failure(status: StatusCode, context: &str) -> TransportFailure {
    TransportFailure::new(classify_status(status), format!("{context}: {status}"))
}

async fn blocking<T, F>(operation: &'static str, f: F) -> TransportResult<T>
where
    F: FnOnce() -> TransportResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        if e.is_cancelled() {
            TransportFailure::cancelled(format!("{operation} was cancelled"))
        } else {
            TransportFailure::protocol(format!("{operation} panicked in the OPC UA client"))
        }
    })?
}

/// Production transport using the `opcua` crate.
pub struct RealOpcUaTransport {
    active: Mutex<Option<ActiveSession>>,
}

impl RealOpcUaTransport {
    /// Creates a transport without a session.
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
        }
    }

    fn session(&self) -> TransportResult<SharedSession> {
        self.active
            .lock()
            .as_ref()
            .map(|active| active.session.clone())
            .ok_or_else(|| TransportFailure::socket("no open session"))
    }

    fn build_client(config: &OpcUaConfig) -> TransportResult<Client> {
        let mut builder = ClientBuilder::new()
            .application_name(config.application_name.as_str())
            .application_uri(config.effective_application_uri().as_str())
            .session_retry_limit(0)
            .session_timeout(config.session_timeout.as_millis() as u32)
            .trust_server_certs(config.trust_server_certs);

        if let Some(ref pki_dir) = config.pki_dir {
            builder = builder.pki_dir(pki_dir.clone());
        }

        builder
            .client()
            .ok_or_else(|| TransportFailure::protocol("invalid OPC UA client configuration"))
    }

    fn open_session(config: &OpcUaConfig) -> TransportResult<SharedSession> {
        let url = config.url();
        let mut client = Self::build_client(config)?;

        let endpoints = client
            .get_server_endpoints_from_url(url.as_str())
            .map_err(|status| failure(status, "get endpoints"))?;

        let endpoint = endpoints
            .iter()
            .find(|e| {
                e.security_policy_uri.as_ref() == SecurityPolicy::None.to_uri()
                    && e.security_mode == MessageSecurityMode::None
            })
            .cloned()
            .ok_or_else(|| TransportFailure::protocol("server offers no unsecured endpoint"))?;

        debug!(url = %url, endpoint = %endpoint.endpoint_url, "Found matching endpoint");

        client
            .connect_to_endpoint(endpoint, IdentityToken::Anonymous)
            .map_err(|status| failure(status, "connect"))
    }

    fn to_opcua_node_id(node: &NodeId) -> opcua::types::NodeId {
        match &node.identifier {
            NodeIdentifier::Numeric(v) => opcua::types::NodeId::new(node.namespace, *v),
            NodeIdentifier::String(v) => opcua::types::NodeId::new(node.namespace, v.clone()),
        }
    }

    fn from_opcua_node_id(node: &opcua::types::NodeId) -> NodeId {
        match &node.identifier {
            opcua::types::Identifier::Numeric(v) => NodeId::numeric(node.namespace, *v),
            opcua::types::Identifier::String(v) => NodeId::string(node.namespace, v.as_ref()),
            other => NodeId::string(node.namespace, format!("{other:?}")),
        }
    }

    fn from_opcua_variant(variant: &Variant) -> OpcUaValue {
        match variant {
            Variant::Empty => OpcUaValue::Null,
            Variant::Boolean(v) => OpcUaValue::Boolean(*v),
            Variant::SByte(v) => OpcUaValue::SByte(*v),
            Variant::Byte(v) => OpcUaValue::Byte(*v),
            Variant::Int16(v) => OpcUaValue::Int16(*v),
            Variant::UInt16(v) => OpcUaValue::UInt16(*v),
            Variant::Int32(v) => OpcUaValue::Int32(*v),
            Variant::UInt32(v) => OpcUaValue::UInt32(*v),
            Variant::Int64(v) => OpcUaValue::Int64(*v),
            Variant::UInt64(v) => OpcUaValue::UInt64(*v),
            Variant::Float(v) => OpcUaValue::Float(*v),
            Variant::Double(v) => OpcUaValue::Double(*v),
            Variant::String(v) => OpcUaValue::String(v.as_ref().to_string()),
            Variant::DateTime(v) => {
                let dt = chrono::DateTime::from_timestamp(
                    v.as_chrono().timestamp(),
                    v.as_chrono().timestamp_subsec_nanos(),
                )
                .unwrap_or_else(chrono::Utc::now);
                OpcUaValue::DateTime(dt)
            }
            Variant::ByteString(v) => OpcUaValue::ByteString(v.value.clone().unwrap_or_default()),
            Variant::Array(arr) => {
                OpcUaValue::Array(arr.values.iter().map(Self::from_opcua_variant).collect())
            }
            other => OpcUaValue::String(format!("{other:?}")),
        }
    }

    fn to_opcua_variant(value: &OpcUaValue) -> Variant {
        match value {
            OpcUaValue::Null => Variant::Empty,
            OpcUaValue::Boolean(v) => Variant::Boolean(*v),
            OpcUaValue::SByte(v) => Variant::SByte(*v),
            OpcUaValue::Byte(v) => Variant::Byte(*v),
            OpcUaValue::Int16(v) => Variant::Int16(*v),
            OpcUaValue::UInt16(v) => Variant::UInt16(*v),
            OpcUaValue::Int32(v) => Variant::Int32(*v),
            OpcUaValue::UInt32(v) => Variant::UInt32(*v),
            OpcUaValue::Int64(v) => Variant::Int64(*v),
            OpcUaValue::UInt64(v) => Variant::UInt64(*v),
            OpcUaValue::Float(v) => Variant::Float(*v),
            OpcUaValue::Double(v) => Variant::Double(*v),
            OpcUaValue::String(v) => Variant::String(UAString::from(v.as_str())),
            OpcUaValue::DateTime(v) => Variant::DateTime(Box::new(opcua::types::DateTime::from(*v))),
            OpcUaValue::ByteString(v) => Variant::ByteString(ByteString::from(v.as_slice())),
            OpcUaValue::Array(values) => {
                let variants: Vec<Variant> = values.iter().map(Self::to_opcua_variant).collect();
                Array::new(VariantTypeId::Variant, variants)
                    .map(|array| Variant::Array(Box::new(array)))
                    .unwrap_or(Variant::Empty)
            }
        }
    }
}

impl Default for RealOpcUaTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OpcUaTransport for RealOpcUaTransport {
    async fn connect(&self, config: &OpcUaConfig) -> TransportResult<()> {
        let address = config.socket_addr();
        let resolved = tokio::net::lookup_host(address.as_str())
            .await
            .map_err(|e| TransportFailure::address_resolution(format!("{address}: {e}")))?
            .next();
        if resolved.is_none() {
            return Err(TransportFailure::address_resolution(format!(
                "{address} did not resolve"
            )));
        }

        let owned = config.clone();
        let (session, run_loop) = blocking("connect", move || {
            let session = Self::open_session(&owned)?;
            let run_loop = Session::run_async(session.clone());
            Ok((session, run_loop))
        })
        .await?;

        *self.active.lock() = Some(ActiveSession {
            session,
            run_loop: Some(run_loop),
        });
        info!(url = %config.url(), "OPC UA session established");
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        let Some(mut active) = self.active.lock().take() else {
            return Ok(());
        };
        if let Some(run_loop) = active.run_loop.take() {
            if run_loop.send(SessionCommand::Stop).is_err() {
                trace!("OPC UA session loop already finished");
            }
        }
        let session = active.session;
        blocking("disconnect", move || {
            session.read().disconnect();
            Ok(())
        })
        .await
    }

    fn is_connected(&self) -> bool {
        self.active.lock().is_some()
    }

    async fn read(&self, node: &NodeId) -> TransportResult<OpcUaValue> {
        let session = self.session()?;
        let node_id = Self::to_opcua_node_id(node);
        let label = node.to_string();
        trace!(node = %label, "Reading node value");

        blocking("read", move || {
            let read_value_id = ReadValueId {
                node_id,
                attribute_id: AttributeId::Value as u32,
                index_range: UAString::null(),
                data_encoding: QualifiedName::null(),
            };
            let results = session
                .read()
                .read(&[read_value_id], TimestampsToReturn::Both, 0.0)
                .map_err(|status| failure(status, &label))?;

            let data_value = results
                .into_iter()
                .next()
                .ok_or_else(|| TransportFailure::protocol(format!("{label}: empty read result")))?;
            if let Some(status) = data_value.status {
                if status.is_bad() {
                    return Err(failure(status, &label));
                }
            }
            Ok(data_value
                .value
                .as_ref()
                .map(Self::from_opcua_variant)
                .unwrap_or(OpcUaValue::Null))
        })
        .await
    }

    async fn write(&self, node: &NodeId, value: OpcUaValue) -> TransportResult<()> {
        let session = self.session()?;
        let node_id = Self::to_opcua_node_id(node);
        let label = node.to_string();
        let variant = Self::to_opcua_variant(&value);
        trace!(node = %label, value = %value, "Writing node value");

        blocking("write", move || {
            let write_value = WriteValue {
                node_id,
                attribute_id: AttributeId::Value as u32,
                index_range: UAString::null(),
                value: DataValue::new_now(variant),
            };
            let results = session
                .read()
                .write(&[write_value])
                .map_err(|status| failure(status, &label))?;
            match results.first() {
                Some(status) if status.is_bad() => Err(failure(*status, &label)),
                Some(_) => Ok(()),
                None => Err(TransportFailure::protocol(format!("{label}: empty write result"))),
            }
        })
        .await
    }

    async fn create_subscription(
        &self,
        period: Duration,
        handler: Arc<dyn DataChangeHandler>,
    ) -> TransportResult<u32> {
        let session = self.session()?;
        let interval_ms = period.as_millis() as f64;

        let subscription_id = blocking("create_subscription", move || {
            session
                .read()
                .create_subscription(
                    interval_ms,
                    SUBSCRIPTION_LIFETIME_COUNT,
                    SUBSCRIPTION_KEEPALIVE_COUNT,
                    0,
                    0,
                    true,
                    DataChangeCallback::new(move |changed| {
                        for item in changed.iter() {
                            let data_value = item.last_value();
                            let change = DataChange {
                                node: Self::from_opcua_node_id(&item.item_to_monitor().node_id),
                                value: data_value
                                    .value
                                    .as_ref()
                                    .map(Self::from_opcua_variant)
                                    .unwrap_or(OpcUaValue::Null),
                                source_timestamp: data_value
                                    .source_timestamp
                                    .as_ref()
                                    .map(|t| t.as_chrono()),
                            };
                            handler.datachange_notification(&change);
                        }
                    }),
                )
                .map_err(|status| failure(status, "create subscription"))
        })
        .await?;

        debug!(subscription_id, interval = ?period, "Created OPC UA subscription");
        Ok(subscription_id)
    }

    async fn monitor_nodes(
        &self,
        subscription_id: u32,
        period: Duration,
        nodes: &[NodeId],
    ) -> TransportResult<()> {
        let session = self.session()?;
        let items: Vec<MonitoredItemCreateRequest> = nodes
            .iter()
            .map(|node| MonitoredItemCreateRequest {
                item_to_monitor: ReadValueId {
                    node_id: Self::to_opcua_node_id(node),
                    attribute_id: AttributeId::Value as u32,
                    index_range: UAString::null(),
                    data_encoding: QualifiedName::null(),
                },
                monitoring_mode: MonitoringMode::Reporting,
                requested_parameters: MonitoringParameters {
                    sampling_interval: period.as_millis() as f64,
                    filter: ExtensionObject::null(),
                    queue_size: MONITORED_QUEUE_SIZE,
                    discard_oldest: true,
                    client_handle: 0,
                },
            })
            .collect();
        let count = items.len();

        blocking("monitor_nodes", move || {
            let results = session
                .read()
                .create_monitored_items(subscription_id, TimestampsToReturn::Both, &items)
                .map_err(|status| failure(status, "create monitored items"))?;
            for (item, result) in items.iter().zip(results.iter()) {
                if result.status_code.is_bad() {
                    warn!(
                        node = %Self::from_opcua_node_id(&item.item_to_monitor.node_id),
                        status = %result.status_code,
                        "Failed to create monitored item"
                    );
                }
            }
            Ok(())
        })
        .await?;

        debug!(subscription_id, count, "Monitoring OPC UA nodes");
        Ok(())
    }
}
