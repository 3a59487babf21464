// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Modbus/TCP communication protocol.
//!
//! One `tokio-modbus` client context is held behind a mutex. Every request
//! holds that mutex until its response has been received, and a request
//! whose connection breaks drops the context so that the next `open()`
//! reconnects.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use ccb_core::{CcbResult, CommunicationProtocol, FromConfig, ProtocolState};
use parking_lot::Mutex as StateLock;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::error::Elapsed;
use tokio::time::timeout;
use tokio_modbus::client::{Client, Context as ModbusContext, Reader, Writer};
use tokio_modbus::prelude::*;
use tokio_modbus::{Error as TokioModbusError, ExceptionCode};
use tracing::{debug, info, warn};

use crate::config::ModbusTcpConfig;
use crate::error::{ModbusError, ModbusResult, PROTOCOL};

type ModbusOutcome<T> = Result<Result<Result<T, ExceptionCode>, TokioModbusError>, Elapsed>;

struct ModbusInner {
    context: Option<ModbusContext>,
}

/// Register and coil access to one Modbus/TCP unit.
pub struct ModbusTcpCommunication {
    config: ModbusTcpConfig,
    inner: Mutex<ModbusInner>,
    state: StateLock<ProtocolState>,
}

impl ModbusTcpCommunication {
    /// Creates a closed communication.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` does not validate.
    pub fn new(config: ModbusTcpConfig) -> ModbusResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            inner: Mutex::new(ModbusInner { context: None }),
            state: StateLock::new(ProtocolState::Closed),
        })
    }

    /// Returns a reference to the configuration.
    pub fn config(&self) -> &ModbusTcpConfig {
        &self.config
    }

    fn address(&self) -> String {
        self.config.socket_addr()
    }

    fn set_state(&self, state: ProtocolState) {
        *self.state.lock() = state;
    }

    async fn resolve_address(&self) -> ModbusResult<SocketAddr> {
        let address = self.address();
        if let Ok(addr) = address.parse::<SocketAddr>() {
            return Ok(addr);
        }
        let resolved = tokio::net::lookup_host(&address)
            .await
            .map_err(|e| ModbusError::connection_with(&address, "connect", e))?
            .next()
            .ok_or_else(|| ModbusError::connection(&address, "connect", "host did not resolve"));
        resolved
    }

    async fn connect(&self) -> ModbusResult<ModbusContext> {
        let address = self.address();
        let connect = async {
            let socket_addr = self.resolve_address().await?;
            let stream = TcpStream::connect(socket_addr)
                .await
                .map_err(|e| ModbusError::connection_with(&address, "connect", e))?;
            stream.set_nodelay(self.config.tcp_nodelay).ok();
            Ok::<_, ModbusError>(tcp::attach_slave(stream, Slave(self.config.unit_id)))
        };

        timeout(self.config.connect_timeout, connect)
            .await
            .map_err(|_| ModbusError::timed_out(&address, "connect", self.config.connect_timeout))?
    }

    async fn open_connection(&self) -> ModbusResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.context.is_some() {
            warn!(address = %self.address(), "Modbus connection already open");
            return Ok(());
        }

        self.set_state(ProtocolState::Opening);
        match self.connect().await {
            Ok(ctx) => {
                inner.context = Some(ctx);
                self.set_state(ProtocolState::Open);
                info!(
                    host = %self.config.host,
                    port = self.config.port,
                    unit_id = self.config.unit_id,
                    "Modbus TCP communication opened"
                );
                Ok(())
            }
            Err(e) => {
                self.set_state(ProtocolState::Error);
                Err(e)
            }
        }
    }

    async fn close_connection(&self) {
        let mut inner = self.inner.lock().await;
        match inner.context.take() {
            Some(mut ctx) => {
                if let Err(e) = ctx.disconnect().await {
                    warn!(address = %self.address(), error = %e, "Error disconnecting from Modbus device");
                }
                info!(address = %self.address(), "Modbus TCP communication closed");
            }
            None => warn!(address = %self.address(), "Modbus connection not open"),
        }
        self.set_state(ProtocolState::Closed);
    }

    fn exception_code(code: ExceptionCode) -> u8 {
        match code {
            ExceptionCode::IllegalFunction => 0x01,
            ExceptionCode::IllegalDataAddress => 0x02,
            ExceptionCode::IllegalDataValue => 0x03,
            ExceptionCode::ServerDeviceFailure => 0x04,
            ExceptionCode::Acknowledge => 0x05,
            ExceptionCode::ServerDeviceBusy => 0x06,
            ExceptionCode::MemoryParityError => 0x08,
            ExceptionCode::GatewayPathUnavailable => 0x0A,
            ExceptionCode::GatewayTargetDevice => 0x0B,
            #[allow(unreachable_patterns)]
            _ => 0xFF,
        }
    }

    /// Maps a request outcome. A broken connection is dropped.
    async fn settle<T>(
        &self,
        inner: &mut ModbusInner,
        operation: &'static str,
        outcome: ModbusOutcome<T>,
    ) -> ModbusResult<T> {
        let address = self.address();
        let error = match outcome {
            Ok(Ok(Ok(value))) => return Ok(value),
            Ok(Ok(Err(code))) => {
                return Err(ModbusError::exception(
                    address,
                    operation,
                    Self::exception_code(code),
                ))
            }
            Ok(Err(TokioModbusError::Transport(io))) => {
                ModbusError::connection_with(&address, operation, io)
            }
            Ok(Err(TokioModbusError::Protocol(protocol))) => {
                ModbusError::connection(&address, operation, format!("{protocol:?}"))
            }
            Err(_) => ModbusError::timed_out(&address, operation, self.config.operation_timeout),
        };

        warn!(address = %address, operation, error = %error, "Modbus connection lost");
        if let Some(mut ctx) = inner.context.take() {
            ctx.disconnect().await.ok();
        }
        self.set_state(ProtocolState::Error);
        Err(error)
    }

    fn context<'a>(&self, inner: &'a mut ModbusInner) -> ModbusResult<&'a mut ModbusContext> {
        inner
            .context
            .as_mut()
            .ok_or_else(|| ModbusError::not_connected(self.address()))
    }

    fn request_timeout(&self) -> Duration {
        self.config.operation_timeout
    }

    /// Reads `count` holding registers starting at `address`.
    pub async fn read_holding_registers(&self, address: u16, count: u16) -> ModbusResult<Vec<u16>> {
        let mut inner = self.inner.lock().await;
        let ctx = self.context(&mut inner)?;
        let outcome = timeout(
            self.request_timeout(),
            ctx.read_holding_registers(address, count),
        )
        .await;
        let values = self.settle(&mut inner, "read_holding_registers", outcome).await?;
        debug!(address, count, "Read holding registers");
        Ok(values)
    }

    /// Reads `count` input registers starting at `address`.
    pub async fn read_input_registers(&self, address: u16, count: u16) -> ModbusResult<Vec<u16>> {
        let mut inner = self.inner.lock().await;
        let ctx = self.context(&mut inner)?;
        let outcome = timeout(
            self.request_timeout(),
            ctx.read_input_registers(address, count),
        )
        .await;
        self.settle(&mut inner, "read_input_registers", outcome).await
    }

    /// Writes one holding register.
    pub async fn write_register(&self, address: u16, value: u16) -> ModbusResult<()> {
        let mut inner = self.inner.lock().await;
        let ctx = self.context(&mut inner)?;
        let outcome = timeout(
            self.request_timeout(),
            ctx.write_single_register(address, value),
        )
        .await;
        self.settle(&mut inner, "write_register", outcome).await?;
        debug!(address, value, "Wrote holding register");
        Ok(())
    }

    /// Writes consecutive holding registers starting at `address`.
    pub async fn write_registers(&self, address: u16, values: &[u16]) -> ModbusResult<()> {
        let mut inner = self.inner.lock().await;
        let ctx = self.context(&mut inner)?;
        let outcome = timeout(
            self.request_timeout(),
            ctx.write_multiple_registers(address, values),
        )
        .await;
        self.settle(&mut inner, "write_registers", outcome).await
    }

    /// Reads `count` coils starting at `address`.
    pub async fn read_coils(&self, address: u16, count: u16) -> ModbusResult<Vec<bool>> {
        let mut inner = self.inner.lock().await;
        let ctx = self.context(&mut inner)?;
        let outcome = timeout(self.request_timeout(), ctx.read_coils(address, count)).await;
        self.settle(&mut inner, "read_coils", outcome).await
    }

    /// Writes one coil.
    pub async fn write_coil(&self, address: u16, value: bool) -> ModbusResult<()> {
        let mut inner = self.inner.lock().await;
        let ctx = self.context(&mut inner)?;
        let outcome = timeout(self.request_timeout(), ctx.write_single_coil(address, value)).await;
        self.settle(&mut inner, "write_coil", outcome).await
    }

    async fn probe(&self) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(ctx) = inner.context.as_mut() else {
            return false;
        };
        let Some(register) = self.config.probe_register else {
            return true;
        };
        let outcome = timeout(self.request_timeout(), ctx.read_holding_registers(register, 1)).await;
        match self.settle(&mut inner, "probe", outcome).await {
            Ok(_) | Err(ModbusError::Exception { .. }) => true,
            Err(_) => false,
        }
    }
}

#[async_trait]
impl CommunicationProtocol for ModbusTcpCommunication {
    fn protocol(&self) -> &'static str {
        PROTOCOL
    }

    fn target(&self) -> String {
        self.address()
    }

    async fn open(&self) -> CcbResult<()> {
        self.open_connection().await.map_err(Into::into)
    }

    async fn close(&self) -> CcbResult<()> {
        self.close_connection().await;
        Ok(())
    }

    async fn is_open(&self) -> bool {
        self.probe().await
    }

    fn state(&self) -> ProtocolState {
        *self.state.lock()
    }
}

impl FromConfig for ModbusTcpCommunication {
    type Config = ModbusTcpConfig;

    fn from_config(config: ModbusTcpConfig) -> CcbResult<Self> {
        Self::new(config).map_err(Into::into)
    }

    fn config(&self) -> &ModbusTcpConfig {
        &self.config
    }
}

impl std::fmt::Debug for ModbusTcpCommunication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusTcpCommunication")
            .field("address", &self.address())
            .field("unit_id", &self.config.unit_id)
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
