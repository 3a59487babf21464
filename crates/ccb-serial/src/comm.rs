// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Serial communication protocol.
//!
//! # Locking
//!
//! Every data exchange holds the protocol lock for its full duration, so a
//! `query()` from one task can never interleave with a write from another.
//! Compound exchanges that need several frames in a row use
//! [`SerialCommunication::session`], which keeps the lock until the session
//! is dropped.
//!
//! # Framing
//!
//! Text is framed by [`SerialConfig::terminator`]. Bytes received past a
//! terminator stay buffered for the next read, also when a read times out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ccb_core::{CcbResult, CommunicationProtocol, FromConfig, ProtocolState};
use parking_lot::Mutex as StateLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, trace, warn};

use crate::config::SerialConfig;
use crate::error::{SerialError, SerialResult, PROTOCOL};
use crate::transport::{DynSerial, SerialOpener, TokioSerialOpener};

const READ_CHUNK: usize = 256;

// =============================================================================
// Inner State
// =============================================================================

#[derive(Default)]
struct SerialInner {
    port: Option<DynSerial>,
    pending: Vec<u8>,
}

impl SerialInner {
    fn port(&mut self, config: &SerialConfig) -> SerialResult<(&mut DynSerial, &mut Vec<u8>)> {
        let Self { port, pending } = self;
        match port.as_mut() {
            Some(port) => Ok((port, pending)),
            None => Err(SerialError::not_open(&config.port)),
        }
    }

    async fn write_bytes(&mut self, config: &SerialConfig, data: &[u8]) -> SerialResult<()> {
        let (port, _) = self.port(config)?;
        port.write_all(data)
            .await
            .map_err(|e| SerialError::io(&config.port, e))?;
        port.flush()
            .await
            .map_err(|e| SerialError::io(&config.port, e))?;
        trace!(port = %config.port, bytes = data.len(), "Serial write");
        Ok(())
    }

    async fn write_text(&mut self, config: &SerialConfig, text: &str) -> SerialResult<()> {
        let mut frame = Vec::with_capacity(text.len() + config.terminator.len());
        frame.extend_from_slice(text.as_bytes());
        frame.extend_from_slice(config.terminator_bytes());
        trace!(port = %config.port, text, "Serial write text");
        self.write_bytes(config, &frame).await
    }

    /// Reads more bytes into the pending buffer. Returns `false` on timeout.
    async fn fill(
        port: &mut DynSerial,
        pending: &mut Vec<u8>,
        config: &SerialConfig,
        deadline: Instant,
    ) -> SerialResult<bool> {
        let mut chunk = [0u8; READ_CHUNK];
        match timeout_at(deadline, port.read(&mut chunk)).await {
            Err(_) => Ok(false),
            Ok(Ok(0)) => Err(SerialError::io(
                &config.port,
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "port closed by peer"),
            )),
            Ok(Ok(n)) => {
                pending.extend_from_slice(&chunk[..n]);
                Ok(true)
            }
            Ok(Err(e)) => Err(SerialError::io(&config.port, e)),
        }
    }

    async fn read_bytes(&mut self, config: &SerialConfig, n: usize) -> SerialResult<Vec<u8>> {
        let deadline = Instant::now() + config.timeout;
        let (port, pending) = self.port(config)?;
        while pending.len() < n {
            if !Self::fill(port, pending, config, deadline).await? {
                return Err(SerialError::read_timeout(&config.port, config.timeout));
            }
        }
        Ok(pending.drain(..n).collect())
    }

    /// One terminated frame without its terminator, `None` on timeout.
    async fn read_frame(&mut self, config: &SerialConfig) -> SerialResult<Option<Vec<u8>>> {
        let deadline = Instant::now() + config.timeout;
        let terminator = config.terminator_bytes();
        let (port, pending) = self.port(config)?;
        loop {
            if let Some(pos) = pending
                .windows(terminator.len())
                .position(|window| window == terminator)
            {
                let mut frame: Vec<u8> = pending.drain(..pos + terminator.len()).collect();
                frame.truncate(pos);
                return Ok(Some(frame));
            }
            if !Self::fill(port, pending, config, deadline).await? {
                return Ok(None);
            }
        }
    }

    async fn read_text(&mut self, config: &SerialConfig) -> SerialResult<String> {
        let Some(frame) = self.read_frame(config).await? else {
            debug!(port = %config.port, timeout = ?config.timeout, "Serial read timed out");
            return Ok(String::new());
        };
        let text = decode(config, frame)?;
        trace!(port = %config.port, text = %text, "Serial read text");
        Ok(text)
    }

    async fn read_text_nonempty(
        &mut self,
        config: &SerialConfig,
        n_attempts: u32,
        wait: Duration,
    ) -> SerialResult<String> {
        for attempt in 1..=n_attempts {
            let text = self.read_text(config).await?;
            if !text.trim().is_empty() {
                return Ok(text);
            }
            if attempt < n_attempts {
                tokio::time::sleep(wait).await;
            }
        }
        debug!(
            port = %config.port,
            attempts = n_attempts,
            "No non-empty text received"
        );
        Ok(String::new())
    }
}

fn decode(config: &SerialConfig, frame: Vec<u8>) -> SerialResult<String> {
    if config.lossy_decoding {
        return Ok(String::from_utf8_lossy(&frame).into_owned());
    }
    String::from_utf8(frame).map_err(|e| SerialError::decode(&config.port, e.to_string()))
}

// =============================================================================
// SerialCommunication
// =============================================================================

/// Text and byte communication over one serial port.
pub struct SerialCommunication {
    config: SerialConfig,
    opener: Arc<dyn SerialOpener>,
    inner: Mutex<SerialInner>,
    state: StateLock<ProtocolState>,
}

impl SerialCommunication {
    /// Creates a closed communication for a hardware port.
    ///
    /// Mark or space parity and 1.5 stop bits are logged as warnings here,
    /// since the hardware opener rejects them on `open()`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` does not validate.
    pub fn new(config: SerialConfig) -> SerialResult<Self> {
        if !config.parity.is_hardware_supported() || !config.stopbits.is_hardware_supported() {
            warn!(
                port = %config.port,
                framing = %config.framing(),
                "Framing not supported by hardware ports, open() will fail"
            );
        }
        Self::with_opener(config, Arc::new(TokioSerialOpener))
    }

    /// Creates a closed communication that opens its stream through `opener`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` does not validate.
    pub fn with_opener(config: SerialConfig, opener: Arc<dyn SerialOpener>) -> SerialResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            opener,
            inner: Mutex::new(SerialInner::default()),
            state: StateLock::new(ProtocolState::Closed),
        })
    }

    /// The configuration this protocol was built from.
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn set_state(&self, state: ProtocolState) {
        *self.state.lock() = state;
    }

    async fn open_port(&self) -> SerialResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.port.is_some() {
            warn!(port = %self.config.port, "Serial port already open");
            return Ok(());
        }

        self.set_state(ProtocolState::Opening);
        match self.opener.open(&self.config).await {
            Ok(port) => {
                inner.port = Some(port);
                inner.pending.clear();
                self.set_state(ProtocolState::Open);
                info!(
                    port = %self.config.port,
                    baudrate = self.config.baudrate,
                    framing = %self.config.framing(),
                    "Serial communication opened"
                );
                Ok(())
            }
            Err(e) => {
                self.set_state(ProtocolState::Error);
                Err(e)
            }
        }
    }

    async fn close_port(&self) {
        let mut inner = self.inner.lock().await;
        let Some(mut port) = inner.port.take() else {
            warn!(port = %self.config.port, "Serial port not open");
            self.set_state(ProtocolState::Closed);
            return;
        };
        if let Err(e) = port.shutdown().await {
            warn!(port = %self.config.port, error = %e, "Serial port shutdown failed");
        }
        inner.pending.clear();
        self.set_state(ProtocolState::Closed);
        info!(port = %self.config.port, "Serial communication closed");
    }

    /// Holds the protocol lock for a compound exchange.
    pub async fn session(&self) -> SerialSession<'_> {
        SerialSession {
            inner: self.inner.lock().await,
            config: &self.config,
            state: &self.state,
        }
    }

    /// Writes raw bytes.
    pub async fn write_bytes(&self, data: &[u8]) -> SerialResult<()> {
        self.session().await.write_bytes(data).await
    }

    /// Reads exactly `n` bytes, failing after the configured timeout.
    pub async fn read_bytes(&self, n: usize) -> SerialResult<Vec<u8>> {
        self.session().await.read_bytes(n).await
    }

    /// Writes `text` followed by the terminator.
    pub async fn write_text(&self, text: &str) -> SerialResult<()> {
        self.session().await.write_text(text).await
    }

    /// Reads one terminated line, terminator stripped.
    ///
    /// Returns an empty string if no complete line arrives in time.
    pub async fn read_text(&self) -> SerialResult<String> {
        self.session().await.read_text().await
    }

    /// Reads lines until one is not blank.
    ///
    /// Makes up to `n_attempts_max` attempts (the configured default when
    /// `None`), waiting `wait_sec_read_text_nonempty` between them, and
    /// returns an empty string if every attempt came back blank.
    pub async fn read_text_nonempty(&self, n_attempts_max: Option<u32>) -> SerialResult<String> {
        self.session()
            .await
            .read_text_nonempty(n_attempts_max)
            .await
    }

    /// Writes `text` and reads the answer line.
    pub async fn query(&self, text: &str) -> SerialResult<String> {
        self.session().await.query(text).await
    }
}

#[async_trait]
impl CommunicationProtocol for SerialCommunication {
    fn protocol(&self) -> &'static str {
        PROTOCOL
    }

    fn target(&self) -> String {
        self.config.port.clone()
    }

    async fn open(&self) -> CcbResult<()> {
        self.open_port().await.map_err(Into::into)
    }

    async fn close(&self) -> CcbResult<()> {
        self.close_port().await;
        Ok(())
    }

    async fn is_open(&self) -> bool {
        self.state().is_open()
    }

    fn state(&self) -> ProtocolState {
        *self.state.lock()
    }
}

impl FromConfig for SerialCommunication {
    type Config = SerialConfig;

    fn from_config(config: SerialConfig) -> CcbResult<Self> {
        Self::new(config).map_err(Into::into)
    }

    fn config(&self) -> &SerialConfig {
        &self.config
    }
}

impl std::fmt::Debug for SerialCommunication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialCommunication")
            .field("port", &self.config.port)
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// SerialSession
// =============================================================================

/// Exclusive access to an open serial port.
///
/// Obtained from [`SerialCommunication::session`]; other callers wait until
/// the session is dropped.
///
/// A transport failure releases the port and leaves the protocol in
/// [`ProtocolState::Error`], so a later `open()` starts a fresh link.
pub struct SerialSession<'a> {
    inner: MutexGuard<'a, SerialInner>,
    config: &'a SerialConfig,
    state: &'a StateLock<ProtocolState>,
}

impl SerialSession<'_> {
    fn settle<T>(&mut self, result: SerialResult<T>) -> SerialResult<T> {
        if let Err(error @ SerialError::Io { .. }) = &result {
            warn!(port = %self.config.port, error = %error, "Serial link lost");
            // Dropping the stream releases the port.
            self.inner.port = None;
            self.inner.pending.clear();
            *self.state.lock() = ProtocolState::Error;
        }
        result
    }

    /// Writes raw bytes.
    pub async fn write_bytes(&mut self, data: &[u8]) -> SerialResult<()> {
        let result = self.inner.write_bytes(self.config, data).await;
        self.settle(result)
    }

    /// Reads exactly `n` bytes.
    pub async fn read_bytes(&mut self, n: usize) -> SerialResult<Vec<u8>> {
        let result = self.inner.read_bytes(self.config, n).await;
        self.settle(result)
    }

    /// Writes `text` followed by the terminator.
    pub async fn write_text(&mut self, text: &str) -> SerialResult<()> {
        let result = self.inner.write_text(self.config, text).await;
        self.settle(result)
    }

    /// Reads one terminated line; empty on timeout.
    pub async fn read_text(&mut self) -> SerialResult<String> {
        let result = self.inner.read_text(self.config).await;
        self.settle(result)
    }

    /// Reads lines until one is not blank; empty if all attempts were blank.
    pub async fn read_text_nonempty(&mut self, n_attempts_max: Option<u32>) -> SerialResult<String> {
        let attempts =
            n_attempts_max.unwrap_or(self.config.default_n_attempts_read_text_nonempty);
        let result = self
            .inner
            .read_text_nonempty(self.config, attempts, self.config.wait_sec_read_text_nonempty)
            .await;
        self.settle(result)
    }

    /// Writes `text` and reads the answer line.
    pub async fn query(&mut self, text: &str) -> SerialResult<String> {
        self.write_text(text).await?;
        self.read_text().await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{LoopbackOpener, LoopbackPeer};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn loopback(config: SerialConfig) -> (SerialCommunication, UnboundedReceiver<LoopbackPeer>) {
        let (opener, peers) = LoopbackOpener::new();
        let com = SerialCommunication::with_opener(config, Arc::new(opener)).unwrap();
        (com, peers)
    }

    fn config() -> SerialConfig {
        SerialConfig::builder()
            .port("loop0")
            .timeout(Duration::from_millis(100))
            .wait_sec_read_text_nonempty(Duration::from_millis(10))
            .default_n_attempts_read_text_nonempty(3)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_open_close_lifecycle() {
        let (com, _peers) = loopback(config());
        assert!(!com.is_open().await);

        com.open().await.unwrap();
        assert!(com.is_open().await);
        com.open().await.unwrap();
        assert!(com.is_open().await);

        com.close().await.unwrap();
        assert!(!com.is_open().await);
        com.close().await.unwrap();

        com.open().await.unwrap();
        assert!(com.is_open().await);
    }

    #[tokio::test]
    async fn test_open_failure_sets_error_state() {
        let (opener, _peers) = LoopbackOpener::new();
        opener.set_fail_open(true);
        let com = SerialCommunication::with_opener(config(), Arc::new(opener)).unwrap();

        let err = com.open().await.unwrap_err();
        assert!(err.is_connection());
        assert_eq!(com.state(), ProtocolState::Error);
    }

    #[tokio::test]
    async fn test_io_requires_open() {
        let (com, _peers) = loopback(config());
        assert!(matches!(
            com.write_text("X").await,
            Err(SerialError::NotOpen { .. })
        ));
    }

    #[tokio::test]
    async fn test_write_text_appends_terminator() {
        let (com, mut peers) = loopback(config());
        com.open().await.unwrap();
        let mut peer = peers.recv().await.unwrap();

        com.write_text("VOLT 10").await.unwrap();
        assert_eq!(peer.recv_bytes(9).await.unwrap(), b"VOLT 10\r\n");
    }

    #[tokio::test]
    async fn test_read_text_keeps_following_lines_buffered() {
        let (com, mut peers) = loopback(config());
        com.open().await.unwrap();
        let mut peer = peers.recv().await.unwrap();

        peer.send_bytes(b"first\r\nsecond\r\nthi").await.unwrap();
        assert_eq!(com.read_text().await.unwrap(), "first");
        assert_eq!(com.read_text().await.unwrap(), "second");
        assert_eq!(com.read_text().await.unwrap(), "");

        peer.send_bytes(b"rd\r\n").await.unwrap();
        assert_eq!(com.read_text().await.unwrap(), "third");
    }

    #[tokio::test]
    async fn test_read_text_nonempty_skips_blank_lines() {
        let (com, mut peers) = loopback(config());
        com.open().await.unwrap();
        let mut peer = peers.recv().await.unwrap();

        peer.send_bytes(b"\r\n  \r\nREADY\r\n").await.unwrap();
        assert_eq!(com.read_text_nonempty(None).await.unwrap(), "READY");
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_text_nonempty_soft_timeout() {
        let (com, _peers) = loopback(config());
        com.open().await.unwrap();

        let text = com.read_text_nonempty(Some(2)).await.unwrap();
        assert_eq!(text, "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_bytes_timeout() {
        let (com, mut peers) = loopback(config());
        com.open().await.unwrap();
        let mut peer = peers.recv().await.unwrap();

        peer.send_bytes(&[0x01, 0x02]).await.unwrap();
        assert!(matches!(
            com.read_bytes(3).await,
            Err(SerialError::ReadTimeout { .. })
        ));
        peer.send_bytes(&[0x03]).await.unwrap();
        assert_eq!(com.read_bytes(3).await.unwrap(), vec![0x01, 0x02, 0x03]);
    }

    #[tokio::test]
    async fn test_dead_link_releases_port() {
        let (com, mut peers) = loopback(config());
        com.open().await.unwrap();
        drop(peers.recv().await.unwrap());

        assert!(matches!(
            com.read_bytes(1).await,
            Err(SerialError::Io { .. })
        ));
        assert!(!com.is_open().await);
        assert_eq!(com.state(), ProtocolState::Error);

        com.open().await.unwrap();
        let mut peer = peers.recv().await.unwrap();
        com.write_text("PING").await.unwrap();
        assert_eq!(peer.recv_line().await.unwrap().as_deref(), Some("PING"));
    }

    #[tokio::test]
    async fn test_query_with_responder() {
        let (com, mut peers) = loopback(config());
        com.open().await.unwrap();
        let responder = peers
            .recv()
            .await
            .unwrap()
            .spawn_responder(|line| Some(format!("echo:{line}")));

        assert_eq!(com.query("*IDN?").await.unwrap(), "echo:*IDN?");

        com.close().await.unwrap();
        responder.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_invalid_utf8() {
        let (com, mut peers) = loopback(config());
        com.open().await.unwrap();
        let mut peer = peers.recv().await.unwrap();

        peer.send_bytes(&[0xff, 0xfe, b'\r', b'\n']).await.unwrap();
        assert!(matches!(
            com.read_text().await,
            Err(SerialError::Decode { .. })
        ));

        let mut lossy = config();
        lossy.lossy_decoding = true;
        let (com, mut peers) = loopback(lossy);
        com.open().await.unwrap();
        let mut peer = peers.recv().await.unwrap();
        peer.send_bytes(&[b'a', 0xff, b'\r', b'\n']).await.unwrap();
        assert_eq!(com.read_text().await.unwrap(), "a\u{fffd}");
    }

    #[test]
    fn test_from_config_reports_config() {
        let com = SerialCommunication::from_config(config()).unwrap();
        assert_eq!(FromConfig::config(&com), &config());
        assert_eq!(com.display_name(), "serial://loop0");
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut bad = config();
        bad.terminator.clear();
        assert!(SerialCommunication::new(bad).is_err());
    }
}
