// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Port openers.
//!
//! [`SerialCommunication`](crate::SerialCommunication) does not open ports
//! itself. It asks a [`SerialOpener`] for a byte stream each time it is
//! opened:
//!
//! - [`TokioSerialOpener`] opens a real port through `tokio-serial`.
//! - [`LoopbackOpener`] hands out one end of an in-memory duplex pipe and
//!   delivers the other end, a [`LoopbackPeer`], to the test that plays
//!   the instrument.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, trace};

use crate::config::{ByteSize, Parity, SerialConfig, StopBits};
use crate::error::{SerialError, SerialResult};

/// Byte stream a serial port is exchanged over.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Boxed serial stream.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Opens the byte stream for a serial configuration.
#[async_trait]
pub trait SerialOpener: Send + Sync + 'static {
    /// Opens the port described by `config`.
    async fn open(&self, config: &SerialConfig) -> SerialResult<DynSerial>;
}

// =============================================================================
// TokioSerialOpener
// =============================================================================

/// Opens hardware ports with `tokio-serial`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSerialOpener;

impl TokioSerialOpener {
    fn data_bits(bytesize: ByteSize) -> tokio_serial::DataBits {
        match bytesize {
            ByteSize::Five => tokio_serial::DataBits::Five,
            ByteSize::Six => tokio_serial::DataBits::Six,
            ByteSize::Seven => tokio_serial::DataBits::Seven,
            ByteSize::Eight => tokio_serial::DataBits::Eight,
        }
    }

    fn parity(port: &str, parity: Parity) -> SerialResult<tokio_serial::Parity> {
        match parity {
            Parity::None => Ok(tokio_serial::Parity::None),
            Parity::Odd => Ok(tokio_serial::Parity::Odd),
            Parity::Even => Ok(tokio_serial::Parity::Even),
            Parity::Mark | Parity::Space => {
                Err(SerialError::unsupported(port, format!("{parity} parity")))
            }
        }
    }

    fn stop_bits(port: &str, stopbits: StopBits) -> SerialResult<tokio_serial::StopBits> {
        match stopbits {
            StopBits::One => Ok(tokio_serial::StopBits::One),
            StopBits::Two => Ok(tokio_serial::StopBits::Two),
            StopBits::OnePointFive => Err(SerialError::unsupported(port, "1.5 stop bits")),
        }
    }
}

#[async_trait]
impl SerialOpener for TokioSerialOpener {
    async fn open(&self, config: &SerialConfig) -> SerialResult<DynSerial> {
        let parity = Self::parity(&config.port, config.parity)?;
        let stop_bits = Self::stop_bits(&config.port, config.stopbits)?;

        let stream = tokio_serial::new(&config.port, config.baudrate)
            .data_bits(Self::data_bits(config.bytesize))
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(config.timeout)
            .open_native_async()
            .map_err(|e| SerialError::open_with(&config.port, e))?;

        debug!(
            port = %config.port,
            baudrate = config.baudrate,
            framing = %config.framing(),
            "Serial port opened"
        );
        Ok(Box::new(stream))
    }
}

// =============================================================================
// Loopback
// =============================================================================

/// In-memory opener for tests and simulations.
///
/// Every successful `open()` creates a fresh duplex pipe. The instrument end
/// is sent to the receiver returned by [`LoopbackOpener::new`].
#[derive(Debug)]
pub struct LoopbackOpener {
    peers: mpsc::UnboundedSender<LoopbackPeer>,
    buffer_size: usize,
    fail_open: AtomicBool,
}

impl LoopbackOpener {
    /// Creates an opener and the channel its peers arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LoopbackPeer>) {
        Self::with_buffer_size(4096)
    }

    /// Same as [`LoopbackOpener::new`] with a custom pipe capacity.
    pub fn with_buffer_size(buffer_size: usize) -> (Self, mpsc::UnboundedReceiver<LoopbackPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let opener = Self {
            peers,
            buffer_size,
            fail_open: AtomicBool::new(false),
        };
        (opener, rx)
    }

    /// Makes subsequent `open()` calls fail.
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SerialOpener for LoopbackOpener {
    async fn open(&self, config: &SerialConfig) -> SerialResult<DynSerial> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(SerialError::open(&config.port, "no such device"));
        }

        let (host, device) = tokio::io::duplex(self.buffer_size);
        let peer = LoopbackPeer {
            port: config.port.clone(),
            terminator: config.terminator_bytes().to_vec(),
            stream: device,
        };
        self.peers
            .send(peer)
            .map_err(|_| SerialError::open(&config.port, "loopback peer receiver dropped"))?;

        trace!(port = %config.port, "Loopback port opened");
        Ok(Box::new(host))
    }
}

/// The instrument side of a loopback port.
#[derive(Debug)]
pub struct LoopbackPeer {
    port: String,
    terminator: Vec<u8>,
    stream: DuplexStream,
}

impl LoopbackPeer {
    /// Port name the host opened.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Sends raw bytes to the host.
    pub async fn send_bytes(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(bytes).await
    }

    /// Sends `text` followed by the port terminator.
    pub async fn send_line(&mut self, text: &str) -> std::io::Result<()> {
        let mut frame = text.as_bytes().to_vec();
        frame.extend_from_slice(&self.terminator);
        self.stream.write_all(&frame).await
    }

    /// Reads exactly `n` bytes written by the host.
    pub async fn recv_bytes(&mut self, n: usize) -> std::io::Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.stream.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Reads one terminated line written by the host, without the
    /// terminator. Returns `None` once the host closed the port.
    pub async fn recv_line(&mut self) -> std::io::Result<Option<String>> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            if self.stream.read(&mut byte).await? == 0 {
                return Ok(None);
            }
            line.push(byte[0]);
            if line.ends_with(&self.terminator) {
                line.truncate(line.len() - self.terminator.len());
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
        }
    }

    /// Answers each received line with `respond(line)` until the host
    /// closes the port. Lines mapped to `None` get no answer.
    pub fn spawn_responder<F>(mut self, respond: F) -> JoinHandle<std::io::Result<()>>
    where
        F: Fn(&str) -> Option<String> + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(line) = self.recv_line().await? {
                if let Some(reply) = respond(&line) {
                    self.send_line(&reply).await?;
                }
            }
            Ok(())
        })
    }
}
