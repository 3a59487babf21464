// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! VISA backends.
//!
//! A [`VisaBackend`] opens a resource and hands back a [`VisaSession`] that
//! exchanges terminated messages. [`TcpSocketBackend`] speaks raw SCPI over
//! `TCPIP::SOCKET` resources with tokio alone; the NI-VISA backend behind the
//! `ni-visa` feature also serves `INSTR` resources.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, trace};

use crate::config::{InterfaceType, VisaConfig};
use crate::error::{VisaError, VisaResult};

const READ_CHUNK: usize = 1024;

/// Opens VISA resources.
#[async_trait]
pub trait VisaBackend: Send + Sync + 'static {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Opens the resource described by `config`.
    async fn open(&self, config: &VisaConfig) -> VisaResult<Box<dyn VisaSession>>;
}

/// An open VISA resource.
#[async_trait]
pub trait VisaSession: Send {
    /// Writes one message; the write termination is appended.
    async fn write(&mut self, message: &str) -> VisaResult<()>;

    /// Reads one message; the read termination is stripped.
    async fn read(&mut self) -> VisaResult<String>;

    /// Releases the resource.
    async fn close(&mut self) -> VisaResult<()>;
}

/// Returns the backend selected by the enabled features.
pub fn default_backend() -> std::sync::Arc<dyn VisaBackend> {
    #[cfg(feature = "ni-visa")]
    {
        std::sync::Arc::new(crate::ni_visa::NiVisaBackend)
    }
    #[cfg(not(feature = "ni-visa"))]
    {
        std::sync::Arc::new(TcpSocketBackend)
    }
}

pub(crate) fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

// =============================================================================
// TcpSocketBackend
// =============================================================================

/// Raw SCPI over TCP (`TCPIP::host::port::SOCKET`).
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpSocketBackend;

#[async_trait]
impl VisaBackend for TcpSocketBackend {
    fn name(&self) -> &'static str {
        "tcp-socket"
    }

    async fn open(&self, config: &VisaConfig) -> VisaResult<Box<dyn VisaSession>> {
        let resource = config.resource();
        if config.interface != InterfaceType::TcpipSocket {
            return Err(VisaError::unsupported(
                resource,
                "INSTR resources need the ni-visa backend",
            ));
        }

        let addr = config.socket_addr();
        let stream = timeout(config.open_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                VisaError::open(
                    &resource,
                    format!("connect to {addr} timed out after {:?}", config.open_timeout),
                )
            })?
            .map_err(|e| VisaError::open_with(&resource, e))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(resource = %resource, error = %e, "Failed to set TCP_NODELAY");
        }

        Ok(Box::new(TcpSocketSession {
            resource,
            stream: Some(stream),
            pending: Vec::new(),
            write_termination: config.write_termination.clone().into_bytes(),
            read_termination: config.read_termination.clone().into_bytes(),
            timeout: config.timeout,
        }))
    }
}

struct TcpSocketSession {
    resource: String,
    stream: Option<TcpStream>,
    pending: Vec<u8>,
    write_termination: Vec<u8>,
    read_termination: Vec<u8>,
    timeout: std::time::Duration,
}

impl TcpSocketSession {
    fn stream(&mut self) -> VisaResult<&mut TcpStream> {
        match self.stream.as_mut() {
            Some(stream) => Ok(stream),
            None => Err(VisaError::not_open(&self.resource)),
        }
    }

    fn take_frame(&mut self) -> Option<String> {
        let pos = find_subsequence(&self.pending, &self.read_termination)?;
        let frame: Vec<u8> = self
            .pending
            .drain(..pos + self.read_termination.len())
            .take(pos)
            .collect();
        Some(String::from_utf8_lossy(&frame).into_owned())
    }
}

#[async_trait]
impl VisaSession for TcpSocketSession {
    async fn write(&mut self, message: &str) -> VisaResult<()> {
        let mut frame = Vec::with_capacity(message.len() + self.write_termination.len());
        frame.extend_from_slice(message.as_bytes());
        frame.extend_from_slice(&self.write_termination);

        let deadline = Instant::now() + self.timeout;
        let resource = self.resource.clone();
        let limit = self.timeout;
        let stream = self.stream()?;
        timeout_at(deadline, stream.write_all(&frame))
            .await
            .map_err(|_| VisaError::timeout(&resource, limit))?
            .map_err(|e| VisaError::io_with(&resource, e))?;
        trace!(resource = %resource, message, "VISA write");
        Ok(())
    }

    async fn read(&mut self) -> VisaResult<String> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(frame) = self.take_frame() {
                trace!(resource = %self.resource, message = %frame, "VISA read");
                return Ok(frame);
            }

            let resource = self.resource.clone();
            let limit = self.timeout;
            let mut chunk = [0u8; READ_CHUNK];
            let stream = self.stream()?;
            let n = timeout_at(deadline, stream.read(&mut chunk))
                .await
                .map_err(|_| VisaError::timeout(&resource, limit))?
                .map_err(|e| VisaError::io_with(&resource, e))?;
            if n == 0 {
                self.stream = None;
                return Err(VisaError::io(resource, "connection closed by instrument"));
            }
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }

    async fn close(&mut self) -> VisaResult<()> {
        self.pending.clear();
        if let Some(mut stream) = self.stream.take() {
            stream
                .shutdown()
                .await
                .map_err(|e| VisaError::io_with(&self.resource, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    async fn instrument() -> (VisaConfig, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line == "*IDN?" {
                    // Two replies in one segment.
                    write.write_all(b"ACME,PSU,1,1.0\nextra\n").await.unwrap();
                }
            }
        });
        let config = VisaConfig::builder()
            .host("127.0.0.1")
            .port(port)
            .timeout(Duration::from_millis(300))
            .build()
            .unwrap();
        (config, server)
    }

    #[tokio::test]
    async fn test_socket_exchange_keeps_buffered_frames() {
        let (config, _server) = instrument().await;
        let mut session = TcpSocketBackend.open(&config).await.unwrap();

        session.write("*IDN?").await.unwrap();
        assert_eq!(session.read().await.unwrap(), "ACME,PSU,1,1.0");
        assert_eq!(session.read().await.unwrap(), "extra");

        let err = session.read().await.unwrap_err();
        assert!(matches!(err, VisaError::Timeout { .. }));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_instr_needs_ni_visa() {
        let config = VisaConfig::builder()
            .host("127.0.0.1")
            .interface(InterfaceType::TcpipInstr)
            .build()
            .unwrap();
        let err = TcpSocketBackend.open(&config).await.err().unwrap();
        assert!(matches!(err, VisaError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = VisaConfig::builder().host("127.0.0.1").port(port).build().unwrap();
        let err = TcpSocketBackend.open(&config).await.err().unwrap();
        assert!(matches!(err, VisaError::Open { .. }));
    }

    #[test]
    fn test_find_subsequence() {
        assert_eq!(find_subsequence(b"ab\r\ncd", b"\r\n"), Some(2));
        assert_eq!(find_subsequence(b"ab", b"\r\n"), None);
    }
}
