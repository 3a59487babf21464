// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! NI-VISA backend over `visa-rs`.
//!
//! The vendor library is blocking, so every call runs on the blocking pool.
//! The resource manager is kept alive for as long as the instrument session.

use std::ffi::CString;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;
use visa_rs::prelude::*;

use crate::backend::{find_subsequence, VisaBackend, VisaSession};
use crate::config::VisaConfig;
use crate::error::{VisaError, VisaResult};

const READ_CHUNK: usize = 1024;

/// Backend over the NI-VISA (or compatible) shared library.
#[derive(Debug, Clone, Copy, Default)]
pub struct NiVisaBackend;

struct Handle {
    _rm: DefaultRM,
    instrument: Instrument,
}

async fn blocking<T, F>(resource: &str, f: F) -> VisaResult<T>
where
    F: FnOnce() -> VisaResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VisaError::io(resource, format!("VISA call did not complete: {e}")))?
}

#[async_trait]
impl VisaBackend for NiVisaBackend {
    fn name(&self) -> &'static str {
        "ni-visa"
    }

    async fn open(&self, config: &VisaConfig) -> VisaResult<Box<dyn VisaSession>> {
        let resource = config.resource();
        let open_timeout = config.open_timeout;
        let io_timeout = config.timeout;

        let name = resource.clone();
        let handle = blocking(&resource, move || {
            let rm = DefaultRM::new().map_err(|e| VisaError::open(&name, e.to_string()))?;
            let id: ResID = CString::new(name.clone())
                .map_err(|e| VisaError::open(&name, e.to_string()))?
                .into();
            let instrument = rm
                .open(&id, AccessMode::NO_LOCK, open_timeout)
                .map_err(|e| VisaError::open(&name, e.to_string()))?;
            let millis = u32::try_from(io_timeout.as_millis()).unwrap_or(u32::MAX);
            if let Some(attr) = attribute::AttrTmoValue::new_checked(millis) {
                instrument
                    .set_attr(attr)
                    .map_err(|e| VisaError::open(&name, e.to_string()))?;
            }
            Ok(Handle {
                _rm: rm,
                instrument,
            })
        })
        .await?;

        debug!(resource = %resource, "Opened NI-VISA session");
        Ok(Box::new(NiVisaSession {
            resource,
            handle: Some(Arc::new(Mutex::new(handle))),
            write_termination: config.write_termination.clone().into_bytes(),
            read_termination: config.read_termination.clone().into_bytes(),
            timeout: io_timeout,
        }))
    }
}

struct NiVisaSession {
    resource: String,
    handle: Option<Arc<Mutex<Handle>>>,
    write_termination: Vec<u8>,
    read_termination: Vec<u8>,
    timeout: Duration,
}

impl NiVisaSession {
    fn handle(&self) -> VisaResult<Arc<Mutex<Handle>>> {
        self.handle
            .clone()
            .ok_or_else(|| VisaError::not_open(&self.resource))
    }
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    )
}

#[async_trait]
impl VisaSession for NiVisaSession {
    async fn write(&mut self, message: &str) -> VisaResult<()> {
        let handle = self.handle()?;
        let resource = self.resource.clone();
        let limit = self.timeout;
        let mut frame = message.as_bytes().to_vec();
        frame.extend_from_slice(&self.write_termination);

        blocking(&self.resource, move || {
            let guard = handle.lock();
            (&guard.instrument).write_all(&frame).map_err(|e| {
                if is_timeout(&e) {
                    VisaError::timeout(&resource, limit)
                } else {
                    VisaError::io_with(&resource, e)
                }
            })
        })
        .await
    }

    async fn read(&mut self) -> VisaResult<String> {
        let handle = self.handle()?;
        let resource = self.resource.clone();
        let limit = self.timeout;
        let termination = self.read_termination.clone();

        blocking(&self.resource, move || {
            let guard = handle.lock();
            let mut message = Vec::new();
            let mut chunk = [0u8; READ_CHUNK];
            loop {
                if let Some(pos) = find_subsequence(&message, &termination) {
                    message.truncate(pos);
                    return Ok(String::from_utf8_lossy(&message).into_owned());
                }
                let n = (&guard.instrument).read(&mut chunk).map_err(|e| {
                    if is_timeout(&e) {
                        VisaError::timeout(&resource, limit)
                    } else {
                        VisaError::io_with(&resource, e)
                    }
                })?;
                if n == 0 {
                    // END indicator without termination character.
                    return Ok(String::from_utf8_lossy(&message).into_owned());
                }
                message.extend_from_slice(&chunk[..n]);
            }
        })
        .await
    }

    async fn close(&mut self) -> VisaResult<()> {
        if let Some(handle) = self.handle.take() {
            // Dropping the handle closes instrument and resource manager.
            blocking(&self.resource, move || {
                drop(handle);
                Ok(())
            })
            .await?;
        }
        Ok(())
    }
}
