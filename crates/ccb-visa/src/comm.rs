// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! VISA communication protocol.
//!
//! Several commands passed to one [`write`](VisaCommunication::write) or
//! [`query`](VisaCommunication::query) are joined with `;` into a single
//! SCPI message. A query over several commands splits the answer on `;`
//! again.

use std::sync::Arc;

use async_trait::async_trait;
use ccb_core::{CcbResult, CommunicationProtocol, FromConfig, ProtocolState};
use parking_lot::Mutex as StateLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{default_backend, VisaBackend, VisaSession};
use crate::config::VisaConfig;
use crate::error::{VisaError, VisaResult, PROTOCOL};
use crate::status::{EventStatus, StatusByte};

type SessionSlot = Option<Box<dyn VisaSession>>;

fn join_commands<S: AsRef<str>>(commands: &[S]) -> String {
    commands
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(";")
}

/// VISA client bound to one instrument resource.
pub struct VisaCommunication {
    config: VisaConfig,
    resource: String,
    backend: Arc<dyn VisaBackend>,
    session: Mutex<SessionSlot>,
    state: StateLock<ProtocolState>,
}

impl VisaCommunication {
    /// Creates a closed client using the default backend.
    ///
    /// # Errors
    ///
    /// Returns [`VisaError::Configuration`] if the configuration is invalid.
    pub fn new(config: VisaConfig) -> VisaResult<Self> {
        Self::with_backend(config, default_backend())
    }

    /// Creates a closed client over a specific backend.
    pub fn with_backend(config: VisaConfig, backend: Arc<dyn VisaBackend>) -> VisaResult<Self> {
        config.validate()?;
        Ok(Self {
            resource: config.resource(),
            config,
            backend,
            session: Mutex::new(None),
            state: StateLock::new(ProtocolState::Closed),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &VisaConfig {
        &self.config
    }

    /// Returns the VISA resource string.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    fn set_state(&self, state: ProtocolState) {
        *self.state.lock() = state;
    }

    /// Drops a session whose link is gone.
    fn settle<T>(&self, slot: &mut SessionSlot, result: VisaResult<T>) -> VisaResult<T> {
        if let Err(e) = &result {
            if e.is_connection_lost() {
                warn!(resource = %self.resource, error = %e, "VISA connection lost");
                *slot = None;
                self.set_state(ProtocolState::Error);
            }
        }
        result
    }

    async fn connect(&self) -> VisaResult<()> {
        let mut slot = self.session.lock().await;
        if slot.is_some() {
            warn!(resource = %self.resource, "VISA resource is already open");
            return Ok(());
        }

        self.set_state(ProtocolState::Opening);
        info!(resource = %self.resource, backend = self.backend.name(), "Opening VISA resource");
        match self.backend.open(&self.config).await {
            Ok(session) => {
                *slot = Some(session);
                self.set_state(ProtocolState::Open);
                info!(resource = %self.resource, "VISA resource open");
                Ok(())
            }
            Err(e) => {
                self.set_state(ProtocolState::Error);
                warn!(resource = %self.resource, error = %e, "Failed to open VISA resource");
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> VisaResult<()> {
        let mut slot = self.session.lock().await;
        Self::close_slot(&self.resource, &mut slot).await?;
        self.set_state(ProtocolState::Closed);
        Ok(())
    }

    async fn close_slot(resource: &str, slot: &mut SessionSlot) -> VisaResult<()> {
        match slot.take() {
            Some(mut session) => {
                let result = session.close().await;
                match &result {
                    Ok(()) => info!(resource, "VISA resource closed"),
                    Err(e) => warn!(resource, error = %e, "VISA resource closed with error"),
                }
                result
            }
            None => {
                warn!(resource, "VISA resource is not open");
                Ok(())
            }
        }
    }

    /// Sends `commands` as one `;`-joined message.
    ///
    /// # Errors
    ///
    /// [`VisaError::NotOpen`] without a session, otherwise the I/O error of
    /// the backend. A lost link closes the session.
    pub async fn write<S: AsRef<str>>(&self, commands: &[S]) -> VisaResult<()> {
        if commands.is_empty() {
            return Ok(());
        }
        let message = join_commands(commands);

        let mut slot = self.session.lock().await;
        let session = slot
            .as_mut()
            .ok_or_else(|| VisaError::not_open(&self.resource))?;
        debug!(resource = %self.resource, message = %message, "VISA write");
        let result = session.write(&message).await;
        self.settle(&mut slot, result)
    }

    /// Sends `commands` as one message and reads the answer.
    ///
    /// Returns one answer per command: a single command gets the whole
    /// response, several commands get the response split on `;`.
    ///
    /// # Errors
    ///
    /// Same as [`write`](Self::write), plus [`VisaError::Timeout`] when no
    /// answer arrives.
    pub async fn query<S: AsRef<str>>(&self, commands: &[S]) -> VisaResult<Vec<String>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }
        let message = join_commands(commands);

        let mut slot = self.session.lock().await;
        let session = slot
            .as_mut()
            .ok_or_else(|| VisaError::not_open(&self.resource))?;
        let result = match session.write(&message).await {
            Ok(()) => session.read().await,
            Err(e) => Err(e),
        };
        let response = self.settle(&mut slot, result)?;
        debug!(resource = %self.resource, message = %message, response = %response, "VISA query");

        if commands.len() == 1 {
            Ok(vec![response])
        } else {
            Ok(response.split(';').map(|s| s.trim().to_string()).collect())
        }
    }

    /// Sends one command and returns its answer.
    pub async fn query_one(&self, command: &str) -> VisaResult<String> {
        let mut answers = self.query(&[command]).await?;
        Ok(answers.pop().unwrap_or_default())
    }

    /// Reads the status byte (`*STB?`).
    ///
    /// # Errors
    ///
    /// [`VisaError::InvalidResponse`] if the answer is not a register value.
    pub async fn spoll(&self) -> VisaResult<StatusByte> {
        let response = self.query_one("*STB?").await?;
        response
            .parse()
            .map_err(|_| VisaError::invalid_response(&self.resource, "*STB?", response))
    }

    /// Reads and clears the standard event status register (`*ESR?`).
    pub async fn event_status(&self) -> VisaResult<EventStatus> {
        let response = self.query_one("*ESR?").await?;
        response
            .parse()
            .map_err(|_| VisaError::invalid_response(&self.resource, "*ESR?", response))
    }

    async fn probe(&self) -> bool {
        if self.session.lock().await.is_none() {
            return false;
        }
        match self.spoll().await {
            Ok(status) => {
                debug!(resource = %self.resource, status = %status, "VISA probe succeeded");
                true
            }
            Err(e) => {
                warn!(resource = %self.resource, error = %e, "VISA probe failed, closing resource");
                let mut slot = self.session.lock().await;
                if let Err(close_err) = Self::close_slot(&self.resource, &mut slot).await {
                    debug!(resource = %self.resource, error = %close_err, "Close after failed probe failed");
                }
                self.set_state(ProtocolState::Error);
                false
            }
        }
    }
}

#[async_trait]
impl CommunicationProtocol for VisaCommunication {
    fn protocol(&self) -> &'static str {
        PROTOCOL
    }

    fn target(&self) -> String {
        self.resource.clone()
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

impl FromConfig for VisaCommunication {
    type Config = VisaConfig;

    fn from_config(config: VisaConfig) -> CcbResult<Self> {
        Self::new(config).map_err(Into::into)
    }

    fn config(&self) -> &VisaConfig {
        &self.config
    }
}

impl std::fmt::Debug for VisaCommunication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisaCommunication")
            .field("resource", &self.resource)
            .field("backend", &self.backend.name())
            .field("state", &self.state())
            .finish()
    }
}
