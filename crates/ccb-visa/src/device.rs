// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! VISA device with background status polling.

use std::sync::Arc;

use async_trait::async_trait;
use ccb_core::{CcbResult, Device, Poller, PollerError, SingleCommDevice};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{default_backend, VisaBackend};
use crate::comm::VisaCommunication;
use crate::config::VisaDeviceConfig;
use crate::status::{EventStatus, StatusByte};

/// Last values seen by the status poller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Last status byte.
    pub status: Option<StatusByte>,
    /// Last event status register, read whenever ESB was set.
    pub events: Option<EventStatus>,
}

/// A [`SingleCommDevice`] over VISA that polls the status byte while
/// started.
///
/// Each poll reads `*STB?`. When the event summary bit is set, `*ESR?` is
/// read as well, which also clears the event register. The poll task shares
/// the communication lock with foreground commands.
pub struct VisaDevice {
    config: VisaDeviceConfig,
    device: SingleCommDevice<VisaCommunication>,
    snapshot: Arc<Mutex<StatusSnapshot>>,
    poller: Poller<StatusByte>,
}

async fn poll_status(
    com: &VisaCommunication,
    snapshot: &Mutex<StatusSnapshot>,
) -> CcbResult<StatusByte> {
    let status = com.spoll().await?;
    let events = if status.event_summary() {
        let events = com.event_status().await?;
        if events.has_error() {
            warn!(resource = %com.resource(), events = %events, "Instrument reported an error event");
        } else {
            debug!(resource = %com.resource(), events = %events, "Instrument event");
        }
        Some(events)
    } else {
        None
    };

    debug!(resource = %com.resource(), status = %status, "Status poll");
    let mut snapshot = snapshot.lock();
    snapshot.status = Some(status);
    if events.is_some() {
        snapshot.events = events;
    }
    Ok(status)
}

impl VisaDevice {
    /// Creates a device using the default VISA backend.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` is invalid.
    pub fn new(config: VisaDeviceConfig) -> CcbResult<Self> {
        Self::with_backend(config, default_backend())
    }

    /// Creates a device over a specific backend.
    pub fn with_backend(config: VisaDeviceConfig, backend: Arc<dyn VisaBackend>) -> CcbResult<Self> {
        config.validate()?;
        let com = VisaCommunication::with_backend(config.com.clone(), backend)?;
        let device = SingleCommDevice::new(com);

        let snapshot = Arc::new(Mutex::new(StatusSnapshot::default()));
        let poll_com = Arc::clone(device.com());
        let poll_snapshot = Arc::clone(&snapshot);
        let poller = Poller::new(
            move || {
                let com = Arc::clone(&poll_com);
                let snapshot = Arc::clone(&poll_snapshot);
                async move { poll_status(&com, &snapshot).await }
            },
            config.poll_interval,
        )
        .with_delay(config.poll_start_delay);

        Ok(Self {
            config,
            device,
            snapshot,
            poller,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &VisaDeviceConfig {
        &self.config
    }

    /// The owned communication.
    pub fn com(&self) -> &Arc<VisaCommunication> {
        self.device.com()
    }

    /// Last status byte and event register seen by the poller.
    pub fn status(&self) -> StatusSnapshot {
        *self.snapshot.lock()
    }

    /// Returns `true` while the status poller runs.
    pub fn is_polling(&self) -> bool {
        self.poller.is_polling()
    }

    /// Queries `*IDN?`.
    pub async fn identification(&self) -> CcbResult<String> {
        Ok(self.com().query_one("*IDN?").await?)
    }

    /// Resets the instrument (`*RST`) and clears its status (`*CLS`).
    pub async fn reset(&self) -> CcbResult<()> {
        self.com().write(&["*RST", "*CLS"]).await?;
        *self.snapshot.lock() = StatusSnapshot::default();
        Ok(())
    }
}

#[async_trait]
impl Device for VisaDevice {
    async fn start(&self) -> CcbResult<()> {
        self.device.start().await?;
        if let Err(e) = self.com().write(&["*CLS"]).await {
            warn!(resource = %self.com().resource(), error = %e, "Failed to clear status on start");
            if let Err(close_err) = self.device.stop().await {
                debug!(error = %close_err, "Close after failed start failed");
            }
            return Err(e.into());
        }

        *self.snapshot.lock() = StatusSnapshot::default();
        self.poller.start_polling();
        info!(
            resource = %self.com().resource(),
            interval = ?self.config.poll_interval,
            "VISA device started"
        );
        Ok(())
    }

    async fn stop(&self) -> CcbResult<()> {
        self.poller.stop_polling();
        match self.poller.wait_for_polling_result().await {
            Ok(_) | Err(PollerError::NoWorker) => {}
            Err(e) => {
                warn!(resource = %self.com().resource(), error = %e, "Status polling ended with an error");
            }
        }
        self.device.stop().await?;
        info!(resource = %self.com().resource(), "VISA device stopped");
        Ok(())
    }
}

impl std::fmt::Debug for VisaDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisaDevice")
            .field("resource", &self.com().resource())
            .field("polling", &self.is_polling())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VisaConfig;
    use crate::testing::SimulatedInstrument;
    use ccb_core::CommunicationProtocol;
    use std::time::Duration;

    fn device(instrument: &SimulatedInstrument) -> VisaDevice {
        let config = VisaDeviceConfig::new(VisaConfig::new("psu"))
            .with_poll_interval(Duration::from_millis(100))
            .with_poll_start_delay(Duration::ZERO);
        VisaDevice::with_backend(config, Arc::new(instrument.clone())).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_tracks_status() {
        let instrument = SimulatedInstrument::new();
        let device = device(&instrument);

        device.start().await.unwrap();
        assert!(device.is_polling());
        assert_eq!(instrument.written()[0], "*CLS");

        instrument.set_register("*STB?", "16");
        tokio::time::sleep(Duration::from_millis(250)).await;
        let snapshot = device.status();
        assert_eq!(snapshot.status, Some(StatusByte(16)));
        assert_eq!(snapshot.events, None);

        device.stop().await.unwrap();
        assert!(!device.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_summary_reads_event_register() {
        let instrument = SimulatedInstrument::new();
        instrument.set_register("*STB?", "32");
        instrument.set_register("*ESR?", "32");
        let device = device(&instrument);

        device.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = device.status();
        assert!(snapshot.status.is_some_and(|s| s.event_summary()));
        assert_eq!(snapshot.events, Some(EventStatus(EventStatus::CME)));

        device.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failure_does_not_fail_stop() {
        let instrument = SimulatedInstrument::new();
        let device = device(&instrument);
        device.start().await.unwrap();

        instrument.set_register("*STB?", "not a number");
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!device.is_polling());

        device.stop().await.unwrap();
        assert_eq!(device.com().state(), ccb_core::ProtocolState::Closed);
    }

    #[tokio::test]
    async fn test_start_failure_is_reported() {
        let instrument = SimulatedInstrument::new();
        instrument.set_broken(true);
        let device = device(&instrument);

        assert!(device.start().await.unwrap_err().is_connection());
        assert!(!device.is_polling());
    }

    #[tokio::test]
    async fn test_identification_and_reset() {
        let instrument = SimulatedInstrument::new();
        let device = device(&instrument);
        device.start().await.unwrap();

        assert_eq!(device.identification().await.unwrap(), "ACME,PSU-9000,42,1.0");
        device.reset().await.unwrap();
        assert!(instrument.written().contains(&"*RST;*CLS".to_string()));

        device.stop().await.unwrap();
    }
}
