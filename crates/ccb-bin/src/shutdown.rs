// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Ending a running experiment from the outside.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

/// A latch that flips once, either from an OS signal or from
/// [`initiate_shutdown`](Self::initiate_shutdown).
///
/// Clones share the latch.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    latch: Arc<watch::Sender<bool>>,
}

impl ShutdownCoordinator {
    /// A latch that has not been triggered.
    pub fn new() -> Self {
        let (latch, _) = watch::channel(false);
        Self {
            latch: Arc::new(latch),
        }
    }

    /// Receiver whose value turns `true` on shutdown.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.latch.subscribe()
    }

    /// Triggers the latch. Only the first call logs.
    pub fn initiate_shutdown(&self) {
        let flipped = self.latch.send_if_modified(|requested| !std::mem::replace(requested, true));
        if flipped {
            info!("Shutdown requested");
        }
    }

    /// Whether the latch has been triggered.
    pub fn is_shutdown_initiated(&self) -> bool {
        *self.latch.borrow()
    }

    /// Resolves once the latch is triggered. An OS signal triggers it.
    pub async fn wait_for_shutdown(&self) {
        let mut requested = self.subscribe();
        tokio::select! {
            // The sender lives in `self`, so this cannot fail.
            _ = requested.wait_for(|requested| *requested) => {}
            _ = os_signal() => self.initiate_shutdown(),
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn os_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut streams = Vec::new();
    for (kind, name) in [
        (SignalKind::terminate(), "SIGTERM"),
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::quit(), "SIGQUIT"),
    ] {
        match signal(kind) {
            Ok(stream) => streams.push((stream, name)),
            Err(e) => warn!(signal = name, error = %e, "Cannot listen for signal"),
        }
    }
    if streams.is_empty() {
        return ctrl_c().await;
    }

    let received = first_signal(&mut streams).await;
    info!(signal = received, "Received signal");
}

#[cfg(unix)]
async fn first_signal(
    streams: &mut [(tokio::signal::unix::Signal, &'static str)],
) -> &'static str {
    std::future::poll_fn(|cx| {
        for (stream, name) in streams.iter_mut() {
            if stream.poll_recv(cx).is_ready() {
                return std::task::Poll::Ready(*name);
            }
        }
        std::task::Poll::Pending
    })
    .await
}

#[cfg(not(unix))]
async fn os_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!(signal = "ctrl-c", "Received signal"),
        Err(e) => {
            warn!(error = %e, "Cannot listen for Ctrl+C; waiting for a manual shutdown");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_latch_flips_once() {
        let coordinator = ShutdownCoordinator::new();
        let receiver = coordinator.subscribe();
        assert!(!coordinator.is_shutdown_initiated());

        coordinator.initiate_shutdown();
        coordinator.initiate_shutdown();

        assert!(coordinator.is_shutdown_initiated());
        assert!(*receiver.borrow());
    }

    #[tokio::test]
    async fn test_clone_triggers_waiter() {
        let coordinator = ShutdownCoordinator::new();
        let trigger = coordinator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.initiate_shutdown();
        });

        tokio::time::timeout(Duration::from_secs(1), coordinator.wait_for_shutdown())
            .await
            .expect("waiter should wake");
    }

    #[tokio::test]
    async fn test_wait_after_trigger_is_immediate() {
        let coordinator = ShutdownCoordinator::default();
        coordinator.initiate_shutdown();

        tokio::time::timeout(Duration::from_millis(100), coordinator.wait_for_shutdown())
            .await
            .expect("already triggered");
    }
}
