// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Cadence-driven background polling.
//!
//! A [`Poller`] runs a zero-argument async handler on its own tokio task:
//! once after an initial `delay`, then every `interval`, until it is stopped,
//! the optional overall `timeout` elapses (measured from worker start) or the
//! handler fails. Invocations never overlap.
//!
//! Cancellation is cooperative. [`Poller::stop_polling`] only flips a watch
//! channel; the worker observes it at its next wait, so a stop takes effect
//! within one `interval` and never interrupts a running handler.
//!
//! The handler's last outcome is kept by the worker and handed out by
//! [`Poller::wait_for_polling_result`]. A failing handler ends the worker; the
//! failure is logged and returned to whoever waits for the result.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use ccb_core::poller::Poller;
//!
//! let poller = Poller::new(|| async { Ok::<_, std::io::Error>(42) }, Duration::from_millis(100))
//!     .with_delay(Duration::from_millis(10))
//!     .with_timeout(Duration::from_secs(5));
//!
//! assert!(poller.start_polling());
//! assert!(!poller.start_polling());
//! poller.stop_polling();
//! assert_eq!(poller.wait_for_polling_result().await?, Some(42));
//! ```

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::CcbError;

type HandlerFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send>>;
type Handler<T, E> = Arc<dyn Fn() -> HandlerFuture<T, E> + Send + Sync>;

// =============================================================================
// PollerError
// =============================================================================

/// Failure returned by [`Poller::wait_for_polling_result`].
#[derive(Debug, Error)]
pub enum PollerError<E> {
    /// The handler failed on its last invocation.
    #[error("Polling handler failed: {0}")]
    Handler(#[source] E),

    /// The handler panicked.
    #[error("Polling worker panicked: {0}")]
    Panicked(String),

    /// The worker task was aborted.
    #[error("Polling worker was cancelled")]
    Cancelled,

    /// No worker result is available (never started, or already collected).
    #[error("No polling result available")]
    NoWorker,
}

impl From<PollerError<CcbError>> for CcbError {
    fn from(error: PollerError<CcbError>) -> Self {
        match error {
            PollerError::Handler(inner) => inner,
            other => CcbError::Polling {
                message: other.to_string(),
            },
        }
    }
}

// =============================================================================
// Schedule
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Schedule {
    delay: Duration,
    interval: Duration,
    timeout: Option<Duration>,
}

impl Schedule {
    fn timed_out(&self, started: Instant) -> bool {
        self.timeout
            .is_some_and(|timeout| started.elapsed() >= timeout)
    }
}

// =============================================================================
// Worker
// =============================================================================

struct Worker<T, E> {
    stop: watch::Sender<bool>,
    exited: watch::Receiver<bool>,
    handle: Option<JoinHandle<Option<Result<T, E>>>>,
}

impl<T, E> Worker<T, E> {
    fn is_alive(&self) -> bool {
        !*self.exited.borrow()
    }

    fn is_stopping(&self) -> bool {
        self.is_alive() && *self.stop.borrow()
    }
}

/// Marks the worker as exited when its future ends, including by panic.
struct AliveGuard(watch::Sender<bool>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

/// Waits `duration` unless a stop is requested first. Returns `false` on stop.
async fn wait_or_stop(stop: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        // A dropped sender means the poller itself is gone.
        _ = stop.wait_for(|stopped| *stopped) => false,
    }
}

async fn run_worker<T, E>(
    handler: Handler<T, E>,
    schedule: Schedule,
    mut stop: watch::Receiver<bool>,
    _alive: AliveGuard,
) -> Option<Result<T, E>>
where
    E: fmt::Display,
{
    let started = Instant::now();
    let mut last = None;
    let mut wait = schedule.delay;
    let mut invocations: u64 = 0;

    loop {
        if !wait_or_stop(&mut stop, wait).await {
            debug!(invocations, "Polling stopped");
            break;
        }
        if schedule.timed_out(started) {
            debug!(invocations, "Polling timed out");
            break;
        }

        trace!(invocation = invocations + 1, "Invoking polling handler");
        let outcome = (handler)().await;
        invocations += 1;

        if let Err(ref e) = outcome {
            warn!(error = %e, invocations, "Polling handler failed, polling ends");
            last = Some(outcome);
            break;
        }
        last = Some(outcome);
        wait = schedule.interval;
    }

    last
}

fn panic_message(error: JoinError) -> String {
    let payload: Box<dyn Any + Send> = error.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// Poller
// =============================================================================

/// Runs a handler on a dedicated background task at a fixed cadence.
///
/// At most one worker is active per poller. Must be used from within a tokio
/// runtime.
pub struct Poller<T, E = CcbError> {
    handler: Handler<T, E>,
    schedule: Schedule,
    worker: Mutex<Option<Worker<T, E>>>,
}

impl<T, E> Poller<T, E>
where
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    /// Creates a poller invoking `handler` every `interval`, without initial
    /// delay or overall timeout.
    pub fn new<F, Fut>(handler: F, interval: Duration) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let handler: Handler<T, E> = Arc::new(move || Box::pin(handler()) as HandlerFuture<T, E>);
        Self {
            handler,
            schedule: Schedule {
                delay: Duration::ZERO,
                interval,
                timeout: None,
            },
            worker: Mutex::new(None),
        }
    }

    /// Sets the wait before the first invocation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.schedule.delay = delay;
        self
    }

    /// Sets the overall polling timeout, measured from worker start.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.schedule.timeout = Some(timeout);
        self
    }

    /// Initial delay.
    pub fn delay(&self) -> Duration {
        self.schedule.delay
    }

    /// Interval between invocations.
    pub fn interval(&self) -> Duration {
        self.schedule.interval
    }

    /// Overall timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.schedule.timeout
    }

    /// Spawns the worker unless one is already running.
    ///
    /// Returns `true` if a new worker was started and `false` if a worker is
    /// polling and has not been asked to stop.
    ///
    /// A worker that was stopped but has not reached its wait boundary yet
    /// does not block a restart: the new worker is started right away and
    /// begins its schedule once the old one has exited, so invocations of
    /// the two never overlap. The uncollected result of a previous worker is
    /// discarded.
    pub fn start_polling(&self) -> bool {
        let mut slot = self.worker.lock();
        let predecessor = match slot.as_ref() {
            Some(worker) if worker.is_stopping() => Some(worker.exited.clone()),
            Some(worker) if worker.is_alive() => return false,
            _ => None,
        };
        let restarted = predecessor.is_some();

        let (stop, stop_rx) = watch::channel(false);
        let (exited_tx, exited) = watch::channel(false);
        let guard = AliveGuard(exited_tx);
        let handler = Arc::clone(&self.handler);
        let schedule = self.schedule;
        let handle = tokio::spawn(async move {
            if let Some(mut previous) = predecessor {
                // Also resolves if the previous worker's guard is gone.
                let _ = previous.wait_for(|exited| *exited).await;
            }
            run_worker(handler, schedule, stop_rx, guard).await
        });

        *slot = Some(Worker {
            stop,
            exited,
            handle: Some(handle),
        });

        debug!(
            delay = ?self.schedule.delay,
            interval = ?self.schedule.interval,
            timeout = ?self.schedule.timeout,
            restarted,
            "Polling started"
        );
        true
    }

    /// Requests the worker to stop at its next wait boundary.
    ///
    /// Returns `true` if a worker was running. Does not wait for it to exit.
    pub fn stop_polling(&self) -> bool {
        let slot = self.worker.lock();
        match slot.as_ref() {
            Some(worker) if worker.is_alive() => {
                worker.stop.send_replace(true);
                true
            }
            _ => false,
        }
    }

    /// Returns `true` while a worker is alive.
    ///
    /// A stopped worker counts as alive until it reaches its next wait
    /// boundary, and a restarted worker counts as alive while it waits for
    /// its predecessor.
    pub fn is_polling(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(Worker::is_alive)
    }

    /// Waits for the worker to exit and returns the handler's last value.
    ///
    /// `Ok(None)` means the worker ended before the handler ever ran.
    ///
    /// # Errors
    ///
    /// - [`PollerError::Handler`] with the handler's last error.
    /// - [`PollerError::Panicked`] / [`PollerError::Cancelled`] if the task died.
    /// - [`PollerError::NoWorker`] if nothing was started or the result was
    ///   already collected.
    pub async fn wait_for_polling_result(&self) -> Result<Option<T>, PollerError<E>> {
        let handle = self
            .worker
            .lock()
            .as_mut()
            .and_then(|worker| worker.handle.take());
        let Some(handle) = handle else {
            return Err(PollerError::NoWorker);
        };

        match handle.await {
            Ok(None) => Ok(None),
            Ok(Some(Ok(value))) => Ok(Some(value)),
            Ok(Some(Err(e))) => Err(PollerError::Handler(e)),
            Err(e) if e.is_panic() => Err(PollerError::Panicked(panic_message(e))),
            Err(_) => Err(PollerError::Cancelled),
        }
    }
}

impl<T, E> Drop for Poller<T, E> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().as_ref() {
            worker.stop.send_replace(true);
        }
    }
}

impl<T, E> fmt::Debug for Poller<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let polling = self.worker.lock().as_ref().is_some_and(Worker::is_alive);
        f.debug_struct("Poller")
            .field("delay", &self.schedule.delay)
            .field("interval", &self.schedule.interval)
            .field("timeout", &self.schedule.timeout)
            .field("polling", &polling)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_poller(interval_ms: u64) -> (Arc<AtomicU32>, Poller<u32, CcbError>) {
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);
        let poller = Poller::new(
            move || {
                let c = Arc::clone(&c);
                async move { Ok(c.fetch_add(1, Ordering::SeqCst) + 1) }
            },
            Duration::from_millis(interval_ms),
        );
        (counter, poller)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent_while_polling() {
        let (_, poller) = counting_poller(10);

        assert!(!poller.is_polling());
        assert!(poller.start_polling());
        assert!(!poller.start_polling());
        assert!(poller.is_polling());

        assert!(poller.stop_polling());
        poller.wait_for_polling_result().await.unwrap();
        assert!(!poller.is_polling());
        assert!(!poller.stop_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_is_last_handler_value() {
        let (counter, poller) = counting_poller(10);

        poller.start_polling();
        tokio::time::sleep(Duration::from_millis(55)).await;
        poller.stop_polling();

        let result = poller.wait_for_polling_result().await.unwrap();
        assert_eq!(result, Some(counter.load(Ordering::SeqCst)));
        assert!(result.unwrap() >= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_ends_worker_without_error() {
        let (_, poller) = counting_poller(10);
        let poller = poller.with_timeout(Duration::from_millis(35));

        poller.start_polling();
        // Invocations at 0, 10, 20 and 30 ms.
        assert_eq!(poller.wait_for_polling_result().await.unwrap(), Some(4));
        assert!(!poller.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_delay_yields_none() {
        let (counter, poller) = counting_poller(10);
        let poller = poller.with_delay(Duration::from_secs(10));

        poller.start_polling();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(poller.stop_polling());

        assert_eq!(poller.wait_for_polling_result().await.unwrap(), None);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_error_is_surfaced_on_wait() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let poller: Poller<u32, CcbError> = Poller::new(
            move || {
                let c = Arc::clone(&c);
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) == 2 {
                        Err(CcbError::device("status byte unreadable"))
                    } else {
                        Ok(0)
                    }
                }
            },
            Duration::from_millis(10),
        );

        poller.start_polling();
        let error = poller.wait_for_polling_result().await.unwrap_err();
        assert!(matches!(error, PollerError::Handler(CcbError::Device { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!poller.is_polling());

        let ccb: CcbError = error.into();
        assert_eq!(ccb.error_type(), "device");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_without_worker() {
        let (_, poller) = counting_poller(10);
        assert!(matches!(
            poller.wait_for_polling_result().await,
            Err(PollerError::NoWorker)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let (_, poller) = counting_poller(10);

        assert!(poller.start_polling());
        poller.stop_polling();
        poller.wait_for_polling_result().await.unwrap();

        assert!(poller.start_polling());
        poller.stop_polling();
        assert!(poller.wait_for_polling_result().await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_right_after_stop_keeps_polling() {
        let (counter, poller) = counting_poller(10);

        assert!(poller.start_polling());
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        assert!(poller.stop_polling());
        assert!(poller.start_polling());
        assert!(poller.is_polling());
        assert!(!poller.start_polling());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(poller.is_polling());
        assert!(counter.load(Ordering::SeqCst) > 2);

        poller.stop_polling();
        let last = poller.wait_for_polling_result().await.unwrap();
        assert_eq!(last, Some(counter.load(Ordering::SeqCst)));
        assert!(!poller.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarted_worker_does_not_overlap() {
        let running = Arc::new(AtomicU32::new(0));
        let overlaps = Arc::new(AtomicU32::new(0));
        let (r, o) = (Arc::clone(&running), Arc::clone(&overlaps));
        let poller: Poller<(), CcbError> = Poller::new(
            move || {
                let (r, o) = (Arc::clone(&r), Arc::clone(&o));
                async move {
                    if r.fetch_add(1, Ordering::SeqCst) > 0 {
                        o.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    r.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            Duration::from_millis(5),
        );

        poller.start_polling();
        // Inside the first handler call.
        tokio::time::sleep(Duration::from_millis(10)).await;
        poller.stop_polling();
        assert!(poller.start_polling());

        tokio::time::sleep(Duration::from_millis(100)).await;
        poller.stop_polling();
        poller.wait_for_polling_result().await.unwrap();
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_panic_is_reported() {
        let explode = true;
        let poller: Poller<(), CcbError> = Poller::new(
            move || async move {
                if explode {
                    panic!("probe exploded");
                }
                Ok(())
            },
            Duration::from_millis(10),
        );

        poller.start_polling();
        match poller.wait_for_polling_result().await {
            Err(PollerError::Panicked(message)) => assert!(message.contains("probe exploded")),
            other => panic!("unexpected outcome: {:?}", other.map_err(|e| e.to_string())),
        }
        assert!(!poller.is_polling());
    }
}
