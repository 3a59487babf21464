// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Poller Integration Tests
//!
//! Cadence, stop and result semantics of [`Poller`], run on paused time.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ccb_core::{CcbError, Poller, PollerError};
use tokio::time::{sleep, Instant};

fn counting_poller(count: &Arc<AtomicU32>, interval: Duration) -> Poller<u32> {
    let count = Arc::clone(count);
    Poller::new(
        move || {
            let count = Arc::clone(&count);
            async move { Ok::<_, CcbError>(count.fetch_add(1, Ordering::SeqCst) + 1) }
        },
        interval,
    )
}

#[tokio::test(start_paused = true)]
async fn test_poller_delay_then_interval() {
    let count = Arc::new(AtomicU32::new(0));
    let poller = counting_poller(&count, Duration::from_millis(100)).with_delay(Duration::from_millis(50));

    assert!(poller.start_polling());
    sleep(Duration::from_millis(40)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);

    sleep(Duration::from_millis(235)).await;
    assert_eq!(count.load(Ordering::SeqCst), 3);

    assert!(poller.stop_polling());
    assert_eq!(poller.wait_for_polling_result().await.unwrap(), Some(3));
    assert!(!poller.is_polling());
}

#[tokio::test(start_paused = true)]
async fn test_poller_single_worker() {
    let count = Arc::new(AtomicU32::new(0));
    let poller = counting_poller(&count, Duration::from_millis(100));

    assert!(poller.start_polling());
    assert!(!poller.start_polling());
    assert!(poller.is_polling());

    poller.stop_polling();
    poller.wait_for_polling_result().await.unwrap();
    assert!(!poller.stop_polling());
}

#[tokio::test(start_paused = true)]
async fn test_poller_stop_during_delay_yields_no_result() {
    let count = Arc::new(AtomicU32::new(0));
    let poller = counting_poller(&count, Duration::from_millis(100)).with_delay(Duration::from_secs(10));

    poller.start_polling();
    sleep(Duration::from_millis(10)).await;
    poller.stop_polling();

    let started = Instant::now();
    assert_eq!(poller.wait_for_polling_result().await.unwrap(), None);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_poller_timeout_ends_polling() {
    let count = Arc::new(AtomicU32::new(0));
    let poller = counting_poller(&count, Duration::from_millis(100)).with_timeout(Duration::from_millis(350));

    poller.start_polling();
    let result = poller.wait_for_polling_result().await.unwrap();

    // Invocations at 0, 100, 200 and 300 ms; the check at 400 ms times out.
    assert_eq!(result, Some(4));
    assert!(!poller.is_polling());
}

#[tokio::test(start_paused = true)]
async fn test_poller_handler_error_ends_polling() {
    let count = Arc::new(AtomicU32::new(0));
    let handler_count = Arc::clone(&count);
    let poller: Poller<u32> = Poller::new(
        move || {
            let count = Arc::clone(&handler_count);
            async move {
                let n = count.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 3 {
                    Err(CcbError::device("sensor unplugged"))
                } else {
                    Ok(n)
                }
            }
        },
        Duration::from_millis(100),
    );

    poller.start_polling();
    sleep(Duration::from_secs(1)).await;
    assert!(!poller.is_polling());
    assert_eq!(count.load(Ordering::SeqCst), 3);

    match poller.wait_for_polling_result().await {
        Err(PollerError::Handler(e)) => assert!(e.to_string().contains("sensor unplugged")),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(matches!(
        poller.wait_for_polling_result().await,
        Err(PollerError::NoWorker)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_poller_restart_after_stop() {
    let count = Arc::new(AtomicU32::new(0));
    let poller = counting_poller(&count, Duration::from_millis(100));

    poller.start_polling();
    sleep(Duration::from_millis(150)).await;
    poller.stop_polling();
    assert_eq!(poller.wait_for_polling_result().await.unwrap(), Some(2));

    assert!(poller.start_polling());
    sleep(Duration::from_millis(50)).await;
    poller.stop_polling();
    assert_eq!(poller.wait_for_polling_result().await.unwrap(), Some(3));
}

#[tokio::test]
async fn test_poller_never_started() {
    let count = Arc::new(AtomicU32::new(0));
    let poller = counting_poller(&count, Duration::from_millis(100));
    assert!(!poller.is_polling());
    assert!(!poller.stop_polling());
    assert!(matches!(
        poller.wait_for_polling_result().await,
        Err(PollerError::NoWorker)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_poller_error_converts_to_ccb_error() {
    let poller: Poller<(), CcbError> = Poller::new(
        || async {
            if true {
                panic!("handler bug");
            }
            Ok(())
        },
        Duration::from_millis(100),
    );
    poller.start_polling();

    let err: CcbError = poller.wait_for_polling_result().await.unwrap_err().into();
    assert!(matches!(err, CcbError::Polling { .. }));
    assert!(err.to_string().contains("handler bug"));
}
