// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Failure translation and bounded timeout retry.
//!
//! [`execute`] runs one logical operation. Its retry budget lives on the
//! stack of that call, so concurrent operations never consume each other's
//! retries.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::OpcUaConfig;
use crate::error::{OpcUaError, OpcUaResult, TransportFailure};

/// How timed-out attempts are repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause before each retry.
    pub wait: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
}

impl RetryPolicy {
    /// Creates a policy.
    pub const fn new(wait: Duration, max_retries: u32) -> Self {
        Self { wait, max_retries }
    }

    /// Policy configured by `wait_timeout_retry` and `max_timeout_retry_nr`.
    pub fn from_config(config: &OpcUaConfig) -> Self {
        Self::new(config.wait_timeout_retry, config.max_timeout_retry_nr)
    }

    /// Attempts made before giving up, including the first.
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Runs `attempt` until it succeeds, fails with a non-timeout failure, or
/// the policy's retries are used up.
///
/// Non-timeout failures become [`OpcUaError::Io`] immediately. After the
/// last timed-out attempt [`OpcUaError::Timeout`] is returned.
pub async fn execute<T, F, Fut>(
    policy: RetryPolicy,
    operation: &'static str,
    url: &str,
    mut attempt: F,
) -> OpcUaResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportFailure>>,
{
    let mut retries = 0u32;
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(failure) if failure.kind.is_timeout() => {
                if retries >= policy.max_retries {
                    warn!(
                        operation,
                        url,
                        attempts = retries + 1,
                        "OPC UA timeout retries exhausted"
                    );
                    return Err(OpcUaError::timeout(operation, url, retries + 1));
                }
                retries += 1;
                debug!(
                    operation,
                    url,
                    retry = retries,
                    max_retries = policy.max_retries,
                    wait = ?policy.wait,
                    "OPC UA operation timed out, retrying"
                );
                tokio::time::sleep(policy.wait).await;
            }
            Err(failure) => {
                debug!(operation, url, kind = %failure.kind, error = %failure.message, "OPC UA operation failed");
                return Err(OpcUaError::io(operation, url, failure));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const URL: &str = "opc.tcp://plc:4840/";

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(100), max_retries)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_timeouts() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let value = execute(policy(5), "read", URL, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TransportFailure::timeout("no answer"))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_raises_timeout() {
        let calls = AtomicU32::new(0);
        let result: OpcUaResult<()> = execute(policy(3), "write", URL, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TransportFailure::timeout("no answer"))
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match err {
            OpcUaError::Timeout(timeout) => assert_eq!(timeout.attempts, 4),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_failures_are_not_retried() {
        for failure in [
            TransportFailure::address_resolution("unknown host"),
            TransportFailure::socket("reset"),
            TransportFailure::cancelled("cancelled"),
            TransportFailure::protocol("BadNodeIdUnknown"),
        ] {
            let kind = failure.kind;
            let calls = AtomicU32::new(0);
            let result: OpcUaResult<()> = execute(policy(5), "read", URL, || {
                calls.fetch_add(1, Ordering::SeqCst);
                let failure = failure.clone();
                async move { Err(failure) }
            })
            .await;

            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(result.unwrap_err().failure_kind(), Some(kind));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries() {
        let result: OpcUaResult<()> = execute(policy(0), "read", URL, || async {
            Err(TransportFailure::timeout("no answer"))
        })
        .await;
        assert_eq!(result.unwrap_err().failure_kind(), Some(FailureKind::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_calls_have_separate_budgets() {
        let calls = Arc::new(AtomicU32::new(0));

        let run = |fail_times: u32| {
            let calls = calls.clone();
            async move {
                let local = AtomicU32::new(0);
                execute(policy(2), "read", URL, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if local.fetch_add(1, Ordering::SeqCst) < fail_times {
                        Err(TransportFailure::timeout("slow"))
                    } else {
                        Ok(())
                    }
                })
                .await
            }
        };

        let (a, b) = tokio::join!(run(2), run(2));
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }
}
