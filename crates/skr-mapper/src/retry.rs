//! Fixed-backoff retry for throttled provider calls.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::{AdapterError, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Run `operation`, retrying only rate-limited failures. Exhaustion turns
    /// the last error into a permanent `RetriesExhausted`.
    pub async fn run<F, Fut, T>(&self, what: &str, mut operation: F) -> Result<T, AdapterError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    debug!(
                        operation = what,
                        attempt,
                        max_attempts,
                        backoff_ms = self.backoff.as_millis() as u64,
                        error = %e,
                        "rate limited, retrying"
                    );
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) if e.is_retryable() => {
                    warn!(operation = what, attempts = attempt, error = %e, "retries exhausted");
                    let mut out = e;
                    out.kind = ErrorKind::RetriesExhausted;
                    out.message = format!("{} (after {} attempts)", out.message, attempt);
                    return Err(out);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_rate_limits_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let out = policy
            .run("op", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AdapterError::rate_limited("slow down"))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(out, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_is_permanent() {
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let err = policy
            .run("op", || async { Err::<(), _>(AdapterError::rate_limited("slow down")) })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RetriesExhausted);
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let err = policy
            .run("op", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(AdapterError::validation("no"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
