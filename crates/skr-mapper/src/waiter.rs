//! Bounded poll-until-terminal-state primitive for provider-asynchronous
//! operations (launch, attach, terminate, propagate).

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::AdapterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaiterConfig {
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl Default for WaiterConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_wait: Duration::from_secs(300),
        }
    }
}

impl WaiterConfig {
    /// Number of polls that fit in `max_wait`. At least one.
    pub fn max_polls(&self) -> u64 {
        let interval = self.poll_interval.as_millis().max(1);
        let polls = self.max_wait.as_millis() / interval;
        (polls as u64).max(1)
    }
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitState<T> {
    Pending,
    Done(T),
    Failed(String),
}

/// Terminal state sets for one resource kind.
#[derive(Debug, Clone, Copy)]
pub struct TerminalStates {
    pub success: &'static [&'static str],
    pub failure: &'static [&'static str],
}

impl TerminalStates {
    pub fn classify<T>(&self, state: &str, value: T) -> WaitState<T> {
        if self.success.contains(&state) {
            WaitState::Done(value)
        } else if self.failure.contains(&state) {
            WaitState::Failed(format!("reached failure state '{state}'"))
        } else {
            WaitState::Pending
        }
    }
}

/// Poll until `poll` reports a terminal state or `max_wait` elapses.
///
/// Deferrable or throttled poll errors count as `Pending`. A timeout is a
/// transient error tagged with `step`, so the entity is retried on a later
/// pass instead of failing the run.
pub async fn wait_until<T, F, Fut>(
    cfg: &WaiterConfig,
    step: &str,
    mut poll: F,
) -> Result<T, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<WaitState<T>, AdapterError>>,
{
    let max_polls = cfg.max_polls();
    for attempt in 1..=max_polls {
        match poll().await {
            Ok(WaitState::Done(v)) => return Ok(v),
            Ok(WaitState::Failed(msg)) => return Err(AdapterError::validation(msg).at_step(step)),
            Ok(WaitState::Pending) => {}
            Err(e) if e.is_deferrable() || e.is_retryable() => {
                debug!(step, attempt, error = %e, "waiter poll error, still waiting");
            }
            Err(e) => return Err(e.at_step(step)),
        }
        if attempt < max_polls {
            tokio::time::sleep(cfg.poll_interval).await;
        }
    }
    Err(AdapterError::transient(format!(
        "timed out after {} poll(s) ({:?})",
        max_polls, cfg.max_wait
    ))
    .at_step(step))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use std::sync::atomic::{AtomicU64, Ordering};

    const STATES: TerminalStates = TerminalStates {
        success: &["running"],
        failure: &["terminated"],
    };

    fn cfg(polls: u64) -> WaiterConfig {
        WaiterConfig {
            poll_interval: Duration::from_millis(1),
            max_wait: Duration::from_millis(polls),
        }
    }

    #[tokio::test]
    async fn returns_once_terminal_success_is_seen() {
        let counter = AtomicU64::new(0);
        let n = &counter;
        let out = wait_until(&cfg(10), "launch", move || async move {
            let i = n.fetch_add(1, Ordering::SeqCst);
            let state = if i < 3 { "pending" } else { "running" };
            Ok(STATES.classify(state, i))
        })
        .await;
        assert_eq!(out, Ok(3));
    }

    #[tokio::test]
    async fn timeout_is_transient_and_tagged() {
        let err = wait_until(&cfg(3), "launch", || async {
            Ok::<_, AdapterError>(STATES.classify("pending", ()))
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transient);
        assert_eq!(err.step.as_deref(), Some("launch"));
    }

    #[tokio::test]
    async fn failure_state_is_permanent() {
        let err = wait_until(&cfg(3), "launch", || async {
            Ok::<_, AdapterError>(STATES.classify("terminated", ()))
        })
        .await
        .unwrap_err();
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn transient_poll_errors_keep_waiting() {
        let counter = AtomicU64::new(0);
        let n = &counter;
        let out = wait_until(&cfg(10), "attach", move || async move {
            if n.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(AdapterError::transient("not visible yet"))
            } else {
                Ok(WaitState::Done("ok"))
            }
        })
        .await;
        assert_eq!(out, Ok("ok"));
    }
}
