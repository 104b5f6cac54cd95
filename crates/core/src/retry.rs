use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backoff::BackoffStrategy;

/// Retry bookkeeping carried between stream attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Consecutive attempts that ended without a single response.
    pub retries: u32,
    /// Whether the next attempt must wait for a backoff delay first.
    pub backoff_pending: bool,
}

impl RetryState {
    /// Fold the response count of a finished attempt into the state.
    ///
    /// Any response at all resets the counter, even one the session then
    /// rejected.
    #[must_use]
    pub fn after_attempt(self, responses: u64) -> Self {
        if responses > 0 {
            Self::default()
        } else {
            Self {
                backoff_pending: true,
                ..self
            }
        }
    }
}

/// Run `attempt` until `lifetime` is cancelled.
///
/// - `attempt` resolves to the number of responses it received.
/// - An attempt with no responses makes the next one wait
///   `backoff.backoff(retries)` first; the wait is abandoned on cancellation.
/// - Never gives up on its own.
pub async fn retry_with_backoff<F, Fut>(
    label: &str,
    lifetime: &CancellationToken,
    backoff: &dyn BackoffStrategy,
    mut attempt: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = u64>,
{
    let mut state = RetryState::default();

    loop {
        if lifetime.is_cancelled() {
            return;
        }

        if state.backoff_pending {
            let delay = backoff.backoff(state.retries);
            debug!(retries = state.retries, ?delay, "{label} backing off");
            tokio::select! {
                () = lifetime.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            state.retries += 1;
        }

        info!(retries = state.retries, "starting {label}");
        let responses = attempt().await;
        state = state.after_attempt(responses);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every retry count it is asked about.
    #[derive(Default)]
    struct RecordingBackoff {
        calls: Mutex<Vec<u32>>,
    }

    impl BackoffStrategy for RecordingBackoff {
        fn backoff(&self, retries: u32) -> Duration {
            self.calls.lock().unwrap().push(retries);
            Duration::from_secs(1)
        }
    }

    #[test]
    fn response_resets_state() {
        let state = RetryState {
            retries: 7,
            backoff_pending: true,
        };
        assert_eq!(state.after_attempt(1), RetryState::default());
        assert_eq!(state.after_attempt(42), RetryState::default());
    }

    #[test]
    fn no_response_keeps_count_and_requests_backoff() {
        let state = RetryState {
            retries: 3,
            backoff_pending: false,
        };
        let next = state.after_attempt(0);
        assert_eq!(next.retries, 3);
        assert!(next.backoff_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn counter_increases_on_silence_and_resets_on_response() {
        let lifetime = CancellationToken::new();
        let backoff = RecordingBackoff::default();
        let script = Mutex::new(VecDeque::from([0_u64, 0, 0, 2, 0, 0]));

        retry_with_backoff("test stream", &lifetime, &backoff, || {
            let next = script.lock().unwrap().pop_front();
            if next.is_none() {
                lifetime.cancel();
            }
            async move { next.unwrap_or(0) }
        })
        .await;

        // Silent attempts 1-3 back off with 0, 1, 2; the response resets the
        // count, so the silent attempts after it start over at 0.
        assert_eq!(*backoff.calls.lock().unwrap(), vec![0, 1, 2, 0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff_wait() {
        let lifetime = CancellationToken::new();
        let attempts = Mutex::new(0_u32);

        struct SlowBackoff;
        impl BackoffStrategy for SlowBackoff {
            fn backoff(&self, _retries: u32) -> Duration {
                Duration::from_secs(3600)
            }
        }

        let canceller = {
            let lifetime = lifetime.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                lifetime.cancel();
            })
        };

        let started = tokio::time::Instant::now();
        retry_with_backoff("test stream", &lifetime, &SlowBackoff, || {
            *attempts.lock().unwrap() += 1;
            async { 0 }
        })
        .await;
        canceller.await.unwrap();

        assert_eq!(*attempts.lock().unwrap(), 1);
        assert!(started.elapsed() < Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn cancelled_before_start_never_attempts() {
        let lifetime = CancellationToken::new();
        lifetime.cancel();
        let mut attempts = 0;
        retry_with_backoff("test stream", &lifetime, &RecordingBackoff::default(), || {
            attempts += 1;
            async { 1 }
        })
        .await;
        assert_eq!(attempts, 0);
    }
}
