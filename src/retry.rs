//! Retry with exponential backoff.
//!
//! Every call site that talks to the network (page fetches, LLM chunks)
//! drives its attempts through one [`RetryPolicy`]. The policy owns the
//! attempt ceiling and the backoff schedule; the call site supplies a
//! classifier that maps each error to a [`Retry`] decision, so a 429 can wait
//! longer than a timeout and a 4xx can stop immediately.
//!
//! # Backoff Strategy
//!
//! ```text
//! delay = min(base_delay * 2^attempt, max_delay) + random_jitter(0..=jitter_ms)
//! ```
//!
//! `attempt` is zero-based, so with a one second base the waits run 1s, 2s, 4s…

use rand::{Rng, rng};
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, warn};

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Wait the policy's regular backoff for this attempt.
    Backoff,
    /// Wait exactly this long (cooldowns for rate limits, blocked pages).
    After(Duration),
    /// Stop now; the error is terminal.
    Abort,
}

/// Attempt ceiling plus backoff schedule, shared by every retrying call site.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(60),
            jitter_ms: 250,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter_ms(mut self, jitter_ms: u64) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }

    /// Capped exponential delay for zero-based `attempt`, without jitter.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn jitter(&self) -> Duration {
        if self.jitter_ms == 0 {
            return Duration::ZERO;
        }
        let ms: u64 = rng().random_range(0..=self.jitter_ms);
        Duration::from_millis(ms)
    }

    /// Run `op` until it succeeds, the classifier aborts, or attempts run out.
    ///
    /// `op` receives the zero-based attempt number. On exhaustion the last
    /// error is returned together with the number of attempts made.
    pub async fn run<T, E, F, Fut, C>(
        &self,
        label: &str,
        mut op: F,
        classify: C,
    ) -> Result<T, Exhausted<E>>
    where
        E: Display,
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E, usize) -> Retry,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let decision = classify(&e, attempt);
                    attempt += 1;

                    if decision == Retry::Abort {
                        warn!(label, attempt, error = %e, "non-retryable failure");
                        return Err(Exhausted {
                            attempts: attempt,
                            error: e,
                            aborted: true,
                        });
                    }

                    if attempt >= self.max_attempts {
                        error!(
                            label,
                            attempt,
                            max = self.max_attempts,
                            elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                            error = %e,
                            "exhausted retries"
                        );
                        return Err(Exhausted {
                            attempts: attempt,
                            error: e,
                            aborted: false,
                        });
                    }

                    let delay = match decision {
                        Retry::After(wait) => wait,
                        _ => self.backoff(attempt - 1),
                    } + self.jitter();

                    warn!(
                        label,
                        attempt,
                        max = self.max_attempts,
                        elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64,
                        ?delay,
                        error = %e,
                        "attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Terminal outcome of [`RetryPolicy::run`].
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: usize,
    pub error: E,
    /// The classifier stopped early instead of the ceiling being hit.
    pub aborted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1)).with_max_delay(Duration::from_secs(5));
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(5));
        assert_eq!(policy.backoff(40), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_attempts_is_clamped() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_at_ceiling() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(4, Duration::from_secs(1));
        let res: Result<(), _> = policy
            .run(
                "test",
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>("boom") }
                },
                |_, _| Retry::Backoff,
            )
            .await;
        let err = res.unwrap_err();
        assert_eq!(err.attempts, 4);
        assert!(!err.aborted);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_aborts_without_retrying() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(4, Duration::from_secs(1));
        let err = policy
            .run(
                "test",
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>("fatal") }
                },
                |_, _| Retry::Abort,
            )
            .await
            .unwrap_err();
        assert!(err.aborted);
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_recovers_and_honours_custom_wait() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1)).with_jitter_ms(0);
        let started = tokio::time::Instant::now();
        let value = policy
            .run(
                "test",
                |attempt| async move {
                    if attempt == 0 { Err("rate limited") } else { Ok(attempt) }
                },
                |_, _| Retry::After(Duration::from_secs(10)),
            )
            .await
            .unwrap();
        assert_eq!(value, 1);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }
}
