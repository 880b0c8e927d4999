//! Retry with capped exponential backoff.
//!
//! After failed attempt `k` the next attempt waits
//! `min(initial_delay * 2^(k-1), max_delay)`. The wait goes through an
//! injectable [`Sleeper`] so schedules can be asserted without real time
//! passing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

type SleepFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Waits out a backoff delay.
pub type Sleeper = Arc<dyn Fn(Duration) -> SleepFuture + Send + Sync>;

/// A sleeper backed by `tokio::time::sleep`.
pub fn tokio_sleeper() -> Sleeper {
    Arc::new(|delay| Box::pin(tokio::time::sleep(delay)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Values below 1 are treated as 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Final result of a retried operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    /// Attempts actually made, between 1 and `max_attempts`.
    pub attempts: u32,
}

/// Run `op` until it succeeds or `policy.max_attempts` is reached.
///
/// `op` receives the 1-based attempt number. No delay follows the last
/// attempt.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &Sleeper,
    mut op: F,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(e) if attempt >= max_attempts => {
                return RetryOutcome {
                    result: Err(e),
                    attempts: attempt,
                };
            }
            Err(_) => {
                sleeper(policy.delay_after(attempt)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn recording_sleeper() -> (Sleeper, Arc<Mutex<Vec<Duration>>>) {
        let delays = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&delays);
        let sleeper: Sleeper = Arc::new(move |delay| {
            recorded.lock().unwrap().push(delay);
            Box::pin(async {})
        });
        (sleeper, delays)
    }

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|s| Duration::from_secs(*s)).collect()
    }

    #[test]
    fn default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn delays_double_then_cap() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (1..=7).map(|k| policy.delay_after(k)).collect();
        assert_eq!(delays, secs(&[1, 2, 4, 8, 16, 30, 30]));
    }

    #[test]
    fn huge_attempt_numbers_stay_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(64), Duration::from_secs(30));
        assert_eq!(policy.delay_after(u32::MAX), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn exhausted_sequence_sleeps_between_attempts_only() {
        let (sleeper, delays) = recording_sleeper();
        let policy = RetryPolicy::default();
        let mut calls = Vec::new();

        let outcome: RetryOutcome<(), &str> = retry(&policy, &sleeper, |attempt| {
            calls.push(attempt);
            async { Err("refused") }
        })
        .await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result, Err("refused"));
        assert_eq!(calls, vec![1, 2, 3]);
        assert_eq!(*delays.lock().unwrap(), secs(&[1, 2]));
    }

    #[tokio::test]
    async fn success_stops_further_attempts() {
        let (sleeper, delays) = recording_sleeper();
        let policy = RetryPolicy::default().with_max_attempts(5);

        let outcome = retry(&policy, &sleeper, |attempt| async move {
            if attempt < 3 { Err(attempt) } else { Ok("delivered") }
        })
        .await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result, Ok("delivered"));
        assert_eq!(*delays.lock().unwrap(), secs(&[1, 2]));
    }

    #[tokio::test]
    async fn long_sequence_hits_the_cap() {
        let (sleeper, delays) = recording_sleeper();
        let policy = RetryPolicy::default().with_max_attempts(8);

        let outcome: RetryOutcome<(), ()> = retry(&policy, &sleeper, |_| async { Err(()) }).await;

        assert_eq!(outcome.attempts, 8);
        assert_eq!(*delays.lock().unwrap(), secs(&[1, 2, 4, 8, 16, 30, 30]));
    }

    #[tokio::test]
    async fn zero_attempts_still_tries_once() {
        let (sleeper, delays) = recording_sleeper();
        let policy = RetryPolicy::default().with_max_attempts(0);

        let outcome: RetryOutcome<(), ()> = retry(&policy, &sleeper, |_| async { Err(()) }).await;

        assert_eq!(outcome.attempts, 1);
        assert!(delays.lock().unwrap().is_empty());
    }
}
