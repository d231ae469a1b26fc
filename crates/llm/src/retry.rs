//! Overload backoff policy.
//!
//! Upstream overload responses are retried with exponential backoff and
//! jitter: base 5 s, factor 2, at most 3 attempts. Backoff sleeps are
//! abandoned promptly when the request is cancelled.

use std::time::Duration;

use gb_domain::cancel::CancelToken;
use gb_domain::error::{Error, Result};
use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: u32,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            factor: 2,
            max_attempts: 3,
        }
    }
}

impl BackoffPolicy {
    /// The jittered delay before retry number `attempt` (1-based; attempt 1
    /// is the first retry). Jitter is uniform in [50%, 150%] of the nominal
    /// exponential delay.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let nominal = self.base * self.factor.saturating_pow(attempt.saturating_sub(1));
        let scale = rand::thread_rng().gen_range(0.5..1.5);
        nominal.mul_f64(scale)
    }

    /// The nominal (un-jittered) delay, exposed for tests.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        self.base * self.factor.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Sleep for `delay`, waking early with `Error::Cancelled` if the token
/// fires. The token is a plain flag, so we poll it on a short tick.
pub async fn sleep_cancellable(delay: Duration, cancel: &CancelToken) -> Result<()> {
    const TICK: Duration = Duration::from_millis(200);

    let deadline = tokio::time::Instant::now() + delay;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Ok(());
        }
        let step = std::cmp::min(TICK, deadline - now);
        tokio::time::sleep(step).await;
    }
}
