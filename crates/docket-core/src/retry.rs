//! Retry policy: how many failures a task may absorb, and how long to wait
//! before each re-run.

use std::time::Duration;

/// Exponential backoff between retries.
///
/// delay = base_delay * multiplier^(retry_count - 1), capped at `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Delay before the first retry.
    pub base_delay: Duration,

    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Backoff {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier: 2.0,
            max_delay,
        }
    }

    /// Delay before the retry that follows the `retry_count`-th failure (1-indexed).
    ///
    /// Example with base_delay=100ms, multiplier=2.0, max_delay=1s:
    /// - retry 1: 100ms
    /// - retry 2: 200ms
    /// - retry 3: 400ms
    /// - retry 5: 1s (capped)
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let exp = retry_count.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = base_secs * self.multiplier.powi(exp);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs)
    }
}

/// Retry policy for failed tasks.
///
/// A task is retried while `retry_count < max_retry`; the failure that brings
/// `retry_count` to `max_retry` is final. Without `backoff` the task is
/// rescheduled immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retry: u32,
    pub backoff: Option<Backoff>,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_RETRY: u32 = 3;

    pub fn new(max_retry: u32) -> Self {
        Self {
            max_retry,
            backoff: None,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// How long to wait before re-running a task that has failed `retry_count` times.
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        self.backoff
            .as_ref()
            .map(|b| b.delay_for(retry_count))
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_RETRY)
    }
}
