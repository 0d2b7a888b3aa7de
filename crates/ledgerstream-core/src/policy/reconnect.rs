//! Reconnect backoff: exponential growth, a ceiling, jitter and an optional
//! attempt limit.

use std::time::Duration;

use rand::Rng;

/// Backoff policy applied by the push channel between reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub initial_backoff: Duration,
    /// Ceiling for the exponential growth.
    pub max_backoff: Duration,
    /// Multiplier applied per attempt.
    pub multiplier: f64,
    /// Random jitter of ±`jitter_fraction * delay` (0.0 = none).
    pub jitter_fraction: f64,
    /// Give up after this many consecutive failed attempts; `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_fraction: 0.1,
            max_retries: None,
        }
    }
}

impl ReconnectPolicy {
    /// Constant delay, no jitter, unbounded attempts.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_backoff: delay,
            max_backoff: delay,
            multiplier: 1.0,
            jitter_fraction: 0.0,
            max_retries: None,
        }
    }

    /// Limit the number of consecutive attempts.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Returns the delay before the `attempt`-th reconnect (1-based), or
    /// `None` once `max_retries` is exceeded.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.should_retry(attempt) {
            return None;
        }
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_ms = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exp);
        let capped = base_ms.min(self.max_backoff.as_millis() as f64);

        let jitter_ms = if self.jitter_fraction > 0.0 {
            let spread = capped * self.jitter_fraction;
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };

        Some(Duration::from_millis((capped + jitter_ms).max(0.0) as u64))
    }

    /// Returns `true` if attempt number `attempt` is still allowed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_retries.map_or(true, |max| attempt <= max)
    }
}
