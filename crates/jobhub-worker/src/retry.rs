//! Retry backoff policy.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use jobhub_core::config::retry::{BackoffStrategy, RetryConfig};

/// How long a failed job waits before it becomes eligible again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Backoff strategy
    pub strategy: BackoffStrategy,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Jitter factor (0.0-1.0) to add randomness
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(30))
    }
}

impl RetryPolicy {
    /// Same delay before every retry.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            base_delay: delay,
            max_delay: delay,
            jitter: 0.0,
        }
    }

    /// `base * retry`, capped at `max_delay`.
    pub fn linear(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Linear,
            base_delay,
            max_delay,
            jitter: 0.0,
        }
    }

    /// `base * 2^(retry - 1)`, capped at `max_delay`.
    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay,
            max_delay,
            jitter: 0.0,
        }
    }

    /// Randomise each delay by up to `jitter` of itself in either direction.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before the given retry (1-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis().max(self.base_delay.as_millis()) as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Linear => (base_ms * f64::from(retry)).min(max_ms),
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi(retry.saturating_sub(1).min(62) as i32);
                (base_ms * exp).min(max_ms)
            }
        };

        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            rand::rng().random_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            strategy: config.strategy,
            base_delay: Duration::from_secs(config.base_delay_seconds),
            max_delay: Duration::from_secs(config.max_delay_seconds),
            jitter: config.jitter.clamp(0.0, 1.0),
        }
    }
}
