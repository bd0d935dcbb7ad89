//! Retry backoff configuration.

use serde::{Deserialize, Serialize};

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    #[default]
    Fixed,
    /// `base * retry`.
    Linear,
    /// `base * 2^(retry - 1)`.
    Exponential,
}

/// Scheduler-wide retry backoff settings. Individual jobs may override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Backoff strategy.
    #[serde(default)]
    pub strategy: BackoffStrategy,
    /// Base delay in seconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_seconds: u64,
    /// Upper bound on any computed delay, in seconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_seconds: u64,
    /// Jitter factor in `[0.0, 1.0]`; the delay is randomised by up to this
    /// fraction in either direction.
    #[serde(default)]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::default(),
            base_delay_seconds: default_base_delay(),
            max_delay_seconds: default_max_delay(),
            jitter: 0.0,
        }
    }
}

fn default_base_delay() -> u64 {
    30
}

fn default_max_delay() -> u64 {
    3600
}
