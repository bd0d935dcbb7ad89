//! Scheduler (dispatch loop and worker pool) configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Dispatch loop and worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether the scheduler is started by the server binary.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Number of concurrent worker slots.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Upper bound in milliseconds on how long the idle dispatch loop sleeps
    /// before re-checking the queue.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// How long `stop()` waits for in-flight work items, in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
    /// Priority assigned when a submission does not specify one.
    #[serde(default = "default_priority")]
    pub default_priority: i32,
    /// Retry budget assigned when a submission does not specify one.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
}

impl SchedulerConfig {
    /// Polling interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Shutdown join timeout as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_workers: default_max_workers(),
            poll_interval_ms: default_poll_interval(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            default_priority: default_priority(),
            default_max_retries: default_max_retries(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_workers() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_shutdown_timeout() -> u64 {
    5
}

fn default_priority() -> i32 {
    1
}

fn default_max_retries() -> u32 {
    3
}
