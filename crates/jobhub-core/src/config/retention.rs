//! Retention of terminal job records.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Terminal job record retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Terminal records older than this many days are removed by the sweep.
    #[serde(default = "default_days")]
    pub days: u64,
    /// Cron expression (with seconds) for the retention sweep.
    #[serde(default = "default_sweep_cron")]
    pub sweep_cron: String,
}

impl RetentionConfig {
    /// Retention window as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.days * 24 * 60 * 60)
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: default_days(),
            sweep_cron: default_sweep_cron(),
        }
    }
}

fn default_days() -> u64 {
    7
}

fn default_sweep_cron() -> String {
    "0 0 3 * * *".to_string()
}
