//! Job state persistence configuration.

use serde::{Deserialize, Serialize};

/// On-disk layout used for persisted job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceMode {
    /// A single JSON document rewritten in full on every change.
    #[default]
    Snapshot,
    /// An append-only JSON-lines change log.
    Journal,
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Whether job state is written to disk at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// File layout.
    #[serde(default)]
    pub mode: PersistenceMode,
    /// Path of the snapshot or journal file.
    #[serde(default = "default_path")]
    pub path: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: PersistenceMode::default(),
            path: default_path(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_path() -> String {
    "data/logs/background_jobs.json".to_string()
}
