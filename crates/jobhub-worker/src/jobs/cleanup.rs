//! Temporary file cleanup work item.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing;

use jobhub_entity::job::JobArgs;

use crate::executor::{JobExecutionError, WorkItem};

/// Deletes files in a directory that were last modified before a maximum
/// age. Subdirectories are left alone.
///
/// The `max_age_hours` keyword argument overrides the configured age for a
/// single run.
#[derive(Debug, Clone)]
pub struct TempCleanup {
    /// Directory to sweep
    dir: PathBuf,
    /// Files older than this are removed
    max_age: Duration,
}

impl TempCleanup {
    /// Create a new temp cleanup work item
    pub fn new(dir: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            dir: dir.into(),
            max_age,
        }
    }
}

#[async_trait]
impl WorkItem for TempCleanup {
    fn describe(&self) -> String {
        format!("jobs::temp_cleanup({})", self.dir.display())
    }

    async fn execute(&self, args: &JobArgs) -> Result<Option<Value>, JobExecutionError> {
        tracing::info!(dir = %self.dir.display(), "Running temp file cleanup");

        let max_age = args
            .keyword("max_age_hours")
            .and_then(Value::as_u64)
            .map(|hours| Duration::from_secs(hours.saturating_mul(3600)))
            .unwrap_or(self.max_age);
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .ok_or_else(|| {
                JobExecutionError::Permanent(format!("Invalid max age: {:?}", max_age))
            })?;

        let mut removed = 0u64;
        if tokio::fs::try_exists(&self.dir).await.unwrap_or(false) {
            let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
                JobExecutionError::Transient(format!("Failed to read temp dir: {}", e))
            })?;

            while let Ok(Some(entry)) = entries.next_entry().await {
                let Ok(metadata) = entry.metadata().await else {
                    continue;
                };
                if !metadata.is_file() {
                    continue;
                }
                let Ok(modified) = metadata.modified() else {
                    continue;
                };
                let modified: chrono::DateTime<Utc> = modified.into();
                if modified < cutoff {
                    match tokio::fs::remove_file(entry.path()).await {
                        Ok(()) => removed += 1,
                        Err(e) => tracing::warn!(
                            path = %entry.path().display(),
                            error = %e,
                            "Failed to remove temp file"
                        ),
                    }
                }
            }
        }

        tracing::info!(removed, "Cleaned up temp files");

        Ok(Some(serde_json::json!({
            "task": "temp_cleanup",
            "dir": self.dir.display().to_string(),
            "temp_files_removed": removed,
        })))
    }
}
