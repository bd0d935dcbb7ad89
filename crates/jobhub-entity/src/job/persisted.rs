//! Flat on-disk shape of a job record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::model::JobRecord;
use super::status::JobStatus;

/// A job record as written to the snapshot or journal file.
///
/// Meant for human inspection and post-mortem analysis; it is never read
/// back to resume execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedJob {
    /// Job identifier.
    pub id: String,
    /// Human-readable description of the work item.
    pub work_item_description: String,
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Keyword arguments.
    pub kwargs: Map<String, Value>,
    /// Dispatch priority.
    pub priority: i32,
    /// Retries already scheduled.
    pub retry_count: u32,
    /// Retry budget.
    pub max_retries: u32,
    /// Status at the time of writing.
    pub status: JobStatus,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Earliest dispatch time.
    #[serde(default)]
    pub eligible_at: Option<DateTime<Utc>>,
    /// Start of the latest attempt.
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal time.
    pub completed_at: Option<DateTime<Utc>>,
    /// Latest error message.
    pub error: Option<String>,
    /// Result of a successful attempt.
    pub result: Option<Value>,
}

impl From<&JobRecord> for PersistedJob {
    fn from(record: &JobRecord) -> Self {
        Self {
            id: record.id.clone(),
            work_item_description: record.work_item_description.clone(),
            args: record.args.args.clone(),
            kwargs: record.args.kwargs.clone(),
            priority: record.priority,
            retry_count: record.retry_count,
            max_retries: record.max_retries,
            status: record.status,
            created_at: record.created_at,
            eligible_at: Some(record.eligible_at),
            started_at: record.started_at,
            completed_at: record.completed_at,
            error: record.error.clone(),
            result: record.result.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::model::JobArgs;

    #[test]
    fn flattens_arguments_and_uses_uppercase_status() {
        let record = JobRecord::new(
            "report-1",
            "reports::generate",
            JobArgs::new().arg("weekly").kwarg("user_id", 7),
            Utc::now(),
        );

        let persisted = PersistedJob::from(&record);
        let json = serde_json::to_value(&persisted).unwrap();

        assert_eq!(json["id"], "report-1");
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["args"][0], "weekly");
        assert_eq!(json["kwargs"]["user_id"], 7);
        assert!(json["completed_at"].is_null());
    }
}
