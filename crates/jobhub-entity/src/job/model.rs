//! Job record model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::status::JobStatus;

/// Positional and keyword arguments handed to a work item.
///
/// The scheduler never interprets them; they are carried alongside the
/// record and written to the persisted state for inspection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobArgs {
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyword arguments.
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl JobArgs {
    /// Empty argument list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument.
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Positional argument at `index`.
    pub fn positional(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Keyword argument named `key`.
    pub fn keyword(&self, key: &str) -> Option<&Value> {
        self.kwargs.get(key)
    }
}

/// A state change that is not an edge of the job state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("job '{id}' cannot move from {from} to {to}")]
pub struct InvalidTransition {
    /// Job identifier.
    pub id: String,
    /// Current status.
    pub from: JobStatus,
    /// Requested status.
    pub to: JobStatus,
}

/// One unit of scheduled work and its lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Caller-supplied unique identifier.
    pub id: String,
    /// Human-readable description of the work item.
    pub work_item_description: String,
    /// Arguments handed to the work item.
    pub args: JobArgs,
    /// Higher values are dispatched first.
    pub priority: i32,
    /// Submission sequence number; breaks priority ties in FIFO order.
    pub seq: u64,
    /// When the job was submitted.
    pub created_at: DateTime<Utc>,
    /// The job must not be dispatched before this instant.
    pub eligible_at: DateTime<Utc>,
    /// Retries already scheduled.
    pub retry_count: u32,
    /// Retry budget.
    pub max_retries: u32,
    /// Execution attempts started.
    pub attempts: u32,
    /// Current status.
    pub status: JobStatus,
    /// Start of the latest attempt.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Latest error message.
    pub error: Option<String>,
    /// Value returned by a successful attempt.
    pub result: Option<Value>,
}

impl JobRecord {
    /// Create a pending record that is eligible immediately.
    pub fn new(
        id: impl Into<String>,
        work_item_description: impl Into<String>,
        args: JobArgs,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            work_item_description: work_item_description.into(),
            args,
            priority: 1,
            seq: 0,
            created_at,
            eligible_at: created_at,
            retry_count: 0,
            max_retries: 3,
            attempts: 0,
            status: JobStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
        }
    }

    /// Set the dispatch priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay the first dispatch until `at`.
    pub fn eligible_from(mut self, at: DateTime<Utc>) -> Self {
        self.eligible_at = at;
        self
    }

    /// Set the submission sequence number.
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    /// Whether the record may be dispatched at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.eligible_at <= now
    }

    /// Whether another retry may be scheduled after a failed attempt.
    pub fn has_retry_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Instant used for retention: completion time, or submission time for
    /// records that never recorded one.
    pub fn retention_anchor(&self) -> DateTime<Utc> {
        self.completed_at.unwrap_or(self.created_at)
    }

    /// Cancelled while running and still waiting for its attempt to finish.
    pub fn is_cancel_in_flight(&self) -> bool {
        self.status == JobStatus::Cancelled
            && self.started_at.is_some()
            && self.completed_at.is_none()
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(to) {
            return Err(InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// PENDING -> RUNNING.
    pub fn mark_running(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(now);
        self.attempts += 1;
        Ok(())
    }

    /// RUNNING -> COMPLETED.
    pub fn mark_completed(
        &mut self,
        result: Option<Value>,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Completed)?;
        self.result = result;
        self.error = None;
        self.completed_at = Some(now);
        Ok(())
    }

    /// RUNNING -> PENDING, consuming one retry from the budget.
    pub fn mark_retry(
        &mut self,
        error: impl Into<String>,
        eligible_at: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        if !self.has_retry_budget() {
            return Err(InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to: JobStatus::Pending,
            });
        }
        self.transition(JobStatus::Pending)?;
        self.retry_count += 1;
        self.error = Some(error.into());
        self.eligible_at = eligible_at;
        Ok(())
    }

    /// RUNNING -> FAILED.
    pub fn mark_failed(
        &mut self,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error.into());
        self.completed_at = Some(now);
        Ok(())
    }

    /// PENDING | RUNNING -> CANCELLED.
    ///
    /// A pending record is finished at once. A running record keeps
    /// executing and records its outcome later through
    /// [`JobRecord::record_outcome_after_cancel`].
    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        let was_pending = self.status == JobStatus::Pending;
        self.transition(JobStatus::Cancelled)?;
        if was_pending {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// Store the outcome of an attempt that was cancelled while running.
    /// The status stays CANCELLED.
    pub fn record_outcome_after_cancel(
        &mut self,
        outcome: Result<Option<Value>, String>,
        now: DateTime<Utc>,
    ) {
        match outcome {
            Ok(result) => {
                self.result = result;
                self.error = None;
            }
            Err(error) => self.error = Some(error),
        }
        self.completed_at = Some(now);
    }
}

/// Read-only view of a job returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    /// Job identifier.
    pub id: String,
    /// Human-readable description of the work item.
    pub work_item_description: String,
    /// Arguments handed to the work item.
    pub args: JobArgs,
    /// Dispatch priority.
    pub priority: i32,
    /// Current status.
    pub status: JobStatus,
    /// Retries already scheduled.
    pub retry_count: u32,
    /// Retry budget.
    pub max_retries: u32,
    /// Execution attempts started.
    pub attempts: u32,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Earliest dispatch time.
    pub eligible_at: DateTime<Utc>,
    /// Start of the latest attempt.
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal time.
    pub completed_at: Option<DateTime<Utc>>,
    /// Latest error message.
    pub error: Option<String>,
    /// Result of a successful attempt.
    pub result: Option<Value>,
}

impl From<&JobRecord> for JobView {
    fn from(record: &JobRecord) -> Self {
        Self {
            id: record.id.clone(),
            work_item_description: record.work_item_description.clone(),
            args: record.args.clone(),
            priority: record.priority,
            status: record.status,
            retry_count: record.retry_count,
            max_retries: record.max_retries,
            attempts: record.attempts,
            created_at: record.created_at,
            eligible_at: record.eligible_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
            error: record.error.clone(),
            result: record.result.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn record(max_retries: u32) -> JobRecord {
        JobRecord::new("job-1", "tests::noop", JobArgs::new(), Utc::now())
            .with_max_retries(max_retries)
    }

    #[test]
    fn args_builder_keeps_positional_order() {
        let args = JobArgs::new()
            .arg("monthly")
            .arg(3)
            .kwarg("format", "pdf");
        assert_eq!(args.positional(0), Some(&Value::from("monthly")));
        assert_eq!(args.positional(1), Some(&Value::from(3)));
        assert_eq!(args.keyword("format"), Some(&Value::from("pdf")));
        assert!(args.keyword("missing").is_none());
    }

    #[test]
    fn delayed_record_is_not_ready_before_eligibility() {
        let now = Utc::now();
        let rec = JobRecord::new("delayed", "tests::noop", JobArgs::new(), now)
            .eligible_from(now + Duration::seconds(5));
        assert!(!rec.is_ready(now));
        assert!(rec.is_ready(now + Duration::seconds(5)));
        assert_eq!(rec.created_at, now);
    }

    #[test]
    fn successful_lifecycle() {
        let mut rec = record(3);
        let now = Utc::now();
        rec.mark_running(now).unwrap();
        assert_eq!(rec.status, JobStatus::Running);
        assert_eq!(rec.started_at, Some(now));
        assert_eq!(rec.attempts, 1);

        rec.mark_completed(Some(serde_json::json!({"ok": true})), now)
            .unwrap();
        assert_eq!(rec.status, JobStatus::Completed);
        assert!(rec.completed_at.is_some());
        assert!(rec.error.is_none());
    }

    #[test]
    fn pending_cannot_complete_directly() {
        let mut rec = record(3);
        let err = rec.mark_completed(None, Utc::now()).unwrap_err();
        assert_eq!(err.from, JobStatus::Pending);
        assert_eq!(err.to, JobStatus::Completed);
        assert_eq!(rec.status, JobStatus::Pending);
    }

    #[test]
    fn retry_consumes_budget_until_spent() {
        let mut rec = record(1);
        let now = Utc::now();

        rec.mark_running(now).unwrap();
        rec.mark_retry("boom", now + Duration::seconds(30)).unwrap();
        assert_eq!(rec.status, JobStatus::Pending);
        assert_eq!(rec.retry_count, 1);
        assert_eq!(rec.error.as_deref(), Some("boom"));
        assert!(!rec.has_retry_budget());

        rec.mark_running(now).unwrap();
        assert!(rec.mark_retry("boom again", now).is_err());
        rec.mark_failed("boom again", now).unwrap();
        assert_eq!(rec.status, JobStatus::Failed);
        assert_eq!(rec.retry_count, 1);
        assert_eq!(rec.attempts, 2);
    }

    #[test]
    fn cancelling_running_record_keeps_status_on_outcome() {
        let mut rec = record(3);
        let now = Utc::now();
        rec.mark_running(now).unwrap();
        rec.mark_cancelled(now).unwrap();
        assert!(rec.completed_at.is_none());
        assert!(rec.is_cancel_in_flight());

        rec.record_outcome_after_cancel(Ok(Some(Value::from(42))), now);
        assert_eq!(rec.status, JobStatus::Cancelled);
        assert_eq!(rec.result, Some(Value::from(42)));
        assert!(rec.completed_at.is_some());
        assert!(!rec.is_cancel_in_flight());
    }

    #[test]
    fn terminal_record_cannot_be_cancelled() {
        let mut rec = record(0);
        let now = Utc::now();
        rec.mark_running(now).unwrap();
        rec.mark_failed("nope", now).unwrap();
        assert!(rec.mark_cancelled(now).is_err());
    }
}
