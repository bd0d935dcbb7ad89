//! Errors surfaced by the scheduler's control API.

use jobhub_core::error::AppError;

use crate::persistence::PersistenceError;

/// Error returned synchronously to callers of [`crate::Scheduler`].
///
/// Failures of the work items themselves never show up here: they are
/// recorded on the job and drive the retry policy.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// A job with this id is already known (pending, running, or retained).
    #[error("job '{0}' already exists")]
    DuplicateId(String),

    /// No job with this id is known.
    #[error("job '{0}' not found")]
    NotFound(String),

    /// `start()` was called while the dispatch loop is running.
    #[error("scheduler is already running")]
    AlreadyRunning,

    /// `stop()` was called while the dispatch loop is not running.
    #[error("scheduler is not running")]
    NotRunning,

    /// Reading previously persisted state failed.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl From<SchedulerError> for AppError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::DuplicateId(_) | SchedulerError::AlreadyRunning => {
                AppError::conflict(err.to_string())
            }
            SchedulerError::NotFound(_) => AppError::not_found(err.to_string()),
            SchedulerError::NotRunning => AppError::service_unavailable(err.to_string()),
            SchedulerError::Persistence(e) => AppError::storage(e.to_string()),
        }
    }
}
