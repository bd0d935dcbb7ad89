//! Job status enumeration and its transition rules.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a background job.
///
/// ```text
/// PENDING --dispatch--> RUNNING --success--> COMPLETED
/// RUNNING --failure, budget left--> PENDING
/// RUNNING --failure, budget spent--> FAILED
/// PENDING | RUNNING --cancel--> CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    /// Waiting for its eligibility time and a free worker slot.
    Pending,
    /// Currently being executed by a worker.
    Running,
    /// Successfully completed.
    Completed,
    /// Failed after the retry budget was spent.
    Failed,
    /// Cancelled by a caller.
    Cancelled,
}

impl JobStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [JobStatus; 5] = [
        Self::Pending,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether moving from `self` to `next` is an edge of the state machine.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Cancelled)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Pending)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }

    /// Return the status as an uppercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown job status '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn pending_cannot_jump_to_completed_or_failed() {
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for from in JobStatus::ALL.into_iter().filter(JobStatus::is_terminal) {
            for to in JobStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn serializes_uppercase_and_parses_case_insensitively() {
        let json = serde_json::to_string(&JobStatus::Completed).unwrap();
        assert_eq!(json, "\"COMPLETED\"");
        assert_eq!("failed".parse::<JobStatus>().unwrap(), JobStatus::Failed);
        assert!("done".parse::<JobStatus>().is_err());
    }
}
