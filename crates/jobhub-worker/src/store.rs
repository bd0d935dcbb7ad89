//! In-memory job store: record lookup plus the pending dispatch order.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing;

use jobhub_entity::job::{JobRecord, JobStatus, JobView, PersistedJob};

use crate::error::SchedulerError;
use crate::executor::WorkItem;
use crate::retry::RetryPolicy;

/// A record together with the work it runs.
#[derive(Debug, Clone)]
pub struct JobEntry {
    /// Lifecycle state
    pub record: JobRecord,
    /// Work item invoked on dispatch
    pub work_item: Arc<dyn WorkItem>,
    /// Per-job retry override
    pub retry_policy: Option<RetryPolicy>,
}

/// Ordering key of a pending record: highest priority first, then FIFO.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PendingKey {
    priority: Reverse<i32>,
    seq: u64,
    id: String,
}

impl PendingKey {
    fn of(record: &JobRecord) -> Self {
        Self {
            priority: Reverse(record.priority),
            seq: record.seq,
            id: record.id.clone(),
        }
    }
}

/// All records known to a scheduler.
///
/// Not synchronised on its own; the scheduler keeps it behind one mutex.
#[derive(Debug, Default)]
pub struct JobStore {
    entries: HashMap<String, JobEntry>,
    pending: BTreeSet<PendingKey>,
    next_seq: u64,
}

impl JobStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a PENDING record, assigning its submission sequence number.
    pub fn insert(
        &mut self,
        record: JobRecord,
        work_item: Arc<dyn WorkItem>,
        retry_policy: Option<RetryPolicy>,
    ) -> Result<&JobRecord, SchedulerError> {
        if self.entries.contains_key(&record.id) {
            return Err(SchedulerError::DuplicateId(record.id));
        }

        self.next_seq += 1;
        let record = record.with_seq(self.next_seq);
        let id = record.id.clone();

        if record.status == JobStatus::Pending {
            self.pending.insert(PendingKey::of(&record));
        }
        let entry = self.entries.entry(id).or_insert(JobEntry {
            record,
            work_item,
            retry_policy,
        });
        Ok(&entry.record)
    }

    /// Highest-priority PENDING record eligible at `now`, left in place.
    pub fn next_ready(&self, now: DateTime<Utc>, free_slots: usize) -> Option<&JobRecord> {
        if free_slots == 0 {
            return None;
        }
        self.pending
            .iter()
            .filter_map(|key| self.entries.get(&key.id))
            .map(|entry| &entry.record)
            .find(|record| record.is_ready(now))
    }

    /// Take a record out of the pending order. Returns false if it was not
    /// queued.
    pub fn remove(&mut self, id: &str) -> bool {
        match self.entries.get(id) {
            Some(entry) => self.pending.remove(&PendingKey::of(&entry.record)),
            None => false,
        }
    }

    /// Put a rescheduled PENDING record back into the pending order under
    /// its original sequence number.
    pub fn reinsert(&mut self, id: &str) -> Result<(), SchedulerError> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;

        if entry.record.status != JobStatus::Pending {
            tracing::warn!(
                job_id = %id,
                status = %entry.record.status,
                "Refusing to requeue a job that is not pending"
            );
            return Ok(());
        }
        self.pending.insert(PendingKey::of(&entry.record));
        Ok(())
    }

    /// Current record for `id`.
    pub fn get(&self, id: &str) -> Result<&JobRecord, SchedulerError> {
        self.entries
            .get(id)
            .map(|entry| &entry.record)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))
    }

    /// Mutable entry for `id`. Callers changing priority or sequence must
    /// [`remove`](Self::remove) the record first.
    pub fn get_entry_mut(&mut self, id: &str) -> Option<&mut JobEntry> {
        self.entries.get_mut(id)
    }

    /// Cancel a PENDING or RUNNING record.
    ///
    /// Returns true when the status changed to CANCELLED; false for unknown
    /// ids and records that already reached a terminal state.
    pub fn cancel(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        let was_pending = match self.entries.get(id) {
            Some(entry) if !entry.record.status.is_terminal() => {
                entry.record.status == JobStatus::Pending
            }
            _ => return false,
        };
        if was_pending {
            self.remove(id);
        }

        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        match entry.record.mark_cancelled(now) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Cancel rejected");
                false
            }
        }
    }

    /// Earliest eligibility instant among PENDING records.
    pub fn next_eligible_at(&self) -> Option<DateTime<Utc>> {
        self.pending
            .iter()
            .filter_map(|key| self.entries.get(&key.id))
            .map(|entry| entry.record.eligible_at)
            .min()
    }

    /// Views of all records, optionally filtered by status, in submission
    /// order.
    pub fn views(&self, filter: Option<JobStatus>) -> Vec<JobView> {
        let mut records: Vec<&JobRecord> = self
            .entries
            .values()
            .map(|entry| &entry.record)
            .filter(|record| filter.is_none_or(|status| record.status == status))
            .collect();
        records.sort_by_key(|record| record.seq);
        records.into_iter().map(JobView::from).collect()
    }

    /// Persisted shape of every record, in submission order.
    pub fn persisted(&self) -> Vec<PersistedJob> {
        let mut records: Vec<&JobRecord> =
            self.entries.values().map(|entry| &entry.record).collect();
        records.sort_by_key(|record| record.seq);
        records.into_iter().map(PersistedJob::from).collect()
    }

    /// Persisted shape of one record.
    pub fn persisted_one(&self, id: &str) -> Option<PersistedJob> {
        self.entries
            .get(id)
            .map(|entry| PersistedJob::from(&entry.record))
    }

    /// Number of records waiting in the pending order.
    pub fn queue_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of records known to the store.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record count per status; every status is present.
    pub fn count_by_status(&self) -> BTreeMap<JobStatus, usize> {
        let mut counts: BTreeMap<JobStatus, usize> =
            JobStatus::ALL.into_iter().map(|status| (status, 0)).collect();
        for entry in self.entries.values() {
            *counts.entry(entry.record.status).or_default() += 1;
        }
        counts
    }

    /// Drop terminal records whose retention anchor is before `cutoff`.
    /// Records whose cancelled attempt is still executing are kept, so their
    /// id stays taken until the outcome is recorded. Returns the removed ids.
    pub fn remove_terminal_before(&mut self, cutoff: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = self
            .entries
            .values()
            .map(|entry| &entry.record)
            .filter(|record| {
                record.status.is_terminal()
                    && !record.is_cancel_in_flight()
                    && record.retention_anchor() < cutoff
            })
            .map(|record| record.id.clone())
            .collect();

        for id in &expired {
            self.entries.remove(id);
        }
        expired
    }
}
