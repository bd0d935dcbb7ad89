//! Dispatch loop: moves eligible jobs onto free worker slots and records
//! their outcomes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Notify, OwnedSemaphorePermit, watch};
use tokio::time;
use tracing;

use jobhub_core::config::scheduler::SchedulerConfig;
use jobhub_entity::job::{JobArgs, JobStatus};

use crate::executor::{JobExecutionError, WorkItem, execute_guarded};
use crate::persistence::{JobPersistence, PersistRequest};
use crate::pool::WorkerPool;
use crate::retry::RetryPolicy;
use crate::store::JobStore;

/// `now + delay`, saturating at the latest representable instant.
pub(crate) fn instant_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// State shared by the control API, the dispatch loop and worker tasks.
#[derive(Debug)]
pub(crate) struct Shared {
    store: Mutex<JobStore>,
    pub(crate) pool: WorkerPool,
    pub(crate) persistence: Arc<dyn JobPersistence>,
    pub(crate) wakeup: Notify,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) config: SchedulerConfig,
    version: AtomicU64,
}

impl Shared {
    pub(crate) fn new(
        config: SchedulerConfig,
        retry_policy: RetryPolicy,
        persistence: Arc<dyn JobPersistence>,
    ) -> Self {
        Self {
            store: Mutex::new(JobStore::new()),
            pool: WorkerPool::new(config.max_workers),
            persistence,
            wakeup: Notify::new(),
            retry_policy,
            config,
            version: AtomicU64::new(0),
        }
    }

    /// Lock the store. Never held across an `.await`.
    pub(crate) fn store(&self) -> MutexGuard<'_, JobStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Capture a persistence batch. Must be called with the store locked so
    /// that version order matches state order.
    pub(crate) fn capture(
        &self,
        store: &JobStore,
        changed: &[&str],
        removed: Vec<String>,
    ) -> PersistRequest {
        PersistRequest {
            version: self.version.fetch_add(1, Ordering::SeqCst) + 1,
            upserts: changed
                .iter()
                .filter_map(|id| store.persisted_one(id))
                .collect(),
            removed,
            records: self
                .persistence
                .wants_full_snapshot()
                .then(|| store.persisted()),
        }
    }

    /// Hand a batch to the sink; failures are logged only.
    pub(crate) async fn persist(&self, request: PersistRequest) {
        let version = request.version;
        if let Err(e) = self.persistence.persist(request).await {
            tracing::error!(version, error = %e, "Failed to persist job state");
        }
    }

    /// Apply the outcome of an attempt to the record and capture the change.
    fn complete(
        &self,
        id: &str,
        outcome: Result<Option<Value>, JobExecutionError>,
    ) -> Option<PersistRequest> {
        let now = Utc::now();
        let mut store = self.store();

        let Some(entry) = store.get_entry_mut(id) else {
            tracing::warn!(job_id = %id, "Finished job is no longer in the store");
            return None;
        };
        let record = &mut entry.record;

        let mut requeue = false;
        let transition = match (record.status, outcome) {
            (JobStatus::Cancelled, outcome) => {
                tracing::info!(job_id = %id, "Cancelled job finished its last attempt");
                record.record_outcome_after_cancel(outcome.map_err(|e| e.to_string()), now);
                Ok(())
            }
            (_, Ok(result)) => {
                tracing::info!(job_id = %id, attempts = record.attempts, "Job completed");
                record.mark_completed(result, now)
            }
            (_, Err(err)) if err.is_retryable() && record.has_retry_budget() => {
                let retry = record.retry_count + 1;
                let policy = entry.retry_policy.as_ref().unwrap_or(&self.retry_policy);
                let delay = policy.delay_for_retry(retry);
                tracing::warn!(
                    job_id = %id,
                    retry,
                    max_retries = record.max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Job failed, retry scheduled"
                );
                requeue = true;
                record.mark_retry(err.to_string(), instant_after(now, delay))
            }
            (_, Err(err)) => {
                tracing::error!(
                    job_id = %id,
                    attempts = record.attempts,
                    error = %err,
                    "Job failed permanently"
                );
                record.mark_failed(err.to_string(), now)
            }
        };

        if let Err(e) = transition {
            tracing::error!(error = %e, "Could not record job outcome");
            requeue = false;
        }
        if requeue {
            if let Err(e) = store.reinsert(id) {
                tracing::error!(job_id = %id, error = %e, "Failed to requeue job");
            }
        }

        Some(self.capture(&store, &[id], Vec::new()))
    }
}

/// A job taken off the pending order and bound to a worker slot.
struct Dispatched {
    id: String,
    args: JobArgs,
    work_item: Arc<dyn WorkItem>,
    started: PersistRequest,
    permit: OwnedSemaphorePermit,
}

/// Single task that feeds the worker pool.
#[derive(Debug)]
pub struct DispatchLoop {
    shared: Arc<Shared>,
    shutdown: watch::Receiver<bool>,
}

impl DispatchLoop {
    pub(crate) fn new(shared: Arc<Shared>, shutdown: watch::Receiver<bool>) -> Self {
        Self { shared, shutdown }
    }

    /// Run until the shutdown signal is received.
    pub async fn run(mut self) {
        tracing::info!(
            max_workers = self.shared.pool.max_workers(),
            poll_interval_ms = self.shared.config.poll_interval_ms,
            "Dispatch loop started"
        );

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            // Register interest before scanning so a notification sent while
            // the store is inspected is not lost.
            let notified = self.shared.wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            while let Some(job) = self.next_dispatch() {
                tokio::spawn(run_job(Arc::clone(&self.shared), job));
            }

            let sleep_for = self.sleep_bound(Utc::now());
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                _ = &mut notified => {}
                _ = time::sleep(sleep_for) => {}
            }
        }

        tracing::info!("Dispatch loop stopped");
    }

    /// Reserve a slot and claim the next ready job for it.
    fn next_dispatch(&self) -> Option<Dispatched> {
        let permit = self.shared.pool.try_reserve()?;
        let now = Utc::now();
        let mut store = self.shared.store();

        // The reserved permit is the one free slot this dispatch may use.
        let id = store.next_ready(now, 1)?.id.clone();
        store.remove(&id);

        let entry = store.get_entry_mut(&id)?;
        if let Err(e) = entry.record.mark_running(now) {
            tracing::error!(error = %e, "Skipping job that cannot start");
            return None;
        }
        let args = entry.record.args.clone();
        let work_item = Arc::clone(&entry.work_item);
        tracing::info!(
            job_id = %id,
            work_item = %entry.record.work_item_description,
            attempt = entry.record.attempts,
            max_attempts = entry.record.max_retries.saturating_add(1),
            "Dispatching job"
        );

        let started = self.shared.capture(&store, &[id.as_str()], Vec::new());
        Some(Dispatched {
            id,
            args,
            work_item,
            started,
            permit,
        })
    }

    /// Upper bound on the idle wait: the poll interval, shortened to the
    /// next known eligibility instant.
    fn sleep_bound(&self, now: DateTime<Utc>) -> Duration {
        let poll = self.shared.config.poll_interval();
        if self.shared.pool.free_slots() == 0 {
            return poll;
        }
        match self.shared.store().next_eligible_at() {
            Some(at) => (at - now).to_std().unwrap_or(Duration::ZERO).min(poll),
            None => poll,
        }
    }
}

/// Worker task body. The slot is held until the outcome has been recorded
/// and persisted.
async fn run_job(shared: Arc<Shared>, job: Dispatched) {
    let Dispatched {
        id,
        args,
        work_item,
        started,
        permit,
    } = job;

    shared.persist(started).await;

    let outcome = execute_guarded(work_item.as_ref(), &args).await;
    if let Some(request) = shared.complete(&id, outcome) {
        shared.persist(request).await;
    }

    drop(permit);
    shared.wakeup.notify_one();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_after_saturates() {
        let now = Utc::now();
        assert_eq!(instant_after(now, Duration::ZERO), now);
        assert_eq!(
            instant_after(now, Duration::from_secs(5)),
            now + chrono::Duration::seconds(5)
        );
        assert_eq!(instant_after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }
}
