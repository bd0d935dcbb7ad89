//! Status and control API of the background job scheduler.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing;

use jobhub_core::config::AppConfig;
use jobhub_core::config::scheduler::SchedulerConfig;
use jobhub_entity::job::{JobArgs, JobRecord, JobStatus, JobView, PersistedJob};

use crate::error::SchedulerError;
use crate::executor::{FnWorkItem, JobExecutionError, WorkItem};
use crate::persistence::{self, JobPersistence};
use crate::retry::RetryPolicy;
use crate::runner::{DispatchLoop, Shared, instant_after};

/// Parameters of a job submission.
#[derive(Debug, Clone)]
pub struct SubmitJob {
    /// Caller-supplied unique id
    pub id: String,
    /// Work to run
    pub work_item: Arc<dyn WorkItem>,
    /// Arguments handed to the work item
    pub args: JobArgs,
    /// Dispatch priority; scheduler default when unset
    pub priority: Option<i32>,
    /// Delay before the first attempt
    pub delay: Duration,
    /// Retry budget; scheduler default when unset
    pub max_retries: Option<u32>,
    /// Backoff override for this job
    pub retry_policy: Option<RetryPolicy>,
}

impl SubmitJob {
    /// Submission with default priority, no delay and the default retry
    /// budget.
    pub fn new(id: impl Into<String>, work_item: Arc<dyn WorkItem>) -> Self {
        Self {
            id: id.into(),
            work_item,
            args: JobArgs::new(),
            priority: None,
            delay: Duration::ZERO,
            max_retries: None,
            retry_policy: None,
        }
    }

    /// Replace the argument list.
    pub fn args(mut self, args: JobArgs) -> Self {
        self.args = args;
        self
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args = self.args.arg(value);
        self
    }

    /// Set a keyword argument.
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args = self.args.kwarg(key, value);
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }
}

/// Scheduler statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Records known to the scheduler
    pub total: usize,
    /// Record count per status
    pub by_status: BTreeMap<JobStatus, usize>,
    /// Records waiting in the pending order
    pub queue_size: usize,
    /// Worker slots in use
    pub running_count: usize,
    /// Configured worker slots
    pub max_workers: usize,
}

#[derive(Debug)]
struct Lifecycle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Handle to a background job scheduler.
///
/// Cheap to clone; all clones control the same scheduler. Jobs may be
/// submitted before [`start`](Self::start) and are dispatched once the
/// loop runs.
#[derive(Debug, Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
    lifecycle: Arc<Mutex<Option<Lifecycle>>>,
}

impl Scheduler {
    /// Create a stopped scheduler.
    pub fn new(
        config: SchedulerConfig,
        retry_policy: RetryPolicy,
        persistence: Arc<dyn JobPersistence>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared::new(config, retry_policy, persistence)),
            lifecycle: Arc::new(Mutex::new(None)),
        }
    }

    /// Create a stopped scheduler from the application configuration.
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self::new(
            config.scheduler.clone(),
            RetryPolicy::from(&config.retry),
            persistence::from_config(&config.persistence),
        )
    }

    /// Scheduler configuration in effect
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Queue a job.
    pub async fn submit(&self, job: SubmitJob) -> Result<JobView, SchedulerError> {
        let SubmitJob {
            id,
            work_item,
            args,
            priority,
            delay,
            max_retries,
            retry_policy,
        } = job;

        let now = Utc::now();
        let config = &self.shared.config;
        let record = JobRecord::new(id, work_item.describe(), args, now)
            .with_priority(priority.unwrap_or(config.default_priority))
            .with_max_retries(max_retries.unwrap_or(config.default_max_retries))
            .eligible_from(instant_after(now, delay));

        let (view, request) = {
            let mut store = self.shared.store();
            let view = JobView::from(store.insert(record, work_item, retry_policy)?);
            let request = self.shared.capture(&store, &[view.id.as_str()], Vec::new());
            (view, request)
        };

        tracing::info!(
            job_id = %view.id,
            work_item = %view.work_item_description,
            priority = view.priority,
            eligible_at = %view.eligible_at,
            "Job submitted"
        );

        self.shared.wakeup.notify_one();
        self.shared.persist(request).await;
        Ok(view)
    }

    /// Queue an async closure as a job with default options.
    pub async fn submit_fn<F, Fut>(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        args: JobArgs,
        func: F,
    ) -> Result<JobView, SchedulerError>
    where
        F: Fn(JobArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>, JobExecutionError>> + Send + 'static,
    {
        let work_item: Arc<dyn WorkItem> = Arc::new(FnWorkItem::new(name, func));
        self.submit(SubmitJob::new(id, work_item).args(args)).await
    }

    /// Current state of a job.
    pub fn status(&self, id: &str) -> Result<JobView, SchedulerError> {
        let store = self.shared.store();
        store.get(id).map(JobView::from)
    }

    /// Cancel a job.
    ///
    /// A pending job is removed from the queue and never runs. A running job
    /// is only flagged: its work continues, its outcome is recorded, and it
    /// is never retried. Returns false for unknown ids and jobs that already
    /// finished.
    pub async fn cancel(&self, id: &str) -> bool {
        let request = {
            let mut store = self.shared.store();
            if !store.cancel(id, Utc::now()) {
                return false;
            }
            self.shared.capture(&store, &[id], Vec::new())
        };

        tracing::info!(job_id = %id, "Job cancelled");
        self.shared.wakeup.notify_one();
        self.shared.persist(request).await;
        true
    }

    /// Counts per status, queue length and worker usage.
    pub fn stats(&self) -> SchedulerStats {
        let store = self.shared.store();
        SchedulerStats {
            total: store.len(),
            by_status: store.count_by_status(),
            queue_size: store.queue_len(),
            running_count: self.shared.pool.running_count(),
            max_workers: self.shared.pool.max_workers(),
        }
    }

    /// Views of all jobs, optionally restricted to one status, in submission
    /// order.
    pub fn list(&self, filter: Option<JobStatus>) -> Vec<JobView> {
        self.shared.store().views(filter)
    }

    /// Remove finished jobs whose completion (or, lacking one, submission)
    /// is older than `older_than`. Returns how many were removed.
    pub async fn cleanup(&self, older_than: Duration) -> usize {
        let now = Utc::now();
        let cutoff = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|delta| now.checked_sub_signed(delta))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let (removed, request) = {
            let mut store = self.shared.store();
            let removed = store.remove_terminal_before(cutoff);
            if removed.is_empty() {
                (0, None)
            } else {
                let count = removed.len();
                (count, Some(self.shared.capture(&store, &[], removed)))
            }
        };

        tracing::info!(removed, cutoff = %cutoff, "Cleaned up old jobs");
        if let Some(request) = request {
            self.shared.persist(request).await;
        }
        removed
    }

    /// Whether the dispatch loop is running.
    pub fn is_running(&self) -> bool {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Spawn the dispatch loop. Must be called inside a tokio runtime.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        if lifecycle.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(DispatchLoop::new(Arc::clone(&self.shared), rx).run());
        *lifecycle = Some(Lifecycle { shutdown, handle });

        tracing::info!(
            max_workers = self.shared.pool.max_workers(),
            "Background job scheduler started"
        );
        Ok(())
    }

    /// Stop dispatching and wait for in-flight jobs, up to the configured
    /// shutdown timeout. Pending jobs stay queued.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let Lifecycle { shutdown, handle } = self
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(SchedulerError::NotRunning)?;

        let _ = shutdown.send(true);
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Dispatch loop terminated abnormally");
        }

        let timeout = self.shared.config.shutdown_timeout();
        if !self.shared.pool.drain(timeout).await {
            tracing::warn!(
                running = self.shared.pool.running_count(),
                timeout_secs = timeout.as_secs(),
                "Shutdown timeout elapsed with jobs still running"
            );
        }

        tracing::info!("Background job scheduler stopped");
        Ok(())
    }

    /// Read the state left by the previous run and report every job that
    /// was still pending. Such jobs are not resumed.
    ///
    /// Call before the first submission; the snapshot sink overwrites the
    /// previous file on its first write.
    pub async fn previous_pending(&self) -> Result<Vec<PersistedJob>, SchedulerError> {
        let pending: Vec<PersistedJob> = self
            .shared
            .persistence
            .load()
            .await?
            .into_iter()
            .filter(|job| job.status == JobStatus::Pending)
            .collect();

        for job in &pending {
            tracing::warn!(
                job_id = %job.id,
                work_item = %job.work_item_description,
                created_at = %job.created_at,
                "Job left pending by previous run, requiring manual restart"
            );
        }
        if !pending.is_empty() {
            tracing::warn!(
                count = pending.len(),
                "Found pending jobs from previous run"
            );
        }
        Ok(pending)
    }
}
