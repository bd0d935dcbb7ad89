//! Cron scheduler for recurring jobs and the retention sweep.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing;

use jobhub_core::config::retention::RetentionConfig;
use jobhub_core::error::AppError;
use jobhub_entity::job::JobArgs;

use crate::executor::WorkItem;
use crate::scheduler::{Scheduler, SubmitJob};

/// A job submitted afresh on every tick of a cron expression.
#[derive(Debug, Clone)]
pub struct RecurringJob {
    /// Name; submitted ids are `{name}-{unix_millis}`
    pub name: String,
    /// Six-field cron expression (seconds first)
    pub schedule: String,
    /// Work to run on each tick
    pub work_item: Arc<dyn WorkItem>,
    /// Arguments for every submission
    pub args: JobArgs,
    /// Priority of every submission
    pub priority: Option<i32>,
    /// Retry budget of every submission
    pub max_retries: Option<u32>,
}

impl RecurringJob {
    pub fn new(
        name: impl Into<String>,
        schedule: impl Into<String>,
        work_item: Arc<dyn WorkItem>,
    ) -> Self {
        Self {
            name: name.into(),
            schedule: schedule.into(),
            work_item,
            args: JobArgs::new(),
            priority: None,
            max_retries: None,
        }
    }

    pub fn args(mut self, args: JobArgs) -> Self {
        self.args = args;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Submission for the tick at `now`.
    pub fn submission(&self, now: DateTime<Utc>) -> SubmitJob {
        let mut job = SubmitJob::new(
            format!("{}-{}", self.name, now.timestamp_millis()),
            Arc::clone(&self.work_item),
        )
        .args(self.args.clone());
        job.priority = self.priority;
        job.max_retries = self.max_retries;
        job
    }
}

/// Cron-based scheduler feeding a [`Scheduler`]
pub struct CronScheduler {
    /// The underlying cron scheduler
    scheduler: JobScheduler,
    /// Job scheduler receiving the submissions
    jobs: Scheduler,
}

impl std::fmt::Debug for CronScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronScheduler").finish()
    }
}

impl CronScheduler {
    /// Create a new cron scheduler
    pub async fn new(jobs: Scheduler) -> Result<Self, AppError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::internal(format!("Failed to create cron scheduler: {}", e)))?;

        Ok(Self { scheduler, jobs })
    }

    /// Submit `job` on every tick of its schedule.
    pub async fn register(&self, job: RecurringJob) -> Result<(), AppError> {
        let jobs = self.jobs.clone();
        let name = job.name.clone();
        let schedule = job.schedule.clone();
        let recurring = Arc::new(job);

        let cron_job = CronJob::new_async(schedule.as_str(), move |_uuid, _lock| {
            let jobs = jobs.clone();
            let recurring = Arc::clone(&recurring);
            Box::pin(async move {
                let submission = recurring.submission(Utc::now());
                tracing::debug!(job_id = %submission.id, "Submitting recurring job");
                if let Err(e) = jobs.submit(submission).await {
                    tracing::error!(
                        name = %recurring.name,
                        error = %e,
                        "Failed to submit recurring job"
                    );
                }
            })
        })
        .map_err(|e| {
            AppError::validation(format!("Invalid schedule '{}' for {}: {}", schedule, name, e))
        })?;

        self.scheduler.add(cron_job).await.map_err(|e| {
            AppError::internal(format!("Failed to add {} schedule: {}", name, e))
        })?;

        tracing::info!(name = %name, schedule = %schedule, "Registered recurring job");
        Ok(())
    }

    /// Periodically drop finished jobs older than the retention window.
    pub async fn register_retention_sweep(
        &self,
        retention: &RetentionConfig,
    ) -> Result<(), AppError> {
        let jobs = self.jobs.clone();
        let window = retention.window();
        let schedule = retention.sweep_cron.clone();

        let cron_job = CronJob::new_async(schedule.as_str(), move |_uuid, _lock| {
            let jobs = jobs.clone();
            Box::pin(async move {
                let removed = jobs.cleanup(window).await;
                tracing::debug!(removed, "Retention sweep finished");
            })
        })
        .map_err(|e| {
            AppError::validation(format!(
                "Invalid retention sweep schedule '{}': {}",
                schedule, e
            ))
        })?;

        self.scheduler.add(cron_job).await.map_err(|e| {
            AppError::internal(format!("Failed to add retention sweep schedule: {}", e))
        })?;

        tracing::info!(
            schedule = %schedule,
            retention_days = window.as_secs() / 86_400,
            "Registered: retention sweep"
        );
        Ok(())
    }

    /// Start the scheduler
    pub async fn start(&self) -> Result<(), AppError> {
        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::internal(format!("Failed to start cron scheduler: {}", e)))?;

        tracing::info!("Cron scheduler started");
        Ok(())
    }

    /// Shutdown the scheduler
    pub async fn shutdown(&self) -> Result<(), AppError> {
        let mut scheduler = self.scheduler.clone();
        scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::internal(format!("Failed to shutdown cron scheduler: {}", e)))?;

        tracing::info!("Cron scheduler shut down");
        Ok(())
    }
}
