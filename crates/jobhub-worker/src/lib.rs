//! Background job scheduling for JobHub.
//!
//! This crate provides:
//! - A job store ordering pending jobs by priority and eligibility time
//! - A dispatch loop feeding a bounded pool of worker tasks
//! - Retry with configurable backoff for failed jobs
//! - Snapshot or journal persistence of job state for inspection
//! - A cron scheduler for recurring jobs and the retention sweep
//! - Built-in work items for cleanup, reports, and uploads

pub mod cron;
pub mod error;
pub mod executor;
pub mod jobs;
pub mod persistence;
pub mod pool;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod store;

pub use cron::{CronScheduler, RecurringJob};
pub use error::SchedulerError;
pub use executor::{FnWorkItem, JobExecutionError, WorkItem, work_fn};
pub use persistence::{JobPersistence, JournalFile, NoPersistence, PersistenceError, SnapshotFile};
pub use retry::RetryPolicy;
pub use scheduler::{Scheduler, SchedulerStats, SubmitJob};
