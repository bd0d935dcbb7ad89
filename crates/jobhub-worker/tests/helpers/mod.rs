//! Shared helpers for scheduler integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde_json::Value;

use jobhub_core::config::scheduler::SchedulerConfig;
use jobhub_entity::job::{JobArgs, JobStatus, JobView};
use jobhub_worker::{
    JobExecutionError, JobPersistence, NoPersistence, RetryPolicy, Scheduler, WorkItem, work_fn,
};

/// Scheduler config with a short poll interval.
pub fn config(max_workers: usize) -> SchedulerConfig {
    SchedulerConfig {
        max_workers,
        poll_interval_ms: 20,
        shutdown_timeout_seconds: 5,
        ..Default::default()
    }
}

/// Scheduler without persistence that retries immediately.
pub fn scheduler(max_workers: usize) -> Scheduler {
    scheduler_with(max_workers, Arc::new(NoPersistence))
}

/// Scheduler writing to the given sink that retries immediately.
pub fn scheduler_with(max_workers: usize, persistence: Arc<dyn JobPersistence>) -> Scheduler {
    Scheduler::new(
        config(max_workers),
        RetryPolicy::fixed(Duration::ZERO),
        persistence,
    )
}

pub fn noop() -> Arc<dyn WorkItem> {
    work_fn("tests::noop", |_args: JobArgs| async { Ok(None) })
}

/// Succeeds with `"done"` after sleeping.
pub fn sleeper(duration: Duration) -> Arc<dyn WorkItem> {
    work_fn("tests::sleeper", move |_args: JobArgs| async move {
        tokio::time::sleep(duration).await;
        Ok(Some(Value::from("done")))
    })
}

/// Counts its invocations and always fails with a transient error.
pub fn always_fails(calls: Arc<AtomicU32>) -> Arc<dyn WorkItem> {
    work_fn("tests::always_fails", move |_args: JobArgs| {
        let calls = Arc::clone(&calls);
        async move {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err::<Option<Value>, _>(JobExecutionError::Transient(format!(
                "attempt {attempt} failed"
            )))
        }
    })
}

/// Tracks the highest number of concurrent invocations.
#[derive(Debug, Default)]
pub struct ConcurrencyTracker {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyTracker {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn work_item(self: &Arc<Self>, duration: Duration) -> Arc<dyn WorkItem> {
        let tracker = Arc::clone(self);
        work_fn("tests::tracker", move |_args: JobArgs| {
            let tracker = Arc::clone(&tracker);
            async move {
                let now = tracker.current.fetch_add(1, Ordering::SeqCst) + 1;
                tracker.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(duration).await;
                tracker.current.fetch_sub(1, Ordering::SeqCst);
                Ok(None)
            }
        })
    }
}

/// Poll until the job reaches `status`.
pub async fn wait_for_status(
    scheduler: &Scheduler,
    id: &str,
    status: JobStatus,
    timeout: Duration,
) -> JobView {
    let deadline = Instant::now() + timeout;
    loop {
        let view = scheduler.status(id).expect("job exists");
        if view.status == status {
            return view;
        }
        assert!(
            Instant::now() < deadline,
            "job '{id}' still {} after {timeout:?}, expected {status}",
            view.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until `predicate` holds for the job.
pub async fn wait_until(
    scheduler: &Scheduler,
    id: &str,
    timeout: Duration,
    predicate: impl Fn(&JobView) -> bool,
) -> JobView {
    let deadline = Instant::now() + timeout;
    loop {
        let view = scheduler.status(id).expect("job exists");
        if predicate(&view) {
            return view;
        }
        assert!(
            Instant::now() < deadline,
            "job '{id}' did not reach the expected state"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
