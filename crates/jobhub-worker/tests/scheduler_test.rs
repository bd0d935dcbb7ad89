//! Integration tests for dispatch, retries, cancellation and lifecycle.

mod helpers;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use jobhub_entity::job::{JobArgs, JobStatus};
use jobhub_worker::{JobExecutionError, RetryPolicy, SchedulerError, SubmitJob, work_fn};

use helpers::{ConcurrencyTracker, always_fails, noop, scheduler, sleeper, wait_for_status, wait_until};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_job_runs_and_completes() {
    let scheduler = scheduler(2);
    scheduler.start().unwrap();

    let view = scheduler
        .submit_fn("echo", "tests::echo", JobArgs::new().arg("hi"), |args| async move {
            Ok(args.positional(0).cloned())
        })
        .await
        .unwrap();
    assert_eq!(view.status, JobStatus::Pending);

    let done = wait_for_status(&scheduler, "echo", JobStatus::Completed, WAIT).await;
    assert_eq!(done.result, Some(Value::from("hi")));
    assert!(done.error.is_none());
    assert!(done.started_at.is_some());
    assert!(done.completed_at.is_some());
    assert_eq!(done.attempts, 1);

    scheduler.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_delayed_job_waits_for_eligibility() {
    let scheduler = scheduler(2);
    scheduler.start().unwrap();

    let delay = Duration::from_millis(600);
    scheduler
        .submit(SubmitJob::new("delayed", noop()).delay(delay))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        scheduler.status("delayed").unwrap().status,
        JobStatus::Pending
    );

    let done = wait_for_status(&scheduler, "delayed", JobStatus::Completed, WAIT).await;
    let started = done.started_at.unwrap();
    assert!(started >= done.eligible_at);
    assert!((started - done.created_at).to_std().unwrap() >= delay);

    scheduler.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_running_count_never_exceeds_max_workers() {
    let scheduler = scheduler(2);
    let tracker = Arc::new(ConcurrencyTracker::default());

    for i in 0..10 {
        scheduler
            .submit(SubmitJob::new(
                format!("sleep-{i}"),
                tracker.work_item(Duration::from_millis(150)),
            ))
            .await
            .unwrap();
    }
    scheduler.start().unwrap();

    loop {
        let stats = scheduler.stats();
        assert!(stats.running_count <= 2, "running_count {}", stats.running_count);
        assert!(stats.by_status[&JobStatus::Running] <= 2);
        if stats.by_status[&JobStatus::Completed] == 10 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(tracker.peak(), 2);
    scheduler.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_higher_priority_dispatches_first() {
    let scheduler = scheduler(1);
    let order = Arc::new(Mutex::new(Vec::new()));

    for (id, priority) in [("low", 1), ("mid", 3), ("high", 5), ("mid-2", 3)] {
        let order = Arc::clone(&order);
        let item = work_fn("tests::record_order", move |args: JobArgs| {
            let order = Arc::clone(&order);
            async move {
                let id = args.positional(0).and_then(Value::as_str).unwrap_or_default();
                order.lock().unwrap().push(id.to_string());
                Ok(None)
            }
        });
        scheduler
            .submit(SubmitJob::new(id, item).arg(id).priority(priority))
            .await
            .unwrap();
    }
    scheduler.start().unwrap();

    wait_for_status(&scheduler, "low", JobStatus::Completed, WAIT).await;
    assert_eq!(*order.lock().unwrap(), ["high", "mid", "mid-2", "low"]);

    scheduler.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_retries_until_budget_is_spent() {
    let scheduler = scheduler(2);
    scheduler.start().unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    scheduler
        .submit(SubmitJob::new("flaky", always_fails(Arc::clone(&calls))).max_retries(2))
        .await
        .unwrap();

    let failed = wait_for_status(&scheduler, "flaky", JobStatus::Failed, WAIT).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(failed.attempts, 3);
    assert_eq!(failed.retry_count, 2);
    assert!(failed.error.as_deref().unwrap().contains("attempt 3 failed"));
    assert!(failed.completed_at.is_some());

    // Terminal: no further attempts.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    scheduler.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_zero_retries_fails_after_one_attempt() {
    let scheduler = scheduler(1);
    scheduler.start().unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    scheduler
        .submit(SubmitJob::new("once", always_fails(Arc::clone(&calls))).max_retries(0))
        .await
        .unwrap();

    let failed = wait_for_status(&scheduler, "once", JobStatus::Failed, WAIT).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(failed.retry_count, 0);

    scheduler.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_retry_waits_for_backoff() {
    let scheduler = scheduler(1);
    scheduler.start().unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    scheduler
        .submit(
            SubmitJob::new("backoff", always_fails(Arc::clone(&calls)))
                .max_retries(1)
                .retry_policy(RetryPolicy::fixed(Duration::from_millis(400))),
        )
        .await
        .unwrap();

    let retrying = wait_until(&scheduler, "backoff", WAIT, |view| view.retry_count == 1).await;
    assert_eq!(retrying.status, JobStatus::Pending);
    assert!(retrying.eligible_at > retrying.started_at.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    wait_for_status(&scheduler, "backoff", JobStatus::Failed, WAIT).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    scheduler.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_permanent_error_skips_retries() {
    let scheduler = scheduler(1);
    scheduler.start().unwrap();

    scheduler
        .submit(SubmitJob::new(
            "invalid",
            work_fn("tests::rejects", |_args: JobArgs| async {
                Err::<Option<Value>, _>(JobExecutionError::Permanent("bad input".into()))
            }),
        ))
        .await
        .unwrap();

    let failed = wait_for_status(&scheduler, "invalid", JobStatus::Failed, WAIT).await;
    assert_eq!(failed.attempts, 1);
    assert_eq!(failed.retry_count, 0);

    scheduler.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panicking_work_item_is_contained() {
    let scheduler = scheduler(1);
    scheduler.start().unwrap();

    scheduler
        .submit(
            SubmitJob::new(
                "panics",
                work_fn("tests::panics", |_args: JobArgs| async {
                    if true {
                        panic!("work item exploded");
                    }
                    Ok(None)
                }),
            )
            .max_retries(1),
        )
        .await
        .unwrap();
    scheduler.submit(SubmitJob::new("after", noop())).await.unwrap();

    let failed = wait_for_status(&scheduler, "panics", JobStatus::Failed, WAIT).await;
    assert_eq!(failed.attempts, 2);
    assert!(failed.error.unwrap().contains("work item exploded"));

    wait_for_status(&scheduler, "after", JobStatus::Completed, WAIT).await;
    assert_eq!(scheduler.stats().running_count, 0);

    scheduler.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_id_is_rejected() {
    let scheduler = scheduler(1);
    scheduler
        .submit(SubmitJob::new("dup", noop()).priority(2))
        .await
        .unwrap();

    let err = scheduler
        .submit(SubmitJob::new("dup", noop()).priority(9))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::DuplicateId(ref id) if id == "dup"));

    let original = scheduler.status("dup").unwrap();
    assert_eq!(original.priority, 2);
    assert_eq!(scheduler.stats().total, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_pending_job_never_runs() {
    let scheduler = scheduler(1);
    let calls = Arc::new(AtomicU32::new(0));

    scheduler
        .submit(
            SubmitJob::new("cancel-me", always_fails(Arc::clone(&calls)))
                .delay(Duration::from_millis(200)),
        )
        .await
        .unwrap();
    assert!(scheduler.cancel("cancel-me").await);
    scheduler.start().unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    let view = scheduler.status("cancel-me").unwrap();
    assert_eq!(view.status, JobStatus::Cancelled);
    assert!(view.completed_at.is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.stats().queue_size, 0);

    assert!(!scheduler.cancel("cancel-me").await);
    scheduler.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_running_job_keeps_status() {
    let scheduler = scheduler(1);
    scheduler.start().unwrap();

    scheduler
        .submit(SubmitJob::new("long", sleeper(Duration::from_millis(300))))
        .await
        .unwrap();
    wait_for_status(&scheduler, "long", JobStatus::Running, WAIT).await;

    assert!(scheduler.cancel("long").await);
    let flagged = scheduler.status("long").unwrap();
    assert_eq!(flagged.status, JobStatus::Cancelled);
    assert!(flagged.completed_at.is_none());

    let finished = wait_until(&scheduler, "long", WAIT, |view| {
        view.completed_at.is_some()
    })
    .await;
    assert_eq!(finished.status, JobStatus::Cancelled);
    assert_eq!(finished.result, Some(Value::from("done")));
    assert_eq!(finished.attempts, 1);

    scheduler.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cleanup_spares_cancelled_job_until_its_work_finishes() {
    let scheduler = scheduler(1);
    scheduler.start().unwrap();

    scheduler
        .submit(SubmitJob::new("long", sleeper(Duration::from_millis(400))))
        .await
        .unwrap();
    wait_for_status(&scheduler, "long", JobStatus::Running, WAIT).await;
    assert!(scheduler.cancel("long").await);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(scheduler.cleanup(Duration::from_millis(10)).await, 0);
    assert!(matches!(
        scheduler.submit(SubmitJob::new("long", noop())).await,
        Err(SchedulerError::DuplicateId(_))
    ));

    let finished = wait_until(&scheduler, "long", WAIT, |view| {
        view.completed_at.is_some()
    })
    .await;
    assert_eq!(finished.status, JobStatus::Cancelled);
    assert_eq!(finished.result, Some(Value::from("done")));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(scheduler.cleanup(Duration::from_millis(10)).await, 1);
    scheduler.submit(SubmitJob::new("long", noop())).await.unwrap();
    let fresh = wait_for_status(&scheduler, "long", JobStatus::Completed, WAIT).await;
    assert_eq!(fresh.result, None);
    assert_eq!(fresh.attempts, 1);

    scheduler.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cleanup_removes_only_old_terminal_jobs() {
    let scheduler = scheduler(1);
    scheduler.start().unwrap();

    scheduler.submit(SubmitJob::new("done", noop())).await.unwrap();
    scheduler
        .submit(SubmitJob::new("waiting", noop()).delay(Duration::from_secs(60)))
        .await
        .unwrap();
    wait_for_status(&scheduler, "done", JobStatus::Completed, WAIT).await;

    assert_eq!(scheduler.cleanup(Duration::from_secs(3600)).await, 0);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(scheduler.cleanup(Duration::ZERO).await, 1);
    assert!(matches!(
        scheduler.status("done"),
        Err(SchedulerError::NotFound(_))
    ));
    assert_eq!(
        scheduler.status("waiting").unwrap().status,
        JobStatus::Pending
    );

    scheduler.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_waits_for_in_flight_jobs() {
    let scheduler = scheduler(2);
    scheduler.start().unwrap();

    scheduler
        .submit(SubmitJob::new("in-flight", sleeper(Duration::from_millis(200))))
        .await
        .unwrap();
    wait_for_status(&scheduler, "in-flight", JobStatus::Running, WAIT).await;

    scheduler.stop().await.unwrap();
    assert_eq!(
        scheduler.status("in-flight").unwrap().status,
        JobStatus::Completed
    );
    assert_eq!(scheduler.stats().running_count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stopped_scheduler_keeps_pending_jobs() {
    let scheduler = scheduler(1);
    scheduler.start().unwrap();
    scheduler.stop().await.unwrap();

    scheduler.submit(SubmitJob::new("queued", noop())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        scheduler.status("queued").unwrap().status,
        JobStatus::Pending
    );

    scheduler.start().unwrap();
    wait_for_status(&scheduler, "queued", JobStatus::Completed, WAIT).await;
    scheduler.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_list_filters_by_status() {
    let scheduler = scheduler(1);
    scheduler.submit(SubmitJob::new("a", noop())).await.unwrap();
    scheduler.submit(SubmitJob::new("b", noop())).await.unwrap();
    scheduler.submit(SubmitJob::new("c", noop())).await.unwrap();
    scheduler.cancel("b").await;

    let all: Vec<String> = scheduler.list(None).into_iter().map(|v| v.id).collect();
    assert_eq!(all, ["a", "b", "c"]);

    let pending: Vec<String> = scheduler
        .list(Some(JobStatus::Pending))
        .into_iter()
        .map(|v| v.id)
        .collect();
    assert_eq!(pending, ["a", "c"]);
}
