//! Work item contract and guarded execution.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use jobhub_entity::job::JobArgs;

/// An opaque unit of work the scheduler can invoke.
///
/// Implementations are called from worker tasks, possibly concurrently with
/// other invocations of the same item; making the business logic safe to
/// run that way is the implementor's responsibility.
#[async_trait]
pub trait WorkItem: Send + Sync + fmt::Debug {
    /// Human-readable description written to the persisted job state.
    fn describe(&self) -> String;

    /// Execute with the job's stored arguments.
    async fn execute(&self, args: &JobArgs) -> Result<Option<Value>, JobExecutionError>;
}

/// Error from job execution
#[derive(Debug, thiserror::Error)]
pub enum JobExecutionError {
    /// Permanent failure, never retried
    #[error("Permanent job failure: {0}")]
    Permanent(String),

    /// Transient failure, retried while budget remains
    #[error("Transient job failure: {0}")]
    Transient(String),

    /// The work item panicked
    #[error("Work item panicked: {0}")]
    Panicked(String),
}

impl JobExecutionError {
    /// Whether the retry policy applies to this failure.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent(_))
    }
}

/// Run a work item, turning a panic into [`JobExecutionError::Panicked`] so
/// it is handled like any other failed attempt.
pub async fn execute_guarded(
    work_item: &dyn WorkItem,
    args: &JobArgs,
) -> Result<Option<Value>, JobExecutionError> {
    match AssertUnwindSafe(work_item.execute(args)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(JobExecutionError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

type BoxedWorkFn =
    dyn Fn(JobArgs) -> BoxFuture<'static, Result<Option<Value>, JobExecutionError>> + Send + Sync;

/// Adapts an async closure into a [`WorkItem`].
pub struct FnWorkItem {
    name: String,
    func: Box<BoxedWorkFn>,
}

impl FnWorkItem {
    /// Wrap `func` under the given description.
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(JobArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>, JobExecutionError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(move |args| func(args).boxed()),
        }
    }
}

impl fmt::Debug for FnWorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnWorkItem").field("name", &self.name).finish()
    }
}

#[async_trait]
impl WorkItem for FnWorkItem {
    fn describe(&self) -> String {
        self.name.clone()
    }

    async fn execute(&self, args: &JobArgs) -> Result<Option<Value>, JobExecutionError> {
        (self.func)(args.clone()).await
    }
}

/// Shorthand for `Arc::new(FnWorkItem::new(name, func))`.
pub fn work_fn<F, Fut>(name: impl Into<String>, func: F) -> Arc<dyn WorkItem>
where
    F: Fn(JobArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Value>, JobExecutionError>> + Send + 'static,
{
    Arc::new(FnWorkItem::new(name, func))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fn_work_item_receives_arguments() {
        let item = work_fn("tests::echo", |args: JobArgs| async move {
            Ok(args.positional(0).cloned())
        });

        assert_eq!(item.describe(), "tests::echo");
        let out = item.execute(&JobArgs::new().arg("hello")).await.unwrap();
        assert_eq!(out, Some(Value::from("hello")));
    }

    #[tokio::test]
    async fn panic_is_reported_as_failure() {
        let item = work_fn("tests::panics", |_args: JobArgs| async move {
            if true {
                panic!("exploded");
            }
            Ok(None)
        });

        let err = execute_guarded(item.as_ref(), &JobArgs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JobExecutionError::Panicked(ref msg) if msg == "exploded"));
        assert!(err.is_retryable());
    }

    #[test]
    fn permanent_failures_are_not_retryable() {
        assert!(!JobExecutionError::Permanent("bad input".into()).is_retryable());
        assert!(JobExecutionError::Transient("timeout".into()).is_retryable());
    }
}
