//! Bounded worker slots.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing;

/// A fixed number of worker slots shared by the dispatch loop and its
/// worker tasks.
///
/// A slot is held for the whole lifetime of a worker task, so the number of
/// RUNNING jobs can never exceed `max_workers`.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    max_workers: usize,
}

impl WorkerPool {
    /// Create a pool with `max_workers` slots (at least one).
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    /// Reserve a free slot without waiting. The slot is returned when the
    /// permit is dropped.
    pub fn try_reserve(&self) -> Option<OwnedSemaphorePermit> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                tracing::trace!("All worker slots occupied");
                None
            }
        }
    }

    /// Slots currently free.
    pub fn free_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held by worker tasks.
    pub fn running_count(&self) -> usize {
        self.max_workers.saturating_sub(self.free_slots())
    }

    /// Configured number of slots.
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Wait until every slot has been returned, up to `timeout`.
    ///
    /// Returns false if work was still in flight when the timeout expired.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let all = u32::try_from(self.max_workers).unwrap_or(u32::MAX);
        match tokio::time::timeout(timeout, self.semaphore.acquire_many(all)).await {
            Ok(Ok(_permits)) => true,
            Ok(Err(_)) => true,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservations_are_bounded() {
        let pool = WorkerPool::new(2);
        let first = pool.try_reserve().unwrap();
        let _second = pool.try_reserve().unwrap();

        assert!(pool.try_reserve().is_none());
        assert_eq!(pool.running_count(), 2);

        drop(first);
        assert_eq!(pool.running_count(), 1);
        assert_eq!(pool.free_slots(), 1);
    }

    #[test]
    fn zero_workers_is_clamped() {
        assert_eq!(WorkerPool::new(0).max_workers(), 1);
    }

    #[tokio::test]
    async fn drain_waits_for_released_slots() {
        let pool = WorkerPool::new(1);
        let permit = pool.try_reserve().unwrap();

        assert!(!pool.drain(Duration::from_millis(20)).await);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(permit);
        });
        assert!(pool.drain(Duration::from_secs(2)).await);
        assert_eq!(pool.running_count(), 0);
    }
}
