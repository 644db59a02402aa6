//! Bounded transfer pool and cooperative cancellation.

use futures::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error};

/// Shared shutdown flag
///
/// Checked between cycle phases and before each queued transfer starts;
/// transfers already running are never interrupted.
#[derive(Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolve once cancelled
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Result of one pooled job
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Done(T),
    /// Never started because of cancellation
    Abandoned,
    /// The job panicked
    Failed(String),
}

/// Runs transfer jobs with at most `size` in flight
///
/// Jobs beyond the limit wait for a permit; nothing is dropped.
#[derive(Clone)]
pub struct TransferPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl TransferPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run every job, returning outcomes in submission order
    pub async fn run_all<T, F>(&self, jobs: Vec<F>, cancel: &Cancellation) -> Vec<TaskOutcome<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let total = jobs.len();
        let mut set = JoinSet::new();
        for (index, job) in jobs.into_iter().enumerate() {
            let permits = self.permits.clone();
            let cancel = cancel.clone();
            set.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (index, None);
                };
                if cancel.is_cancelled() {
                    return (index, None);
                }
                (index, Some(job.await))
            });
        }

        let mut outcomes: Vec<Option<TaskOutcome<T>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, Some(value))) => outcomes[index] = Some(TaskOutcome::Done(value)),
                Ok((index, None)) => outcomes[index] = Some(TaskOutcome::Abandoned),
                Err(e) => error!(error = %e, "Transfer task failed"),
            }
        }

        let outcomes: Vec<TaskOutcome<T>> = outcomes
            .into_iter()
            .map(|o| o.unwrap_or_else(|| TaskOutcome::Failed("transfer task panicked".to_string())))
            .collect();
        debug!(jobs = total, pool = self.size, "Transfer batch finished");
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrency_is_bounded_and_order_kept() {
        let pool = TransferPool::new(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let jobs: Vec<_> = (0..8)
            .map(|i| {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    i * 10
                }
            })
            .collect();

        let outcomes = pool.run_all(jobs, &Cancellation::new()).await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        let values: Vec<usize> = outcomes
            .into_iter()
            .map(|o| match o {
                TaskOutcome::Done(v) => v,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(values, (0..8).map(|i| i * 10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_cancelled_jobs_are_abandoned() {
        let pool = TransferPool::new(1);
        let cancel = Cancellation::new();
        cancel.cancel();
        let jobs: Vec<_> = (1..=2).map(|i| async move { i }).collect();
        let outcomes = pool.run_all(jobs, &cancel).await;
        assert!(outcomes.iter().all(|o| matches!(o, TaskOutcome::Abandoned)));
    }

    async fn explode() -> u8 {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_panicking_job_is_reported() {
        let pool = TransferPool::new(1);
        let jobs: Vec<std::pin::Pin<Box<dyn Future<Output = u8> + Send>>> =
            vec![Box::pin(async { 1u8 }), Box::pin(explode())];
        let outcomes = pool.run_all(jobs, &Cancellation::new()).await;
        assert!(matches!(outcomes[0], TaskOutcome::Done(1)));
        assert!(matches!(outcomes[1], TaskOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let cancel = Cancellation::new();
        let waiter = {
            let cancel = cancel.clone();
            tokio::spawn(async move { cancel.cancelled().await })
        };
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
