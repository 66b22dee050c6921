//! # Worker Pool
//!
//! Fixed number of workers draining a bounded job queue. Submissions beyond
//! the queue depth are rejected with `ExecutorRejected`, never dropped
//! silently. Each job runs in its own task so a panic kills the job, not the
//! worker.

use ct_core::{QueryStoreError, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tracing::{debug, error};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub struct WorkerPool {
    tx: mpsc::Sender<Job>,
}

impl WorkerPool {
    /// Spawn `workers` workers on the current runtime.
    pub fn new(workers: usize, queue_depth: usize) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel::<Job>(queue_depth.max(1));
        let rx = Arc::new(Mutex::new(rx));

        for id in 0..workers {
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let job = rx.lock().await.recv().await;
                    let Some(job) = job else { break };
                    if let Err(e) = tokio::spawn(job).await {
                        error!("Worker {} job aborted: {}", id, e);
                    }
                }
                debug!("Worker {} stopped", id);
            });
        }

        Self { tx }
    }

    /// Queue a job without waiting for a slot.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tx.try_send(Box::pin(job)).map_err(|e| match e {
            TrySendError::Full(_) => QueryStoreError::ExecutorRejected("job queue is full".into()),
            TrySendError::Closed(_) => {
                QueryStoreError::ExecutorRejected("worker pool is shut down".into())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{oneshot, Notify};

    #[tokio::test]
    async fn test_runs_submitted_jobs() {
        let pool = WorkerPool::new(2, 8);
        let counter = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = oneshot::channel();
        let mut done_tx = Some(done_tx);
        for i in 0..4 {
            let counter = counter.clone();
            let tx = if i == 3 { done_tx.take() } else { None };
            pool.submit(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if let Some(tx) = tx {
                    let _ = tx.send(());
                }
            })
            .unwrap();
        }
        done_rx.await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_full_queue_rejects() {
        let pool = WorkerPool::new(1, 1);
        let gate = Arc::new(Notify::new());
        let (started_tx, started_rx) = oneshot::channel();

        let blocker = gate.clone();
        pool.submit(async move {
            let _ = started_tx.send(());
            blocker.notified().await;
        })
        .unwrap();
        started_rx.await.unwrap();

        pool.submit(async {}).unwrap();
        let err = pool.submit(async {}).unwrap_err();
        assert!(matches!(err, QueryStoreError::ExecutorRejected(_)));
        gate.notify_one();
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::new(1, 4);
        pool.submit(async { panic!("boom") }).unwrap();
        let (tx, rx) = oneshot::channel();
        pool.submit(async move {
            let _ = tx.send(42);
        })
        .unwrap();
        assert_eq!(rx.await.unwrap(), 42);
    }
}
