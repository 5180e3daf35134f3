//! Bounded worker pool for signal lookups
//!
//! A fixed number of worker tasks drain a bounded queue. When every worker is
//! busy and the queue is full, [`WorkerPool::submit`] suspends the caller
//! until a slot frees up. Each job runs in its own task, so a panicking job
//! costs only its own result. Dropping the pool closes the queue; workers
//! finish what was already queued and exit.

use crate::error::StateError;
use crate::logging::log_error;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

pub const MIN_WORKERS: usize = 2;
pub const MAX_WORKERS: usize = 4;
pub const QUEUE_DEPTH: usize = 4;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` (clamped to 2..=4) tasks on the current runtime
    pub fn new(workers: usize, queue_depth: usize) -> Result<Self, StateError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| StateError::NoRuntime)?;

        let (sender, receiver) = mpsc::channel::<Job>(queue_depth.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..workers.clamp(MIN_WORKERS, MAX_WORKERS))
            .map(|_| {
                let receiver = Arc::clone(&receiver);
                handle.spawn(async move {
                    loop {
                        let job = receiver.lock().await.recv().await;
                        let Some(job) = job else { break };

                        // A panicking job must not take its worker down with it
                        if let Err(e) = tokio::spawn(job).await {
                            log_error!("Signal job failed: {}", e);
                        }
                    }
                })
            })
            .collect();

        Ok(Self { sender, workers })
    }

    /// Queue `job`, waiting for space if the queue is full
    pub async fn submit<F>(&self, job: F) -> Result<(), StateError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.sender
            .send(Box::pin(job))
            .await
            .map_err(|_| StateError::PoolClosed)
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Free queue slots right now
    pub fn available_slots(&self) -> usize {
        self.sender.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    #[tokio::test]
    async fn test_worker_count_is_clamped() {
        assert_eq!(WorkerPool::new(1, QUEUE_DEPTH).unwrap().workers(), 2);
        assert_eq!(WorkerPool::new(16, QUEUE_DEPTH).unwrap().workers(), 4);
        assert_eq!(WorkerPool::new(3, QUEUE_DEPTH).unwrap().workers(), 3);
    }

    #[test]
    fn test_requires_runtime() {
        assert_eq!(WorkerPool::new(4, QUEUE_DEPTH).err(), Some(StateError::NoRuntime));
    }

    #[tokio::test]
    async fn test_runs_submitted_jobs() {
        let pool = WorkerPool::new(MAX_WORKERS, QUEUE_DEPTH).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::channel(8);

        for _ in 0..8 {
            let done = done.clone();
            let tx = tx.clone();
            pool.submit(async move {
                done.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(()).await;
            })
            .await
            .unwrap();
        }

        for _ in 0..8 {
            rx.recv().await.unwrap();
        }
        assert_eq!(done.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_panicking_jobs_keep_workers_alive() {
        let pool = WorkerPool::new(MIN_WORKERS, QUEUE_DEPTH).unwrap();

        for _ in 0..MIN_WORKERS * 3 {
            pool.submit(async { panic!("lookup bug"); }).await.unwrap();
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio_test::assert_ok!(pool.submit(async move {
            let _ = tx.send(42);
        })
        .await);

        let value = tokio::time::timeout(Duration::from_secs(1), rx).await;
        assert_eq!(value.unwrap().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_saturated_pool_blocks_submitter() {
        let pool = WorkerPool::new(MAX_WORKERS, QUEUE_DEPTH).unwrap();
        let gate = Arc::new(Semaphore::new(0));
        let started = Arc::new(AtomicUsize::new(0));

        let blocked_job = |gate: Arc<Semaphore>, started: Arc<AtomicUsize>| async move {
            started.fetch_add(1, Ordering::SeqCst);
            let _permit = gate.acquire().await;
        };

        // Occupy every worker, then fill the queue.
        for _ in 0..MAX_WORKERS {
            pool.submit(blocked_job(gate.clone(), started.clone())).await.unwrap();
        }
        while started.load(Ordering::SeqCst) < MAX_WORKERS {
            tokio::task::yield_now().await;
        }
        for _ in 0..QUEUE_DEPTH {
            pool.submit(blocked_job(gate.clone(), started.clone())).await.unwrap();
        }
        assert_eq!(pool.available_slots(), 0);

        let overflow = pool.submit(blocked_job(gate.clone(), started.clone()));
        tokio::pin!(overflow);
        let waited = tokio::time::timeout(Duration::from_millis(50), &mut overflow).await;
        assert!(waited.is_err(), "submit should wait while the pool is saturated");

        gate.add_permits(MAX_WORKERS + QUEUE_DEPTH + 1);
        tokio_test::assert_ok!(overflow.await);
    }
}
