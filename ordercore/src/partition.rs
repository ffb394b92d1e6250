//! Keyed worker pool.
//!
//! Messages are routed to one of N workers by hash of their partition key.
//! Each worker drains its own queue sequentially, so messages sharing a key
//! are handled one at a time in submission order while different keys run
//! concurrently. This is how writes to a single order are serialized; the
//! aggregate itself holds no lock.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::{QueueCapacity, WorkerCount};

/// Failures of the pool itself, not of the handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    /// The pool is shutting down.
    #[error("executor is shut down")]
    Closed,
    /// The message got no answer: its handler panicked, or the worker is gone.
    #[error("worker {0} dropped the message")]
    WorkerLost(usize),
}

struct Job<M, R> {
    message: M,
    reply: oneshot::Sender<R>,
}

/// A pending result from [`PartitionedExecutor::dispatch`].
pub struct Ticket<R> {
    worker: usize,
    receiver: oneshot::Receiver<R>,
}

impl<R> Ticket<R> {
    /// Waits for the handler's result.
    pub async fn outcome(self) -> Result<R, ExecutorError> {
        self.receiver
            .await
            .map_err(|_| ExecutorError::WorkerLost(self.worker))
    }
}

/// N single-consumer queues with hash routing.
pub struct PartitionedExecutor<M, R> {
    senders: Vec<mpsc::Sender<Job<M, R>>>,
    workers: Vec<JoinHandle<()>>,
}

impl<M, R> PartitionedExecutor<M, R>
where
    M: Send + 'static,
    R: Send + 'static,
{
    /// Spawns the workers on the current tokio runtime.
    pub fn spawn<H, Fut>(workers: WorkerCount, capacity: QueueCapacity, handler: H) -> Self
    where
        H: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let count: usize = workers.into();
        let capacity: usize = capacity.into();
        let handler = Arc::new(handler);

        let mut senders = Vec::with_capacity(count);
        let mut handles = Vec::with_capacity(count);
        for index in 0..count {
            let (sender, mut receiver) = mpsc::channel::<Job<M, R>>(capacity);
            let handler = Arc::clone(&handler);
            handles.push(tokio::spawn(async move {
                while let Some(Job { message, reply }) = receiver.recv().await {
                    // A panicking handler loses its own message, not the worker.
                    match AssertUnwindSafe(async { handler(message).await })
                        .catch_unwind()
                        .await
                    {
                        Ok(result) => {
                            if reply.send(result).is_err() {
                                debug!(worker = index, "caller stopped waiting for result");
                            }
                        }
                        Err(_) => error!(worker = index, "handler panicked, message dropped"),
                    }
                }
                debug!(worker = index, "partition worker stopped");
            }));
            senders.push(sender);
        }

        Self {
            senders,
            workers: handles,
        }
    }

    /// Number of workers.
    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    /// The worker that handles `key`. Stable for the lifetime of the pool.
    #[allow(clippy::cast_possible_truncation)]
    pub fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.senders.len() as u64) as usize
    }

    /// Enqueues `message` on the worker for `key` without waiting for it to
    /// be handled. Waits only if that worker's queue is full.
    pub async fn dispatch(&self, key: &str, message: M) -> Result<Ticket<R>, ExecutorError> {
        let worker = self.partition_for(key);
        let (reply, receiver) = oneshot::channel();
        self.senders[worker]
            .send(Job { message, reply })
            .await
            .map_err(|_| ExecutorError::Closed)?;
        Ok(Ticket { worker, receiver })
    }

    /// Enqueues `message` and waits for the handler's result.
    pub async fn submit(&self, key: &str, message: M) -> Result<R, ExecutorError> {
        self.dispatch(key, message).await?.outcome().await
    }

    /// Closes all queues, lets workers drain what is already queued, and
    /// waits for them to stop.
    pub async fn shutdown(self) {
        drop(self.senders);
        for (index, worker) in self.workers.into_iter().enumerate() {
            if let Err(error) = worker.await {
                warn!(worker = index, error = %error, "partition worker ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn pool<M, R, H, Fut>(workers: usize, handler: H) -> PartitionedExecutor<M, R>
    where
        M: Send + 'static,
        R: Send + 'static,
        H: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        PartitionedExecutor::spawn(
            WorkerCount::try_new(workers).unwrap(),
            QueueCapacity::try_new(64).unwrap(),
            handler,
        )
    }

    #[tokio::test]
    async fn submit_returns_handler_result() {
        let executor = pool(2, |n: u32| async move { n * 2 });
        assert_eq!(executor.submit("a", 21).await.unwrap(), 42);
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn same_key_is_handled_in_submission_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let executor = pool(4, move |n: u64| {
            let recorder = Arc::clone(&recorder);
            async move {
                // Later messages finish faster; order must still hold.
                tokio::time::sleep(Duration::from_millis(10 - n.min(10))).await;
                recorder.lock().push(n);
            }
        });

        let mut tickets = Vec::new();
        for n in 0..10 {
            tickets.push(executor.dispatch("order-1", n).await.unwrap());
        }
        for ticket in tickets {
            ticket.outcome().await.unwrap();
        }

        assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn routing_is_stable_and_in_range() {
        let executor = pool(3, |(): ()| async {});
        for key in ["a", "b", "order-42", ""] {
            let first = executor.partition_for(key);
            assert!(first < executor.worker_count());
            assert_eq!(first, executor.partition_for(key));
        }
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn worker_survives_a_panicking_handler() {
        let executor = pool(1, |n: u32| async move {
            assert!(n != 0, "cannot handle zero");
            n + 1
        });

        assert_eq!(executor.submit("k", 0).await, Err(ExecutorError::WorkerLost(0)));
        assert_eq!(executor.submit("k", 1).await, Ok(2));
        assert_eq!(executor.submit("other", 2).await, Ok(3));
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_drains_queued_messages() {
        let count = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&count);
        let executor = pool(1, move |(): ()| {
            let counter = Arc::clone(&counter);
            async move {
                *counter.lock() += 1;
            }
        });

        for _ in 0..5 {
            let _ticket = executor.dispatch("k", ()).await.unwrap();
        }
        executor.shutdown().await;
        assert_eq!(*count.lock(), 5);
    }
}
