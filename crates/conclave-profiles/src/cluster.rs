//! A fixed set of serial work queues.
//!
//! Jobs are handed to the queues round-robin. Each queue runs one job at a
//! time, so the cluster bounds parallelism at the number of queues while a
//! slow job only delays the jobs behind it on the same queue.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{mpsc, oneshot};
use tracing::trace;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// The queue a job was sent to stopped before answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

/// Round-robin cluster of serial queues.
#[derive(Debug)]
pub struct QueueCluster {
    queues: Vec<mpsc::UnboundedSender<Job>>,
    next: AtomicUsize,
}

impl QueueCluster {
    /// Spawn `count` workers on the current tokio runtime (at least one).
    pub fn new(count: usize) -> Self {
        let queues = (0..count.max(1))
            .map(|index| {
                let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
                tokio::spawn(async move {
                    while let Some(job) = rx.recv().await {
                        job.await;
                    }
                    trace!("profile fetch queue {} stopped", index);
                });
                tx
            })
            .collect();

        Self {
            queues,
            next: AtomicUsize::new(0),
        }
    }

    /// Number of queues.
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    /// Always false, a cluster has at least one queue.
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Index of the queue that receives the next job.
    fn pick(&self) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % self.queues.len()
    }

    /// Run `job` on the next queue and wait for its output.
    pub async fn run<F, T>(&self, job: F) -> Result<T, QueueClosed>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let wrapped: Job = Box::pin(async move {
            let _ = tx.send(job.await);
        });

        let index = self.pick();
        self.queues[index].send(wrapped).map_err(|_| QueueClosed)?;
        rx.await.map_err(|_| QueueClosed)
    }
}
