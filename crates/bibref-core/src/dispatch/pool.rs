//! Fixed-size worker pool fed through a bounded queue.

use crate::config::FetchConfig;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

/// `size` workers draining a queue of capacity `size * QUEUE_FACTOR`.
///
/// At most `size` jobs run at once; pushing into a full queue waits.
pub struct WorkersPool<T> {
    sender: mpsc::Sender<T>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> WorkersPool<T> {
    /// Spawn the workers on the current tokio runtime.
    pub fn new<F, Fut>(num_workers: usize, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let size = num_workers.max(1);
        let (sender, receiver) = mpsc::channel(size * FetchConfig::QUEUE_FACTOR);
        let receiver = Arc::new(Mutex::new(receiver));
        let handler = Arc::new(handler);

        let workers = (0..size)
            .map(|n| {
                let receiver = receiver.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    loop {
                        let job = receiver.lock().await.recv().await;
                        match job {
                            Some(job) => handler(job).await,
                            None => break,
                        }
                    }
                    debug!("Worker {} stopped", n);
                })
            })
            .collect();

        Self { sender, workers }
    }

    /// Enqueue a job, waiting while the queue is full.
    ///
    /// Hands the job back if every worker has stopped.
    pub async fn push(&self, job: T) -> std::result::Result<(), T> {
        self.sender.send(job).await.map_err(|e| e.0)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Close the queue and wait for queued jobs to finish.
    pub async fn end(self) {
        drop(self.sender);
        join_all(self.workers).await;
    }
}
