//! Asynchronous fetches, one queue and worker pool per backend.
//!
//! The queue, its dispatcher task and the pool are created on the first
//! request for a backend and live as long as the runtime. The submission
//! queue holds `workers * QUEUE_FACTOR` jobs; submitting into a full queue
//! waits.

use super::pool::WorkersPool;
use crate::config::FetchConfig;
use crate::db::Db;
use crate::error::Result;
use crate::identifier::normalize;
use crate::models::{BibliographicItem, FetchOptions};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Receives the outcome of an asynchronous fetch.
pub type FetchCallback = Box<dyn FnOnce(Result<Option<BibliographicItem>>) + Send>;

pub(crate) struct FetchJob {
    reference: String,
    year: Option<String>,
    opts: FetchOptions,
    callback: FetchCallback,
}

/// Submission queues keyed by processor short name.
#[derive(Default)]
pub(crate) struct FetchQueues {
    senders: Mutex<HashMap<String, mpsc::Sender<FetchJob>>>,
}

impl FetchQueues {
    fn sender_for(
        &self,
        db: &Arc<Db>,
        short: &str,
        threads: usize,
    ) -> mpsc::Sender<FetchJob> {
        let mut senders = self
            .senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(sender) = senders.get(short).filter(|s| !s.is_closed()) {
            return sender.clone();
        }
        let workers = db.settings.fetch_parallel.unwrap_or(threads);
        let sender = spawn_queue(Arc::downgrade(db), short.to_string(), workers);
        senders.insert(short.to_string(), sender.clone());
        sender
    }
}

fn spawn_queue(db: Weak<Db>, short: String, workers: usize) -> mpsc::Sender<FetchJob> {
    let workers = workers.max(1);
    let (sender, mut receiver) = mpsc::channel::<FetchJob>(workers * FetchConfig::QUEUE_FACTOR);
    let pool = WorkersPool::new(workers, move |job: FetchJob| {
        let db = db.clone();
        async move { run_job(db, job).await }
    });
    debug!("Started {} fetch workers for {}", pool.size(), short);

    tokio::spawn(async move {
        while let Some(job) = receiver.recv().await {
            if let Err(job) = pool.push(job).await {
                (job.callback)(Ok(None));
                break;
            }
        }
        pool.end().await;
        debug!("Fetch queue for {} closed", short);
    });
    sender
}

async fn run_job(db: Weak<Db>, job: FetchJob) {
    let FetchJob {
        reference,
        year,
        opts,
        callback,
    } = job;
    let db = match db.upgrade() {
        Some(db) => db,
        None => return callback(Ok(None)),
    };
    match db.fetch_inner(&reference, year.as_deref(), &opts).await {
        Ok(item) => callback(Ok(item)),
        Err(e) if e.is_transient() => callback(Err(e)),
        Err(e) => {
            error!("({}) {}", reference, e);
            callback(Ok(None));
        }
    }
}

impl Db {
    /// Queue a fetch on the matching backend's worker pool.
    ///
    /// Resolves once the job is admitted to the backend's queue, waiting
    /// while it is full. `callback` runs on a worker once the fetch
    /// completes, in completion order. Transient request failures reach it
    /// as `Err`; other failures are logged and delivered as `Ok(None)`.
    /// When no backend matches, `callback(Ok(None))` runs before the first
    /// await point.
    pub async fn fetch_async<F>(
        self: &Arc<Self>,
        reference: &str,
        year: Option<&str>,
        opts: FetchOptions,
        callback: F,
    ) where
        F: FnOnce(Result<Option<BibliographicItem>>) + Send + 'static,
    {
        let reference = normalize(reference);
        let processor = match self.registry.processor_by_ref(reference) {
            Some(p) => p,
            None => return callback(Ok(None)),
        };

        let sender = self
            .queues
            .sender_for(self, processor.short(), processor.threads());
        let job = FetchJob {
            reference: reference.to_string(),
            year: year.map(str::to_string),
            opts,
            callback: Box::new(callback),
        };
        if let Err(rejected) = sender.send(job).await {
            (rejected.0.callback)(Ok(None));
        }
    }
}
