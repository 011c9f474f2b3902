//! Backpressure queue
//!
//! Producers hand content to [`BackpressureQueue::enqueue`], which returns at
//! once. A single producer task appends submissions to the durable log in
//! the order they were handed over; a pool of insertion workers reads the
//! log through one consumer group, persists each record in the message store
//! and then notifies the broadcaster.
//!
//! The ingestion path is best-effort: enqueue, append, decode and insert
//! failures are logged and the entry is dropped. A worker that cannot read
//! from the log exits for good; it is not restarted.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::log::{DurableLog, LogReader, StartOffset};
use crate::broker::engine::Notifier;
use crate::persistence::MessageStore;
use crate::utils::{Context, Error};

pub struct BackpressureQueue {
    ctx: Context,
    store: Arc<dyn MessageStore>,
    notifier: Arc<dyn Notifier>,
    reader: Arc<dyn LogReader>,
    writer: Mutex<Option<UnboundedSender<String>>>,
    producer: Mutex<Option<JoinHandle<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl BackpressureQueue {
    /// Consumer group used by the insertion workers unless configured otherwise.
    pub const DEFAULT_CONSUMER_GROUP: &'static str = "service-worker";

    /// Creates the queue and spawns its producer task. Must be called from
    /// within a tokio runtime.
    pub fn new(
        ctx: Context,
        log: Arc<dyn DurableLog>,
        store: Arc<dyn MessageStore>,
        notifier: Arc<dyn Notifier>,
        consumer_group: &str,
        start: StartOffset,
    ) -> crate::utils::Result<Self> {
        let reader = log.reader(consumer_group, start)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let producer = tokio::spawn(produce(log, rx));

        Ok(Self {
            ctx,
            store,
            notifier,
            reader,
            writer: Mutex::new(Some(tx)),
            producer: Mutex::new(Some(producer)),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Submits `content` for storage and fan-out. Never blocks and never
    /// reports failure; a successful return does not imply durability.
    pub fn enqueue(&self, content: &str) {
        if content.is_empty() {
            warn!("Enqueue rejected: content is required");
            return;
        }

        let writer = lock(&self.writer);
        let Some(tx) = writer.as_ref() else {
            warn!("Enqueue after shutdown, message dropped");
            return;
        };
        if tx.send(content.to_string()).is_err() {
            error!("Log producer is gone, message dropped");
        }
    }

    /// Launches `worker_count` insertion workers; `0` means one per
    /// available CPU.
    pub fn start(&self, worker_count: usize) {
        let worker_count = if worker_count == 0 {
            default_worker_count()
        } else {
            worker_count
        };

        info!(amount = worker_count, "Starting up insertion workers");

        let mut workers = lock(&self.workers);
        let first = workers.len();
        for worker_id in first..first + worker_count {
            workers.push(tokio::spawn(insertion_worker(
                worker_id,
                self.ctx.clone(),
                self.reader.clone(),
                self.store.clone(),
                self.notifier.clone(),
            )));
        }
    }

    /// Number of workers that have not exited yet.
    pub fn running_workers(&self) -> usize {
        lock(&self.workers)
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Closes the writer side (the producer drains what it was already
    /// handed), closes the log reader, then waits for every worker to exit.
    pub async fn shutdown(&self) {
        drop(lock(&self.writer).take());
        let producer = lock(&self.producer).take();
        if let Some(producer) = producer {
            if let Err(e) = producer.await {
                error!(error = %e, "Log producer task failed");
            }
        }

        self.reader.close();

        let workers = std::mem::take(&mut *lock(&self.workers));
        for handle in workers {
            if let Err(e) = handle.await {
                error!(error = %e, "Insertion worker task failed");
            }
        }
        info!("Backpressure queue shut down");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

async fn produce(log: Arc<dyn DurableLog>, mut rx: UnboundedReceiver<String>) {
    while let Some(content) = rx.recv().await {
        if let Err(e) = log.append(content.into_bytes()).await {
            error!(error = %e, "Log append failed, message dropped");
        }
    }
    debug!("Log producer stopped");
}

async fn insertion_worker(
    worker_id: usize,
    ctx: Context,
    reader: Arc<dyn LogReader>,
    store: Arc<dyn MessageStore>,
    notifier: Arc<dyn Notifier>,
) {
    loop {
        let record = match reader.read(&ctx).await {
            Ok(record) => record,
            Err(Error::Cancelled) | Err(Error::LogClosed) => {
                debug!(worker = worker_id, "Insertion worker stopped");
                return;
            }
            Err(e) => {
                error!(worker = worker_id, error = %e, "Log read failed, worker exiting");
                return;
            }
        };

        let content = match String::from_utf8(record.payload) {
            Ok(content) => content,
            Err(e) => {
                warn!(worker = worker_id, offset = record.offset, error = %e, "Skipping non-UTF-8 log record");
                continue;
            }
        };

        debug!(worker = worker_id, offset = record.offset, "Inserting log record");
        match store.insert(&content).await {
            Ok(msg) => notifier.notify(msg).await,
            Err(e) => {
                error!(
                    worker = worker_id,
                    offset = record.offset,
                    error = %e,
                    value = %content,
                    "Storage insertion failed"
                );
            }
        }
    }
}
