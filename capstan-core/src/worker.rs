//! The consumer side: a Worker polls one Queue, leases jobs, runs the
//! caller's processor with bounded retries, and finalises each lease.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::client::Client;
use crate::config::WorkerOptions;
use crate::error::{MaxRetriesError, QueueError};
use crate::events::{EventChannel, PairEventChannel};
use crate::pool::Pool;
use crate::queue::Queue;
use crate::retry::retry;
use crate::types::{Job, JobState};

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(0);

/// The caller-supplied job handler, boxed so workers can hold any async
/// closure. Retried attempts each receive their own clone of the job.
type JobProcessor<J> = dyn Fn(Job<J>) -> BoxFuture<'static, Result<(), anyhow::Error>> + Send + Sync;

pub(crate) struct WorkerEventChannels<J> {
    pub waiting: EventChannel<()>,
    pub activated: EventChannel<Job<J>>,
    pub completed: EventChannel<Job<J>>,
    pub failed: PairEventChannel<Job<J>, MaxRetriesError>,
}

impl<J> Default for WorkerEventChannels<J> {
    fn default() -> Self {
        Self {
            waiting: EventChannel::default(),
            activated: EventChannel::default(),
            completed: EventChannel::default(),
            failed: PairEventChannel::default(),
        }
    }
}

/// What one pass of the polling loop did.
enum CycleOutcome {
    /// A job was leased and driven to a terminal state.
    Processed,
    /// No waiting job was available.
    Empty,
}

/// A process-local consumer attached to one Queue.
///
/// Each Worker owns a private pool built from the queue's config, so worker
/// connection demand cannot starve enqueuers sharing the queue's pool. The
/// polling loop is a single cooperative task: it reads the running flag
/// between cycles and suspends only at sleeps and driver I/O.
pub struct Worker<J> {
    id: u64,
    queue: Weak<Queue<J>>,
    queue_name: String,
    pool: Pool,
    processor: Arc<JobProcessor<J>>,
    options: WorkerOptions,
    running: AtomicBool,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    /// Handle to ourselves, so `start` can hand an owned Arc to the loop task.
    self_ref: Weak<Worker<J>>,
    events: WorkerEventChannels<J>,
}

impl<J> Worker<J>
where
    J: Serialize + DeserializeOwned + Clone + Send + Sync + Unpin + 'static,
{
    /// Build a worker for `queue`, register it, and (by default) start it if
    /// the queue is running.
    pub fn create<F, Fut>(
        queue: &Arc<Queue<J>>,
        processor: F,
        options: WorkerOptions,
    ) -> Result<Arc<Self>, QueueError>
    where
        F: Fn(Job<J>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        let pool = queue.pool().sibling()?;
        let processor: Arc<JobProcessor<J>> = Arc::new(move |job| Box::pin(processor(job)));

        let worker = Arc::new_cyclic(|self_ref| Self {
            id: NEXT_WORKER_ID.fetch_add(1, Ordering::SeqCst),
            queue: Arc::downgrade(queue),
            queue_name: queue.name().to_owned(),
            pool,
            processor,
            options,
            running: AtomicBool::new(false),
            loop_handle: Mutex::new(None),
            self_ref: self_ref.clone(),
            events: WorkerEventChannels::default(),
        });

        queue.register_worker(worker.clone());
        if options.autostart && queue.is_running() {
            worker.start();
        }

        Ok(worker)
    }

    /// Launch the polling loop. Does nothing when the queue is not running
    /// (workers cannot outrun their queue) or when already started.
    pub fn start(&self) {
        let Some(queue) = self.queue.upgrade() else {
            return;
        };
        if !queue.is_running() {
            return;
        }
        let Some(worker) = self.self_ref.upgrade() else {
            return;
        };
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::debug!(queue = %self.queue_name, worker = self.id, "starting worker loop");
        let handle = tokio::spawn(worker.run_loop());
        *self.loop_handle.lock().unwrap() = Some(handle);
    }

    /// Ask the loop to exit and wait for it. The flag is observed between
    /// cycles, so this can take up to one `waiting_interval`. Idempotent.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);

        let handle = self.loop_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.await.is_err() {
                tracing::error!(worker = self.id, "worker loop task panicked before joining");
            }
        }
    }

    /// Stop, close the worker's pool, and detach from the queue.
    pub async fn close(&self) {
        self.stop().await;
        self.pool.close().await;
        if let Some(queue) = self.queue.upgrade() {
            queue.deregister_worker(self.id);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Fires when a poll found no waiting job. Per-worker only; queues have
    /// no waiting channel.
    pub fn on_waiting(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.events.waiting.subscribe(move |()| handler());
    }

    pub fn on_activated(&self, handler: impl Fn(&Job<J>) + Send + Sync + 'static) {
        self.events.activated.subscribe(handler);
    }

    pub fn on_completed(&self, handler: impl Fn(&Job<J>) + Send + Sync + 'static) {
        self.events.completed.subscribe(handler);
    }

    pub fn on_failed(&self, handler: impl Fn(&Job<J>, &MaxRetriesError) + Send + Sync + 'static) {
        self.events.failed.subscribe(handler);
    }

    async fn run_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            tokio::time::sleep(self.options.processing_interval).await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            match self.run_cycle().await {
                Ok(CycleOutcome::Processed) => {}
                Ok(CycleOutcome::Empty) => {
                    self.events.waiting.emit(&());
                    tokio::time::sleep(self.options.waiting_interval).await;
                }
                Err(error) => {
                    tracing::error!(
                        queue = %self.queue_name,
                        worker = self.id,
                        "worker cycle failed: {}",
                        error
                    );
                    let labels = [("queue", self.queue_name.clone())];
                    metrics::counter!("capstan_worker_errors", &labels).increment(1);
                    if let Some(queue) = self.queue.upgrade() {
                        queue.emit_error(error);
                    }
                    tokio::time::sleep(self.options.waiting_interval).await;
                }
            }
        }
    }

    async fn run_cycle(&self) -> Result<CycleOutcome, QueueError> {
        let mut client = self.pool.get_client(&self.queue_name).await?;
        let outcome = self.lease_and_process(&mut client).await;
        client.release();
        outcome
    }

    async fn lease_and_process(&self, client: &mut Client) -> Result<CycleOutcome, QueueError> {
        let Some(job) = client.acquire_job::<J>().await? else {
            return Ok(CycleOutcome::Empty);
        };

        let labels = [("queue", self.queue_name.clone())];
        metrics::counter!("capstan_jobs_dequeued", &labels).increment(1);

        self.events.activated.emit(&job);
        if let Some(queue) = self.queue.upgrade() {
            queue.events.activated.emit(&job);
        }

        let processor = self.processor.as_ref();
        let outcome = retry(
            || processor(job.clone()),
            self.options.max_retries,
            self.options.retry_interval,
        )
        .await;

        match outcome {
            Ok(()) => {
                let completed = client
                    .update_job_state_by_id::<J>(job.id, JobState::Completed, None)
                    .await?;
                metrics::counter!("capstan_jobs_completed", &labels).increment(1);
                self.events.completed.emit(&completed);
                if let Some(queue) = self.queue.upgrade() {
                    queue.events.completed.emit(&completed);
                }
            }
            Err(error) => {
                let message = error.to_string();
                let failed = client
                    .update_job_state_by_id::<J>(job.id, JobState::Failed, Some(&message))
                    .await?;
                metrics::counter!("capstan_jobs_failed", &labels).increment(1);
                self.events.failed.emit(&failed, &error);
                if let Some(queue) = self.queue.upgrade() {
                    queue.events.failed.emit(&failed, &error);
                }
            }
        }

        Ok(CycleOutcome::Processed)
    }
}
