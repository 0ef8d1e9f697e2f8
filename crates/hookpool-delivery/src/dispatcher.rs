//! Bounded job queue and fixed worker pool.
//!
//! `Dispatcher::start` allocates one bounded queue and spawns the configured
//! number of workers, all pulling from it. Producers submit through
//! `dispatch_hook`, which suspends while the queue is full rather than
//! dropping the job, and can await `wait` to block until every accepted job
//! has been processed.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use hookpool_core::{EventHandler, EventType, HookSource, Job, JobId, NoOpEventHandler, TenantId};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{mpsc, Mutex, RwLock},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::{ClientConfig, DeliveryClient, HttpPoster},
    error::{DeliveryError, DispatchError},
    tracker::InFlightTracker,
    worker::{DispatcherStats, HookWorker, JobQueue, QueuedJob},
};

/// Configuration for the dispatcher and its worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Number of workers, fixed for the lifetime of the dispatcher.
    pub worker_count: usize,

    /// Capacity of the job queue; producers suspend once it is full.
    pub buffer_size: usize,

    /// HTTP client configuration, including the per-delivery timeout.
    pub client_config: ClientConfig,

    /// Maximum time `shutdown` waits for workers to finish their current job.
    pub shutdown_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_WORKER_COUNT,
            buffer_size: crate::DEFAULT_BUFFER_SIZE,
            client_config: ClientConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl DispatcherConfig {
    /// Checks the pool dimensions.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` for an empty pool, a
    /// zero-capacity queue or a zero delivery timeout.
    pub fn validate(&self) -> Result<(), DeliveryError> {
        if self.worker_count == 0 {
            return Err(DeliveryError::configuration("worker_count must be greater than 0"));
        }
        if self.buffer_size == 0 {
            return Err(DeliveryError::configuration("buffer_size must be greater than 0"));
        }
        if self.client_config.timeout.is_zero() {
            return Err(DeliveryError::configuration("delivery timeout must be greater than 0"));
        }
        Ok(())
    }
}

/// Cloneable submission handle for producers.
///
/// Handles keep working for as long as the dispatcher that created them is
/// running; after `Dispatcher::shutdown` every submission fails with
/// `DispatchError::ShutDown`.
#[derive(Debug, Clone)]
pub struct DispatchHandle {
    sender: mpsc::Sender<QueuedJob>,
    tracker: InFlightTracker,
    stats: Arc<RwLock<DispatcherStats>>,
}

impl DispatchHandle {
    /// Serializes `payload` as JSON and enqueues one job for
    /// `(tenant_id, event_type)`; the worker that takes it delivers to every
    /// hook registered for that pair.
    ///
    /// Suspends while the queue is full. Delivery outcomes are never
    /// reported back; the returned `JobId` only correlates log lines.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Serialization` if `payload` cannot be encoded,
    /// in which case nothing is enqueued, and `DispatchError::ShutDown` once
    /// the dispatcher has been shut down.
    pub async fn dispatch_hook<T>(
        &self,
        tenant_id: impl Into<TenantId>,
        event_type: impl Into<EventType>,
        payload: &T,
    ) -> Result<JobId, DispatchError>
    where
        T: Serialize + ?Sized,
    {
        let tenant_id = tenant_id.into();
        let event_type = event_type.into();

        let payload = serde_json::to_vec(payload).map_err(|e| {
            error!(
                tenant_id = %tenant_id,
                event_type = %event_type,
                error = %e,
                "failed to serialize hook payload"
            );
            DispatchError::from(e)
        })?;

        self.dispatch_bytes(tenant_id, event_type, payload).await
    }

    /// Enqueues an already serialized payload.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::ShutDown` once the dispatcher has been shut
    /// down.
    pub async fn dispatch_bytes(
        &self,
        tenant_id: impl Into<TenantId>,
        event_type: impl Into<EventType>,
        payload: impl Into<Bytes>,
    ) -> Result<JobId, DispatchError> {
        let job = Job::new(tenant_id.into(), event_type.into(), payload);
        let job_id = job.id();

        // Nothing is counted until a slot is held, so dropping this future
        // while it waits on a full queue leaves the in-flight count intact.
        let Ok(permit) = self.sender.reserve().await else {
            warn!(
                job_id = %job_id,
                tenant_id = %job.tenant_id(),
                event_type = %job.event_type(),
                "hook dispatched after shutdown, dropping"
            );
            return Err(DispatchError::ShutDown);
        };

        let mut stats = self.stats.write().await;
        // No await from here on: counting and enqueueing happen together.
        stats.jobs_submitted += 1;
        let completion = self.tracker.track();
        permit.send(QueuedJob { job, completion });
        drop(stats);

        debug!(job_id = %job_id, "job enqueued");
        Ok(job_id)
    }

    /// Suspends until every accepted job has been processed.
    ///
    /// Meant for graceful shutdown sequencing and tests, not for request
    /// handling.
    pub async fn wait(&self) {
        self.tracker.wait_idle().await;
    }

    /// Number of jobs queued or being processed.
    pub fn in_flight(&self) -> usize {
        self.tracker.in_flight()
    }
}

/// Owner of the job queue and the worker pool.
///
/// There is no unstarted dispatcher: constructing one spawns the pool, so a
/// job can never be submitted to a pool that is not running and a pool can
/// never be started twice.
pub struct Dispatcher {
    handle: DispatchHandle,
    queue: JobQueue,
    config: DispatcherConfig,
    stats: Arc<RwLock<DispatcherStats>>,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Starts a dispatcher that delivers through a `DeliveryClient` built
    /// from `config.client_config`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn start(
        config: DispatcherConfig,
        hook_source: Arc<dyn HookSource>,
    ) -> Result<Self, DispatchError> {
        let client = DeliveryClient::new(config.client_config.clone())?;
        Self::with_poster(config, hook_source, Arc::new(client))
    }

    /// Starts a dispatcher that delivers through `poster`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_poster(
        config: DispatcherConfig,
        hook_source: Arc<dyn HookSource>,
        poster: Arc<dyn HttpPoster>,
    ) -> Result<Self, DispatchError> {
        Self::with_event_handler(config, hook_source, poster, Arc::new(NoOpEventHandler::new()))
    }

    /// Starts a dispatcher that also publishes every delivery outcome to
    /// `event_handler`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_event_handler(
        config: DispatcherConfig,
        hook_source: Arc<dyn HookSource>,
        poster: Arc<dyn HttpPoster>,
        event_handler: Arc<dyn EventHandler>,
    ) -> Result<Self, DispatchError> {
        config.validate()?;

        info!(
            worker_count = config.worker_count,
            buffer_size = config.buffer_size,
            timeout_ms = config.client_config.timeout.as_millis(),
            "starting hook dispatcher"
        );

        let (sender, receiver) = mpsc::channel(config.buffer_size);
        let queue: JobQueue = Arc::new(Mutex::new(receiver));
        let tracker = InFlightTracker::new();
        let stats = Arc::new(RwLock::new(DispatcherStats {
            active_workers: config.worker_count,
            ..DispatcherStats::default()
        }));
        let cancellation_token = CancellationToken::new();

        let worker_handles = (0..config.worker_count)
            .map(|worker_id| {
                let worker = HookWorker::new(
                    worker_id,
                    hook_source.clone(),
                    poster.clone(),
                    config.client_config.timeout,
                    event_handler.clone(),
                    stats.clone(),
                );
                tokio::spawn(worker.run(queue.clone(), cancellation_token.clone()))
            })
            .collect();

        let handle = DispatchHandle { sender, tracker, stats: stats.clone() };

        Ok(Self { handle, queue, config, stats, cancellation_token, worker_handles })
    }

    /// Returns a cloneable submission handle.
    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    /// See [`DispatchHandle::dispatch_hook`].
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Serialization` if `payload` cannot be encoded.
    pub async fn dispatch_hook<T>(
        &self,
        tenant_id: impl Into<TenantId>,
        event_type: impl Into<EventType>,
        payload: &T,
    ) -> Result<JobId, DispatchError>
    where
        T: Serialize + ?Sized,
    {
        self.handle.dispatch_hook(tenant_id, event_type, payload).await
    }

    /// See [`DispatchHandle::dispatch_bytes`].
    ///
    /// # Errors
    ///
    /// Never fails while the dispatcher is alive.
    pub async fn dispatch_bytes(
        &self,
        tenant_id: impl Into<TenantId>,
        event_type: impl Into<EventType>,
        payload: impl Into<Bytes>,
    ) -> Result<JobId, DispatchError> {
        self.handle.dispatch_bytes(tenant_id, event_type, payload).await
    }

    /// See [`DispatchHandle::wait`].
    pub async fn wait(&self) {
        self.handle.wait().await;
    }

    /// Number of jobs queued or being processed.
    pub fn in_flight(&self) -> usize {
        self.handle.in_flight()
    }

    /// Snapshot of the dispatcher counters.
    pub async fn stats(&self) -> DispatcherStats {
        self.stats.read().await.clone()
    }

    /// Configuration the pool was started with.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Stops the pool.
    ///
    /// Workers finish the job they are processing and then exit; jobs still
    /// queued are discarded and no longer count as in flight. Call `wait`
    /// first to drain the queue instead.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::ShutdownTimeout` if a worker is still
    /// delivering once `config.shutdown_timeout` has elapsed.
    pub async fn shutdown(mut self) -> Result<(), DispatchError> {
        let timeout = self.config.shutdown_timeout;
        info!(
            worker_count = self.worker_handles.len(),
            timeout_ms = timeout.as_millis(),
            in_flight = self.in_flight(),
            "shutting down hook dispatcher"
        );

        self.cancellation_token.cancel();

        let handles = std::mem::take(&mut self.worker_handles);
        let joined = tokio::time::timeout(timeout, async {
            for (worker_id, handle) in handles.into_iter().enumerate() {
                if let Err(join_error) = handle.await {
                    error!(worker_id, error = %join_error, "worker task panicked");
                }
            }
        })
        .await;

        let discarded = self.discard_queued_jobs().await;

        {
            let mut stats = self.stats.write().await;
            stats.active_workers = 0;
            stats.discarded_jobs += discarded;
        }

        if discarded > 0 {
            warn!(discarded_jobs = discarded, "queued jobs discarded at shutdown");
        }

        match joined {
            Ok(()) => {
                info!("hook dispatcher stopped");
                Ok(())
            },
            Err(_elapsed) => {
                error!(
                    timeout_ms = timeout.as_millis(),
                    "worker shutdown timed out, some deliveries may still be running"
                );
                Err(DispatchError::ShutdownTimeout { timeout })
            },
        }
    }

    /// Closes the queue and releases the in-flight count of every job left
    /// in it.
    async fn discard_queued_jobs(&self) -> u64 {
        let mut receiver = self.queue.lock().await;
        drain_closed(&mut receiver)
    }
}

/// Closes `receiver` and drops every job still buffered in it.
fn drain_closed(receiver: &mut mpsc::Receiver<QueuedJob>) -> u64 {
    receiver.close();

    let mut discarded = 0;
    while let Ok(queued) = receiver.try_recv() {
        debug!(job_id = %queued.job.id(), "discarding queued job");
        discarded += 1;
    }
    discarded
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if !self.worker_handles.is_empty() && !self.cancellation_token.is_cancelled() {
            warn!(
                worker_count = self.worker_handles.len(),
                "Dispatcher dropped without shutdown(), cancelling workers"
            );
            self.cancellation_token.cancel();
        }

        // A worker parked on the queue holds the lock until it sees the
        // cancellation. Jobs left behind then go when the receiver is dropped
        // with the last worker, since each carries its own completion guard.
        if let Ok(mut receiver) = self.queue.try_lock() {
            let discarded = drain_closed(&mut receiver);
            if discarded > 0 {
                warn!(discarded_jobs = discarded, "queued jobs discarded on drop");
            }
        }
    }
}
