//! Hook delivery workers.
//!
//! A worker takes one job at a time from the shared queue, resolves the
//! job's hooks, and POSTs the payload to each of them in the order the hook
//! source returned. A failed hook is logged, counted and published as an
//! event; it never aborts the remaining hooks and never fails the job.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use hookpool_core::{
    DeliveryEvent, DeliveryFailedEvent, DeliverySucceededEvent, EventHandler, HookDescriptor,
    HookSource, Job,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    client::HttpPoster,
    error::{DeliveryError, Result},
    tracker::JobCompletion,
};

/// Receiving half of the job queue, shared by every worker in the pool.
///
/// The lock is only held while a worker waits for its next job, so an idle
/// worker is always the one that gets it.
pub(crate) type JobQueue = Arc<Mutex<mpsc::Receiver<QueuedJob>>>;

/// A job together with its share of the in-flight count.
///
/// The count is released wherever the value is dropped: after processing,
/// when discarded at shutdown, or inside the channel buffer when the queue
/// itself is torn down.
#[derive(Debug)]
pub(crate) struct QueuedJob {
    pub(crate) job: Job,
    pub(crate) completion: JobCompletion,
}

/// Counters for dispatcher monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherStats {
    /// Number of running workers.
    pub active_workers: usize,
    /// Jobs accepted by `dispatch_hook`.
    pub jobs_submitted: u64,
    /// Jobs whose hooks have all been attempted.
    pub jobs_completed: u64,
    /// Hook lookups performed, one per processed job.
    pub hook_lookups: u64,
    /// Hook deliveries answered with a status below 400.
    pub successful_deliveries: u64,
    /// Hook deliveries that timed out, failed to connect or were rejected.
    pub failed_deliveries: u64,
    /// Queued jobs thrown away at shutdown.
    pub discarded_jobs: u64,
}

/// Summary of one processed job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobReport {
    /// Hooks resolved for the job.
    pub hooks: usize,
    /// Deliveries the hooks accepted.
    pub succeeded: usize,
    /// Deliveries that failed.
    pub failed: usize,
}

/// Processes jobs end to end, one at a time.
pub struct HookWorker {
    id: usize,
    hook_source: Arc<dyn HookSource>,
    poster: Arc<dyn HttpPoster>,
    delivery_timeout: Duration,
    event_handler: Arc<dyn EventHandler>,
    stats: Arc<RwLock<DispatcherStats>>,
}

impl HookWorker {
    /// Creates a worker. The pool assigns `id` for log correlation only.
    pub fn new(
        id: usize,
        hook_source: Arc<dyn HookSource>,
        poster: Arc<dyn HttpPoster>,
        delivery_timeout: Duration,
        event_handler: Arc<dyn EventHandler>,
        stats: Arc<RwLock<DispatcherStats>>,
    ) -> Self {
        Self { id, hook_source, poster, delivery_timeout, event_handler, stats }
    }

    /// Main worker loop: pull a job, process it, mark it complete, repeat.
    ///
    /// Stops when cancelled between jobs or when the queue is closed and
    /// empty. A job already taken is always finished before the loop checks
    /// for cancellation again.
    pub(crate) async fn run(self, queue: JobQueue, cancellation_token: CancellationToken) {
        debug!(worker_id = self.id, "worker waiting for jobs");

        loop {
            let next = tokio::select! {
                biased;
                () = cancellation_token.cancelled() => None,
                job = next_job(&queue) => job,
            };

            let Some(QueuedJob { job, completion }) = next else {
                break;
            };

            self.process_job(&job).await;
            self.stats.write().await.jobs_completed += 1;
            drop(completion);
        }

        info!(worker_id = self.id, "worker stopped");
    }

    /// Resolves the job's hooks and attempts delivery to each of them.
    pub async fn process_job(&self, job: &Job) -> JobReport {
        debug!(
            worker_id = self.id,
            job_id = %job.id(),
            tenant_id = %job.tenant_id(),
            event_type = %job.event_type(),
            payload_size = job.payload().len(),
            "received job"
        );

        let hooks = self.hook_source.lookup_hooks(job.tenant_id(), job.event_type()).await;
        self.stats.write().await.hook_lookups += 1;

        let mut report = JobReport { hooks: hooks.len(), ..JobReport::default() };

        if hooks.is_empty() {
            debug!(
                worker_id = self.id,
                job_id = %job.id(),
                tenant_id = %job.tenant_id(),
                event_type = %job.event_type(),
                "no hooks registered for event"
            );
            return report;
        }

        for (index, hook) in hooks.iter().enumerate() {
            match self.deliver(job, index, hook).await {
                Ok(()) => report.succeeded += 1,
                Err(_) => report.failed += 1,
            }
        }

        debug!(
            worker_id = self.id,
            job_id = %job.id(),
            hooks = report.hooks,
            succeeded = report.succeeded,
            failed = report.failed,
            "job completed"
        );

        report
    }

    /// Delivers the job payload to one hook and records the outcome.
    async fn deliver(&self, job: &Job, index: usize, hook: &HookDescriptor) -> Result<()> {
        let span = info_span!(
            "hook_delivery",
            worker_id = self.id,
            job_id = %job.id(),
            url = %hook.url,
            hook_name = hook.name.as_deref().unwrap_or(""),
            hook_index = index
        );

        async move {
            debug!("sending webhook");

            let outcome = match self
                .poster
                .post(&hook.url, job.payload().clone(), self.delivery_timeout)
                .await
            {
                Ok(response) if response.is_success() => {
                    info!(
                        status_code = response.status_code,
                        duration_ms = response.duration.as_millis(),
                        "webhook delivered"
                    );
                    Ok(response.status_code)
                },
                Ok(response) => {
                    error!(
                        status_code = response.status_code,
                        body = %response.body,
                        "webhook rejected"
                    );
                    Err(DeliveryError::http_status(response.status_code, response.body))
                },
                Err(error) => {
                    warn!(error = %error, kind = error.kind(), "webhook request failed");
                    Err(error)
                },
            };

            self.record_outcome(job, index, hook, &outcome).await;
            outcome.map(|_| ())
        }
        .instrument(span)
        .await
    }

    async fn record_outcome(
        &self,
        job: &Job,
        index: usize,
        hook: &HookDescriptor,
        outcome: &Result<u16>,
    ) {
        {
            let mut stats = self.stats.write().await;
            match outcome {
                Ok(_) => stats.successful_deliveries += 1,
                Err(_) => stats.failed_deliveries += 1,
            }
        }

        let event = match outcome {
            Ok(status_code) => DeliveryEvent::Succeeded(DeliverySucceededEvent {
                job_id: job.id(),
                tenant_id: job.tenant_id().clone(),
                event_type: job.event_type(),
                url: hook.url.clone(),
                status_code: *status_code,
                hook_index: index,
                delivered_at: Utc::now(),
                payload_size: job.payload().len(),
            }),
            Err(error) => DeliveryEvent::Failed(DeliveryFailedEvent {
                job_id: job.id(),
                tenant_id: job.tenant_id().clone(),
                event_type: job.event_type(),
                url: hook.url.clone(),
                status_code: error.status_code(),
                hook_index: index,
                failed_at: Utc::now(),
                error_message: error.to_string(),
            }),
        };

        self.event_handler.handle_event(event).await;
    }
}

async fn next_job(queue: &JobQueue) -> Option<QueuedJob> {
    queue.lock().await.recv().await
}
