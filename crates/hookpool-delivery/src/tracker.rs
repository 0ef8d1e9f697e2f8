//! In-flight job counter with a completion barrier.
//!
//! Every accepted job increments the counter once at submission and
//! decrements it once when its worker is done with it. Updates go through a
//! `watch` channel so they are serialized, and `wait_idle` wakes as soon as
//! the counter reaches zero instead of polling.

use std::sync::Arc;

use tokio::sync::watch;

/// Shared count of jobs accepted but not yet fully processed.
#[derive(Debug, Clone)]
pub struct InFlightTracker {
    count: Arc<watch::Sender<usize>>,
}

impl InFlightTracker {
    /// Creates a tracker with no jobs in flight.
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self { count: Arc::new(count) }
    }

    /// Records an accepted job.
    pub fn start_job(&self) {
        self.count.send_modify(|count| *count += 1);
    }

    /// Records a finished (or discarded) job.
    pub fn finish_job(&self) {
        self.count.send_modify(|count| {
            debug_assert!(*count > 0, "in-flight counter underflow");
            *count = count.saturating_sub(1);
        });
    }

    /// Returns a guard that calls `finish_job` when dropped, including when
    /// the owning task unwinds.
    pub fn completion(&self) -> JobCompletion {
        JobCompletion { tracker: self.clone() }
    }

    /// Records an accepted job and returns the guard that releases it.
    pub fn track(&self) -> JobCompletion {
        self.start_job();
        self.completion()
    }

    /// Current number of jobs in flight.
    pub fn in_flight(&self) -> usize {
        *self.count.borrow()
    }

    /// Suspends until no job is queued or being processed.
    pub async fn wait_idle(&self) {
        let mut receiver = self.count.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = receiver.wait_for(|count| *count == 0).await;
    }
}

impl Default for InFlightTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counter exactly once, on drop.
#[derive(Debug)]
#[must_use = "dropping the guard immediately marks the job as finished"]
pub struct JobCompletion {
    tracker: InFlightTracker,
}

impl Drop for JobCompletion {
    fn drop(&mut self) {
        self.tracker.finish_job();
    }
}
