//! In-process fakes for the dispatcher's external collaborators.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use hookpool_core::{DeliveryEvent, EventHandler, EventType, HookDescriptor, HookSource, TenantId};
use hookpool_delivery::{DeliveryError, HttpPoster, PostResponse};
use tokio::sync::{Notify, Semaphore};

/// Scripted answer for one URL.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Respond with this status.
    Status(u16),
    /// Respond with this status after a delay.
    Delayed(u16, Duration),
    /// Fail with `DeliveryError::Timeout` after the delivery timeout.
    Timeout,
    /// Fail immediately with `DeliveryError::NetworkError`.
    Unreachable,
}

/// One observed POST.
#[derive(Debug, Clone)]
pub struct PostCall {
    /// Target URL.
    pub url: String,
    /// Posted body.
    pub body: Bytes,
    /// When the call started.
    pub started_at: Instant,
    /// When the call returned.
    pub finished_at: Instant,
}

/// `HttpPoster` that answers from a script and records every call.
///
/// Unscripted URLs answer `200`. With `gated()`, every call blocks until a
/// permit is released with `release`, which lets tests hold workers busy.
#[derive(Debug, Default)]
pub struct RecordingPoster {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<PostCall>>,
    in_progress: AtomicUsize,
    max_in_progress: AtomicUsize,
    started: Notify,
    gate: Option<Semaphore>,
}

impl RecordingPoster {
    /// Creates a poster that answers `200` to everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a poster whose calls block until `release` is called.
    pub fn gated() -> Self {
        Self { gate: Some(Semaphore::new(0)), ..Self::default() }
    }

    /// Scripts the answer for `url`.
    #[must_use]
    pub fn reply(self, url: impl Into<String>, reply: Reply) -> Self {
        self.replies.lock().unwrap_or_else(|e| e.into_inner()).insert(url.into(), reply);
        self
    }

    /// Lets `calls` more gated calls proceed.
    pub fn release(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    /// Completed calls in the order they finished.
    pub fn calls(&self) -> Vec<PostCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// URLs of completed calls in the order they finished.
    pub fn urls(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.url).collect()
    }

    /// Number of calls currently between start and return.
    pub fn in_progress(&self) -> usize {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed in progress at the same time.
    pub fn max_in_progress(&self) -> usize {
        self.max_in_progress.load(Ordering::SeqCst)
    }

    /// Waits until at least `count` calls are in progress at once.
    pub async fn wait_for_in_progress(&self, count: usize) {
        loop {
            let started = self.started.notified();
            if self.in_progress() >= count {
                return;
            }
            started.await;
        }
    }

    fn scripted(&self, url: &str) -> Reply {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(url)
            .cloned()
            .unwrap_or(Reply::Status(200))
    }
}

#[async_trait::async_trait]
impl HttpPoster for RecordingPoster {
    async fn post(
        &self,
        url: &str,
        body: Bytes,
        timeout: Duration,
    ) -> Result<PostResponse, DeliveryError> {
        let started_at = Instant::now();
        let now_in_progress = self.in_progress.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_progress.fetch_max(now_in_progress, Ordering::SeqCst);
        self.started.notify_waiters();

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let result = match self.scripted(url) {
            Reply::Status(status_code) => Ok(status_code),
            Reply::Delayed(status_code, delay) => {
                tokio::time::sleep(delay).await;
                Ok(status_code)
            },
            Reply::Timeout => {
                tokio::time::sleep(timeout).await;
                Err(DeliveryError::timeout(timeout))
            },
            Reply::Unreachable => Err(DeliveryError::network("connection refused")),
        };

        self.in_progress.fetch_sub(1, Ordering::SeqCst);
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(PostCall {
            url: url.to_string(),
            body,
            started_at,
            finished_at: Instant::now(),
        });

        result.map(|status_code| PostResponse {
            status_code,
            body: String::new(),
            duration: started_at.elapsed(),
        })
    }
}

/// Hook source backed by a fixed table that counts its lookups.
#[derive(Debug, Default)]
pub struct CountingHookSource {
    hooks: HashMap<(TenantId, EventType), Vec<HookDescriptor>>,
    lookups: AtomicUsize,
}

impl CountingHookSource {
    /// Creates a source with no hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `urls` for `(tenant_id, event_type)`, in order.
    #[must_use]
    pub fn with_hooks(mut self, tenant_id: &str, event_type: i32, urls: &[&str]) -> Self {
        self.hooks
            .entry((TenantId::new(tenant_id), EventType(event_type)))
            .or_default()
            .extend(urls.iter().map(|url| HookDescriptor::new(*url)));
        self
    }

    /// Number of lookups performed so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl HookSource for CountingHookSource {
    async fn lookup_hooks(
        &self,
        tenant_id: &TenantId,
        event_type: EventType,
    ) -> Vec<HookDescriptor> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.hooks.get(&(tenant_id.clone(), event_type)).cloned().unwrap_or_default()
    }
}

/// Event handler that keeps every event it receives.
#[derive(Debug, Default, Clone)]
pub struct RecordingEventHandler {
    events: Arc<Mutex<Vec<DeliveryEvent>>>,
}

impl RecordingEventHandler {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far.
    pub fn events(&self) -> Vec<DeliveryEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Failed-delivery events received so far.
    pub fn failures(&self) -> Vec<DeliveryEvent> {
        self.events().into_iter().filter(DeliveryEvent::is_failure).collect()
    }
}

#[async_trait::async_trait]
impl EventHandler for RecordingEventHandler {
    async fn handle_event(&self, event: DeliveryEvent) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}
