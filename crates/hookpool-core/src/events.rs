//! Delivery outcome events.
//!
//! Workers publish one event per attempted hook delivery. Failure counters,
//! audit logs and metrics exporters subscribe through `EventHandler` without
//! the delivery crate knowing about them.
//!
//! ```text
//! ┌─────────────┐  Succeeded / Failed  ┌──────────────────────┐
//! │ HookWorker  │ ────────────────────▶│ MulticastEventHandler│
//! └─────────────┘                      └──────────────────────┘
//!                                                 │
//!                                     ┌───────────┴───────────┐
//!                                     ▼                       ▼
//!                              failure counter          audit stream
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{EventType, JobId, TenantId};

/// Events emitted by the delivery workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeliveryEvent {
    /// The hook answered with a status below 400.
    Succeeded(DeliverySucceededEvent),

    /// The hook timed out, was unreachable, or answered with 400 or above.
    Failed(DeliveryFailedEvent),
}

impl DeliveryEvent {
    /// Job the delivery belonged to.
    pub fn job_id(&self) -> JobId {
        match self {
            Self::Succeeded(event) => event.job_id,
            Self::Failed(event) => event.job_id,
        }
    }

    /// Hook URL the delivery targeted.
    pub fn url(&self) -> &str {
        match self {
            Self::Succeeded(event) => &event.url,
            Self::Failed(event) => &event.url,
        }
    }

    /// Returns `true` for failed deliveries.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Event emitted when a hook accepts a delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverySucceededEvent {
    /// Job the delivery belonged to.
    pub job_id: JobId,

    /// Tenant that owns the event.
    pub tenant_id: TenantId,

    /// Kind of event delivered.
    pub event_type: EventType,

    /// Hook URL that received the payload.
    pub url: String,

    /// HTTP status returned by the hook.
    pub status_code: u16,

    /// Position of the hook within the job (0-based).
    pub hook_index: usize,

    /// When the delivery completed.
    pub delivered_at: DateTime<Utc>,

    /// Size of the delivered payload in bytes.
    pub payload_size: usize,
}

/// Event emitted when a hook delivery fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryFailedEvent {
    /// Job the delivery belonged to.
    pub job_id: JobId,

    /// Tenant that owns the event.
    pub tenant_id: TenantId,

    /// Kind of event attempted.
    pub event_type: EventType,

    /// Hook URL that was attempted.
    pub url: String,

    /// HTTP status when the hook responded at all.
    pub status_code: Option<u16>,

    /// Position of the hook within the job (0-based).
    pub hook_index: usize,

    /// When the failure was observed.
    pub failed_at: DateTime<Utc>,

    /// Description of the failure.
    pub error_message: String,
}

/// Receives delivery events.
///
/// Handlers run on the worker task that produced the event, between two hook
/// deliveries, so they must not block. Failures inside a handler are the
/// handler's business and are never reported back to the worker.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync + std::fmt::Debug {
    /// Handles a delivery event.
    async fn handle_event(&self, event: DeliveryEvent);
}

/// Event handler that discards every event.
#[derive(Debug, Default)]
pub struct NoOpEventHandler;

impl NoOpEventHandler {
    /// Creates a new no-op event handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl EventHandler for NoOpEventHandler {
    async fn handle_event(&self, _event: DeliveryEvent) {}
}

/// Forwards each event to every registered subscriber concurrently.
#[derive(Debug, Clone, Default)]
pub struct MulticastEventHandler {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl MulticastEventHandler {
    /// Creates a multicast handler with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber.
    pub fn add_subscriber(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait::async_trait]
impl EventHandler for MulticastEventHandler {
    async fn handle_event(&self, event: DeliveryEvent) {
        let deliveries = self.handlers.iter().map(|handler| {
            let event = event.clone();
            async move { handler.handle_event(event).await }
        });

        futures::future::join_all(deliveries).await;
    }
}
