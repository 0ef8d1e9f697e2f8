//! Domain models and strongly-typed identifiers.
//!
//! A `Job` is created once per dispatched event and never mutated afterwards;
//! completion is tracked by the dispatcher, not by the job itself.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque tenant identifier scoping which hooks apply to an event.
///
/// The surrounding service decides what a tenant is (a game, an
/// organisation); the dispatcher only compares identifiers for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a tenant identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TenantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Small integer code identifying the kind of event being dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(pub i32);

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for EventType {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

/// Identifier attached to each job for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Creates a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Externally registered endpoint subscribed to a tenant and event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookDescriptor {
    /// Delivery target.
    pub url: String,
    /// Optional human readable label, used only in logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl HookDescriptor {
    /// Creates an unnamed hook pointing at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), name: None }
    }

    /// Attaches a label to the hook.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// One event waiting to be delivered to every hook registered for its
/// tenant and event type.
///
/// The payload is serialized by the producer before the job is built, so a
/// worker never has to deal with encoding failures.
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    tenant_id: TenantId,
    event_type: EventType,
    payload: Bytes,
}

impl Job {
    /// Creates a job with a fresh identifier.
    pub fn new(tenant_id: TenantId, event_type: EventType, payload: impl Into<Bytes>) -> Self {
        Self { id: JobId::new(), tenant_id, event_type, payload: payload.into() }
    }

    /// Job identifier used for log correlation.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Tenant the event belongs to.
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Event kind.
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Serialized payload posted verbatim to each hook.
    ///
    /// Cloning the returned `Bytes` is a reference count bump, so every hook
    /// delivery shares the same buffer.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}
