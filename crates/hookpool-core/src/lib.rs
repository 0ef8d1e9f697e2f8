//! Core domain types for asynchronous webhook hook dispatch.
//!
//! Provides the job and hook descriptor types shared by the dispatcher and
//! its workers, the `HookSource` lookup capability through which registered
//! endpoints are resolved, and the delivery outcome events that let
//! observers react to successes and failures without coupling to the
//! delivery crate.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod events;
pub mod hooks;
pub mod models;

pub use events::{
    DeliveryEvent, DeliveryFailedEvent, DeliverySucceededEvent, EventHandler,
    MulticastEventHandler, NoOpEventHandler,
};
pub use hooks::{HookRegistry, HookSource};
pub use models::{EventType, HookDescriptor, Job, JobId, TenantId};
