//! Asynchronous webhook hook dispatch with a fixed worker pool.
//!
//! Producers hand off `(tenant, event type, payload)` triples to the
//! [`Dispatcher`], which queues them in a bounded channel drained by a fixed
//! number of workers. Each worker resolves the job's hooks through a
//! [`hookpool_core::HookSource`] and POSTs the payload to every hook in order.
//!
//! # Delivery semantics
//!
//! - **Fire and forget** - producers never see delivery outcomes
//! - **Backpressure** - submission suspends while the queue is full
//! - **Failure isolation** - a failing hook never aborts the others
//! - **At most once** - no retries, nothing survives a restart
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use hookpool_core::{EventType, HookDescriptor, HookRegistry, TenantId};
//! use hookpool_delivery::{DispatchError, Dispatcher, DispatcherConfig};
//!
//! # async fn example() -> Result<(), DispatchError> {
//! let registry = HookRegistry::from_hooks([(
//!     TenantId::new("game1"),
//!     EventType(1),
//!     HookDescriptor::new("http://localhost:9000/hook"),
//! )]);
//!
//! let dispatcher = Dispatcher::start(DispatcherConfig::default(), Arc::new(registry))?;
//! dispatcher.dispatch_hook("game1", 1, &serde_json::json!({ "a": 1 })).await?;
//! dispatcher.wait().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod tracker;
pub mod worker;

pub use client::{ClientConfig, DeliveryClient, HttpPoster, PostResponse};
pub use dispatcher::{DispatchHandle, Dispatcher, DispatcherConfig};
pub use error::{DeliveryError, DispatchError, Result};
pub use tracker::InFlightTracker;
pub use worker::{DispatcherStats, HookWorker, JobReport};

/// Default number of delivery workers.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default job queue capacity.
pub const DEFAULT_BUFFER_SIZE: usize = 64;

/// Default per-delivery timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 5;
