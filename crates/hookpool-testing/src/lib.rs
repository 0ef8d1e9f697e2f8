//! Test doubles and HTTP mocking for hookpool.
//!
//! Provides a scriptable in-process `HttpPoster`, a hook source that counts
//! its lookups, an event handler that records what it receives, and a thin
//! wiremock wrapper for tests that need real HTTP.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod fakes;
pub mod http;

pub use fakes::{CountingHookSource, PostCall, RecordingEventHandler, RecordingPoster, Reply};
pub use self::http::{MockResponse, MockServer};
pub use ::http::StatusCode;
