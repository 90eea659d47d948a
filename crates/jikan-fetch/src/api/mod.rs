//! Jikan API v4 access.
//!
//! The HTTP client, the failure taxonomy, wire types, and the single-lane
//! queue with its backoff controller that paces every outgoing request.

pub mod backoff;
pub mod client;
pub mod error;
pub mod queue;
pub mod types;

pub use backoff::{BackoffController, SharedBackoff};
pub use client::{JikanClient, Upstream};
pub use error::{FailureKind, FetchError};
pub use queue::{RequestQueue, Ticket};
pub use types::*;
