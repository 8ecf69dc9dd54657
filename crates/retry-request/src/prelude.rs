//! Convenience re-exports for common `retry-request` types.
//!
//! ```
//! use retry_request::prelude::*;
//! ```
//!
//! Covers the entry points, options, the adapters' event and result types,
//! and the traits needed to plug in a custom transport or policy.
//! Coordinator internals and backoff strategies stay in their modules.

// ── Entry points ────────────────────────────────────────────────────
pub use crate::{retry_request, retry_request_with_callback};

// ── Configuration ───────────────────────────────────────────────────
pub use crate::config::RetryOptions;
pub use crate::predicate::{Outcome, RetryPredicate};

// ── Consumption ─────────────────────────────────────────────────────
pub use crate::callback::{CompletedRequest, RequestHandle};
pub use crate::error::TransportError;
pub use crate::stream::{RetryStream, StreamEvent};

// ── Transport ───────────────────────────────────────────────────────
pub use crate::attempt::{
    AttemptContext, AttemptFactory, AttemptHandle, Chunk, Notifier, RequestTarget, ResponseInfo,
};
