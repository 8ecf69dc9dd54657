//! Retry eligibility.
//!
//! The default policy retries transport failures (no response at all),
//! informational responses (1xx), rate limiting (429) and server errors
//! (5xx). Everything else, including every other 4xx, is final. A
//! caller-supplied predicate replaces this policy entirely; it is not layered
//! on top of it.

use crate::attempt::ResponseInfo;
use crate::error::TransportError;

/// Result of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Response(ResponseInfo),
    /// The attempt failed before producing any response.
    TransportError(TransportError),
}

impl Outcome {
    /// Response status, `None` for transport errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Outcome::Response(r) => Some(r.status),
            Outcome::TransportError(_) => None,
        }
    }

    pub fn response(&self) -> Option<&ResponseInfo> {
        match self {
            Outcome::Response(r) => Some(r),
            Outcome::TransportError(_) => None,
        }
    }

    pub fn error(&self) -> Option<&TransportError> {
        match self {
            Outcome::Response(_) => None,
            Outcome::TransportError(e) => Some(e),
        }
    }
}

/// Decides whether an outcome warrants another attempt.
///
/// Called exactly once per attempt, synchronously, before the coordinator
/// changes any state in response to that attempt. Whether a retry actually
/// happens also depends on the remaining retry budget, which the predicate
/// does not see.
pub trait RetryPredicate: Send + Sync {
    fn should_retry(&self, outcome: &Outcome) -> bool;
}

/// Whether a response status is retryable under the default policy.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 100..=199 | 429 | 500..=599)
}

/// The built-in policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRetryPredicate;

impl RetryPredicate for DefaultRetryPredicate {
    fn should_retry(&self, outcome: &Outcome) -> bool {
        match outcome {
            Outcome::TransportError(_) => true,
            Outcome::Response(r) => is_retryable_status(r.status),
        }
    }
}

impl<T: RetryPredicate + ?Sized> RetryPredicate for std::sync::Arc<T> {
    fn should_retry(&self, outcome: &Outcome) -> bool {
        (**self).should_retry(outcome)
    }
}

/// A predicate backed by a closure.
///
/// # Example
///
/// ```
/// use retry_request::{FnPredicate, Outcome, RetryPredicate, ResponseInfo};
///
/// let only_503 = FnPredicate::new(|outcome: &Outcome| outcome.status() == Some(503));
/// assert!(only_503.should_retry(&Outcome::Response(ResponseInfo::new(503))));
/// assert!(!only_503.should_retry(&Outcome::Response(ResponseInfo::new(500))));
/// ```
pub struct FnPredicate<F>(F)
where
    F: Fn(&Outcome) -> bool + Send + Sync;

impl<F> FnPredicate<F>
where
    F: Fn(&Outcome) -> bool + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> RetryPredicate for FnPredicate<F>
where
    F: Fn(&Outcome) -> bool + Send + Sync,
{
    fn should_retry(&self, outcome: &Outcome) -> bool {
        (self.0)(outcome)
    }
}
