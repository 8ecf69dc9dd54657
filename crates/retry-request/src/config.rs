//! Caller-facing options and the frozen policy one operation runs under.
//!
//! # Examples
//!
//! Defaults: two retries, the built-in status policy, the HTTP transport,
//! raw byte chunks:
//!
//! ```
//! use retry_request::RetryOptions;
//!
//! let options = RetryOptions::default();
//! assert_eq!(options.retries, 2);
//! ```
//!
//! Customized with builder methods:
//!
//! ```
//! use retry_request::{Outcome, RetryOptions};
//!
//! let options = RetryOptions::new()
//!     .with_retries(5)
//!     .with_object_mode(true)
//!     .with_should_retry_fn(|outcome: &Outcome| outcome.status() == Some(503));
//! ```

use crate::attempt::AttemptFactory;
use crate::backoff::{Backoff, ExponentialJitter};
use crate::events::{CompositeObserver, RetryObserver};
use crate::predicate::{DefaultRetryPredicate, FnPredicate, Outcome, RetryPredicate};
use crate::transport::HttpAttemptFactory;
use std::sync::Arc;

/// Retries allowed beyond the first attempt when none is configured.
pub const DEFAULT_RETRIES: u32 = 2;

/// Options for one retry operation.
///
/// Every override is optional; unset fields fall back to the defaults when
/// the options are [frozen](RetryOptions::freeze).
#[derive(Clone)]
pub struct RetryOptions {
    /// Maximum retries beyond the first attempt (`0` = one attempt only).
    pub retries: u32,
    /// Replaces the HTTP transport entirely.
    pub request: Option<Arc<dyn AttemptFactory>>,
    /// Replaces the default retry policy entirely.
    pub should_retry_fn: Option<Arc<dyn RetryPredicate>>,
    /// Stream parsed records instead of raw bytes.
    pub object_mode: bool,
    /// Replaces the delay schedule between attempts.
    pub backoff: Option<Arc<dyn Backoff>>,
    /// Extra observers notified of every coordinator event.
    pub observers: Vec<Arc<dyn RetryObserver>>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            request: None,
            should_retry_fn: None,
            object_mode: false,
            backoff: None,
            observers: Vec::new(),
        }
    }
}

impl std::fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOptions")
            .field("retries", &self.retries)
            .field("request", &self.request.as_ref().map(|_| "custom"))
            .field("should_retry_fn", &self.should_retry_fn.as_ref().map(|_| "custom"))
            .field("object_mode", &self.object_mode)
            .field("backoff", &self.backoff.as_ref().map(|_| "custom"))
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl RetryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retry budget.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Substitute the attempt factory.
    pub fn with_request(mut self, factory: impl AttemptFactory + 'static) -> Self {
        self.request = Some(Arc::new(factory));
        self
    }

    /// Substitute the retry predicate.
    pub fn with_predicate(mut self, predicate: impl RetryPredicate + 'static) -> Self {
        self.should_retry_fn = Some(Arc::new(predicate));
        self
    }

    /// Substitute the retry predicate with a closure.
    pub fn with_should_retry_fn<F>(self, f: F) -> Self
    where
        F: Fn(&Outcome) -> bool + Send + Sync + 'static,
    {
        self.with_predicate(FnPredicate::new(f))
    }

    pub fn with_object_mode(mut self, object_mode: bool) -> Self {
        self.object_mode = object_mode;
        self
    }

    /// Substitute the delay schedule. The default is
    /// [`ExponentialJitter`].
    pub fn with_backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Some(Arc::new(backoff));
        self
    }

    /// Attach an observer. Observers are called in registration order,
    /// before the stream or callback adapter.
    pub fn with_observer(mut self, observer: impl RetryObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Merge with the defaults into the immutable policy of one operation.
    pub fn freeze(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retries,
            predicate: self
                .should_retry_fn
                .unwrap_or_else(|| Arc::new(DefaultRetryPredicate)),
            factory: self
                .request
                .unwrap_or_else(|| Arc::new(HttpAttemptFactory::default())),
            backoff: self.backoff.unwrap_or_else(|| Arc::new(ExponentialJitter)),
            object_mode: self.object_mode,
            observers: self.observers,
        }
    }
}

/// Everything one operation needs, fixed for its lifetime.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub predicate: Arc<dyn RetryPredicate>,
    pub factory: Arc<dyn AttemptFactory>,
    pub backoff: Arc<dyn Backoff>,
    pub object_mode: bool,
    pub(crate) observers: Vec<Arc<dyn RetryObserver>>,
}

impl RetryPolicy {
    /// The configured observers followed by `adapter`, as one observer.
    pub(crate) fn observer_chain(&self, adapter: impl RetryObserver + 'static) -> CompositeObserver {
        self.observers
            .iter()
            .cloned()
            .fold(CompositeObserver::new(), |chain, observer| chain.with(observer))
            .with(adapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attempt::ResponseInfo;
    use crate::error::TransportError;
    use crate::events::NoopObserver;
    use crate::backoff::FixedDelay;
    use std::time::Duration;

    #[test]
    fn defaults() {
        let options = RetryOptions::default();
        assert_eq!(options.retries, DEFAULT_RETRIES);
        assert!(!options.object_mode);
        assert!(options.request.is_none());
        assert!(options.should_retry_fn.is_none());

        let policy = options.freeze();
        assert_eq!(policy.max_retries, 2);
        assert!(policy.predicate.should_retry(&Outcome::Response(ResponseInfo::new(503))));
        assert!(!policy.predicate.should_retry(&Outcome::Response(ResponseInfo::new(404))));
        let first = policy.backoff.delay(1);
        assert!(first >= Duration::from_secs(2) && first < Duration::from_secs(3));
    }

    #[test]
    fn predicate_override_replaces_default() {
        let policy = RetryOptions::new()
            .with_should_retry_fn(|outcome: &Outcome| outcome.status() == Some(404))
            .freeze();
        assert!(policy.predicate.should_retry(&Outcome::Response(ResponseInfo::new(404))));
        assert!(!policy.predicate.should_retry(&Outcome::Response(ResponseInfo::new(503))));
        assert!(
            !policy
                .predicate
                .should_retry(&Outcome::TransportError(TransportError::NoOutcome))
        );
    }

    #[test]
    fn builder_sets_fields() {
        let options = RetryOptions::new()
            .with_retries(0)
            .with_object_mode(true)
            .with_backoff(FixedDelay(Duration::from_millis(1)))
            .with_observer(NoopObserver);
        assert_eq!(options.retries, 0);
        assert!(options.object_mode);
        assert_eq!(options.observers.len(), 1);

        let debug = format!("{options:?}");
        assert!(debug.contains("retries: 0"));

        let policy = options.freeze();
        assert_eq!(policy.backoff.delay(4), Duration::from_millis(1));
        assert_eq!(policy.observer_chain(NoopObserver).len(), 2);
    }
}
