//! Lifecycle events of a retry operation and the observers that consume them.
//!
//! The [`RetryCoordinator`](crate::coordinator::RetryCoordinator) reports
//! every state transition as a [`RetryEvent`]. The stream and callback
//! adapters are observers themselves; callers can attach more through
//! [`RetryOptions::with_observer`](crate::config::RetryOptions::with_observer).
//!
//! # Choosing an observer
//!
//! | Observer | Use case |
//! |---------|----------|
//! | [`NoopObserver`] | Tests or fire-and-forget operations |
//! | [`LoggingObserver`] | Structured logging via `tracing` |
//! | [`FnObserver`] | Quick closures for simple callbacks |
//! | [`CompositeObserver`] | Compose multiple observers in order |
//!
//! No event is delivered to an observer once the operation has been aborted
//! and the coordinator has noticed. An event emitted concurrently with
//! `abort()` on another thread may still reach custom observers; the stream
//! and callback adapters filter those out.

use crate::attempt::{Chunk, ResponseInfo};
use crate::predicate::Outcome;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

// ── Events ─────────────────────────────────────────────────────────

/// How an operation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    /// The last response was not retryable.
    Completed { response: ResponseInfo, attempts: u32 },
    /// A transport error was final, or the retry budget ran out. `outcome`
    /// is the last one observed, surfaced as-is.
    Failed { outcome: Outcome, attempts: u32 },
}

impl Terminal {
    pub fn attempts(&self) -> u32 {
        match self {
            Terminal::Completed { attempts, .. } | Terminal::Failed { attempts, .. } => *attempts,
        }
    }

    /// The final response, if the operation ended with one.
    pub fn response(&self) -> Option<&ResponseInfo> {
        match self {
            Terminal::Completed { response, .. } => Some(response),
            Terminal::Failed { outcome, .. } => outcome.response(),
        }
    }
}

/// Events emitted by the coordinator during an operation.
#[derive(Debug)]
pub enum RetryEvent<'a> {
    /// A new attempt is about to be issued.
    AttemptStart { ordinal: u32 },
    /// An attempt reported its outcome and the predicate was consulted.
    Outcome {
        ordinal: u32,
        outcome: &'a Outcome,
        will_retry: bool,
    },
    /// A retry timer was armed.
    RetryScheduled { retry_number: u32, delay: Duration },
    /// Body data of the final attempt.
    Data(&'a Chunk),
    /// The operation finished. Emitted at most once, after all `Data`.
    Terminal(&'a Terminal),
}

/// Observer of coordinator events.
///
/// The default implementation ignores everything.
///
/// # Example
///
/// ```
/// use retry_request::{RetryEvent, RetryObserver};
///
/// struct CountRetries(std::sync::atomic::AtomicU32);
///
/// impl RetryObserver for CountRetries {
///     fn on_event(&self, event: &RetryEvent<'_>) {
///         if let RetryEvent::RetryScheduled { .. } = event {
///             self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
///         }
///     }
/// }
/// ```
pub trait RetryObserver: Send + Sync {
    fn on_event(&self, event: &RetryEvent<'_>) {
        let _ = event;
    }
}

/// An observer that ignores all events.
pub struct NoopObserver;
impl RetryObserver for NoopObserver {}

/// An observer backed by a closure.
pub struct FnObserver<F>(F)
where
    F: Fn(&RetryEvent<'_>) + Send + Sync;

impl<F> FnObserver<F>
where
    F: Fn(&RetryEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> RetryObserver for FnObserver<F>
where
    F: Fn(&RetryEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &RetryEvent<'_>) {
        (self.0)(event)
    }
}

/// An observer that delegates to multiple inner observers, in registration
/// order.
pub struct CompositeObserver {
    observers: Vec<Box<dyn RetryObserver>>,
}

impl CompositeObserver {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    /// Add an observer to the chain.
    pub fn with(mut self, observer: impl RetryObserver + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn with_boxed(mut self, observer: Box<dyn RetryObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Conditionally add an observer to the chain.
    pub fn with_if(self, condition: bool, observer: impl RetryObserver + 'static) -> Self {
        if condition { self.with(observer) } else { self }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl Default for CompositeObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryObserver for CompositeObserver {
    fn on_event(&self, event: &RetryEvent<'_>) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}

impl<T: RetryObserver + ?Sized> RetryObserver for std::sync::Arc<T> {
    fn on_event(&self, event: &RetryEvent<'_>) {
        (**self).on_event(event)
    }
}

/// Logs every event through `tracing`.
///
/// Attempts and retries log at `debug`/`info`, failures at `warn`, body
/// chunks at `trace`.
pub struct LoggingObserver;

impl RetryObserver for LoggingObserver {
    fn on_event(&self, event: &RetryEvent<'_>) {
        match event {
            RetryEvent::AttemptStart { ordinal } => {
                debug!(ordinal, "starting attempt");
            }
            RetryEvent::Outcome {
                ordinal,
                outcome: Outcome::Response(response),
                will_retry,
            } => {
                debug!(
                    ordinal,
                    status = response.status,
                    will_retry,
                    "attempt responded"
                );
            }
            RetryEvent::Outcome {
                ordinal,
                outcome: Outcome::TransportError(err),
                will_retry,
            } => {
                warn!(ordinal, error = %err, will_retry, "attempt failed without a response");
            }
            RetryEvent::RetryScheduled {
                retry_number,
                delay,
            } => {
                info!(
                    retry = retry_number,
                    delay_ms = delay.as_millis() as u64,
                    "retry scheduled"
                );
            }
            RetryEvent::Data(chunk) => {
                trace!(len = chunk.len(), "body chunk");
            }
            RetryEvent::Terminal(Terminal::Completed { response, attempts }) => {
                info!(status = response.status, attempts, "request completed");
            }
            RetryEvent::Terminal(Terminal::Failed {
                outcome: Outcome::Response(response),
                attempts,
            }) => {
                warn!(
                    status = response.status,
                    attempts, "retries exhausted; returning last response"
                );
            }
            RetryEvent::Terminal(Terminal::Failed {
                outcome: Outcome::TransportError(err),
                attempts,
            }) => {
                warn!(error = %err, attempts, "request failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn composite_dispatches_in_order() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let first = log.clone();
        let second = log.clone();
        let composite = CompositeObserver::new()
            .with(FnObserver::new(move |_| first.lock().unwrap().push("first")))
            .with_if(false, NoopObserver)
            .with(FnObserver::new(move |_| second.lock().unwrap().push("second")));

        assert_eq!(composite.len(), 2);
        composite.on_event(&RetryEvent::AttemptStart { ordinal: 1 });
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn arc_observer_forwards() {
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let observer: Arc<dyn RetryObserver> = Arc::new(FnObserver::new(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        let composite = CompositeObserver::new().with(observer);
        composite.on_event(&RetryEvent::RetryScheduled {
            retry_number: 1,
            delay: Duration::from_secs(2),
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn terminal_accessors() {
        let done = Terminal::Completed {
            response: ResponseInfo::new(200),
            attempts: 2,
        };
        assert_eq!(done.attempts(), 2);
        assert_eq!(done.response().map(|r| r.status), Some(200));

        let failed = Terminal::Failed {
            outcome: Outcome::TransportError(crate::error::TransportError::NoOutcome),
            attempts: 3,
        };
        assert_eq!(failed.attempts(), 3);
        assert!(failed.response().is_none());
    }

    #[test]
    fn logging_observer_handles_every_event() {
        let outcome = Outcome::Response(ResponseInfo::new(503));
        let chunk = Chunk::from("x");
        let terminal = Terminal::Failed {
            outcome: outcome.clone(),
            attempts: 3,
        };
        for event in [
            RetryEvent::AttemptStart { ordinal: 1 },
            RetryEvent::Outcome {
                ordinal: 1,
                outcome: &outcome,
                will_retry: true,
            },
            RetryEvent::Data(&chunk),
            RetryEvent::Terminal(&terminal),
        ] {
            LoggingObserver.on_event(&event);
        }
    }
}
