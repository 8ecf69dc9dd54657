//! Retry wrapper for network requests.
//!
//! `retry-request` runs a request, inspects each outcome, and re-issues the
//! request with exponential backoff and jitter until it gets a response
//! worth keeping or the retry budget runs out. The core is a
//! [`RetryCoordinator`] state machine; two adapters present it to callers:
//!
//! - [`retry_request`] returns a [`RetryStream`], a `futures::Stream` of
//!   per-attempt responses, body data and one terminal event.
//! - [`retry_request_with_callback`] returns a [`RequestHandle`] and calls
//!   a completion callback exactly once with the final response and its
//!   buffered body.
//!
//! Both run the same coordinator, so retry and backoff behave identically
//! whichever style you consume.
//!
//! # Getting started
//!
//! ```no_run
//! use futures::StreamExt;
//! use retry_request::{RequestTarget, RetryOptions, StreamEvent, retry_request};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut stream = retry_request(
//!         RequestTarget::get("https://example.com/data.json"),
//!         RetryOptions::new().with_retries(3),
//!     );
//!     while let Some(event) = stream.next().await {
//!         match event {
//!             StreamEvent::Response { ordinal, response } => {
//!                 eprintln!("attempt {ordinal}: HTTP {}", response.status);
//!             }
//!             StreamEvent::Data(chunk) => eprintln!("{} bytes", chunk.len()),
//!             StreamEvent::Error(err) => eprintln!("failed: {err}"),
//!             StreamEvent::Complete { attempts, .. } => eprintln!("done after {attempts}"),
//!         }
//!     }
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Change which outcomes are retried:** implement
//!   [`RetryPredicate`] or pass a closure to
//!   [`RetryOptions::with_should_retry_fn`]. The default is
//!   [`DefaultRetryPredicate`]: transport errors, 1xx, 429 and 5xx.
//!
//! - **Replace the transport:** implement [`AttemptFactory`]. Each attempt
//!   gets a [`Notifier`] to report its response, body data, errors and end,
//!   and returns an [`AttemptHandle`] the coordinator can abort. The default
//!   is [`HttpAttemptFactory`] over `reqwest`.
//!
//! - **Observe progress:** attach a [`RetryObserver`] with
//!   [`RetryOptions::with_observer`]. [`LoggingObserver`] logs through
//!   `tracing`.
//!
//! - **Compute delays yourself:** [`get_next_retry_delay`] is the default
//!   schedule as a plain function.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`backoff`] | Delay schedule between attempts |
//! | [`predicate`] | [`Outcome`] and the retry decision |
//! | [`attempt`] | [`AttemptFactory`], [`Notifier`], request and response descriptors |
//! | [`transport`] | [`HttpAttemptFactory`], NDJSON record decoding |
//! | [`config`] | [`RetryOptions`] and the frozen [`RetryPolicy`] |
//! | [`coordinator`] | The state machine and [`AbortHandle`] |
//! | [`events`] | [`RetryEvent`] and observers |
//! | [`stream`] | [`RetryStream`] |
//! | [`callback`] | [`RequestHandle`] and [`CompletedRequest`] |
//! | [`error`] | [`TransportError`] and [`ConfigError`] |

pub mod attempt;
pub mod backoff;
pub mod callback;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod predicate;
pub mod prelude;
pub mod stream;
pub mod transport;

#[cfg(test)]
mod testing;

pub use attempt::{
    AttemptContext, AttemptFactory, AttemptHandle, Chunk, NoopHandle, Notifier, RequestTarget,
    ResponseInfo,
};
pub use backoff::{Backoff, ExponentialJitter, FixedDelay, get_next_retry_delay};
pub use callback::{CompletedRequest, RequestHandle};
pub use config::{DEFAULT_RETRIES, RetryOptions, RetryPolicy};
pub use coordinator::{AbortHandle, Phase, RetryCoordinator, RetryState};
pub use error::{ConfigError, TransportError};
pub use events::{
    CompositeObserver, FnObserver, LoggingObserver, NoopObserver, RetryEvent, RetryObserver,
    Terminal,
};
pub use predicate::{DefaultRetryPredicate, FnPredicate, Outcome, RetryPredicate};
pub use stream::{RetryStream, StreamEvent};
pub use transport::{HttpAttemptFactory, HttpAttemptFactoryBuilder};

// ── Entry points ───────────────────────────────────────────────────

/// Start `target` and consume the operation as a stream.
///
/// The first attempt is dispatched on the current Tokio runtime right away.
/// Dropping the returned stream aborts the operation.
pub fn retry_request(target: RequestTarget, options: RetryOptions) -> RetryStream {
    RetryStream::start(target, options)
}

/// Start `target` and call `callback` once when it finishes.
///
/// The returned handle can abort the operation immediately, even before the
/// first attempt has been dispatched; an aborted operation never calls
/// `callback`.
///
/// ```no_run
/// use retry_request::{RequestTarget, RetryOptions, retry_request_with_callback};
///
/// # async fn run() {
/// let handle = retry_request_with_callback(
///     RequestTarget::get("https://example.com/"),
///     RetryOptions::default(),
///     |result| match result {
///         Ok(done) => println!("HTTP {} ({} bytes)", done.response.status, done.body.len()),
///         Err(err) => eprintln!("request failed: {err}"),
///     },
/// );
/// handle.join().await;
/// # }
/// ```
pub fn retry_request_with_callback<F>(
    target: RequestTarget,
    options: RetryOptions,
    callback: F,
) -> RequestHandle
where
    F: FnOnce(Result<CompletedRequest, TransportError>) + Send + 'static,
{
    RequestHandle::start(target, options, callback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Script, ScriptedFactory};
    use futures::StreamExt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    fn target() -> RequestTarget {
        RequestTarget::get("http://example.test/resource")
    }

    #[tokio::test(start_paused = true)]
    async fn default_budget_gives_three_attempts_and_two_aborts() {
        let factory = ScriptedFactory::new(vec![Script::status(503, "")]);
        let events: Vec<_> = retry_request(target(), RetryOptions::new().with_request(factory.clone()))
            .collect()
            .await;

        assert_eq!(factory.attempts(), 3);
        assert_eq!(factory.abort_counts(), vec![1, 1, 0]);
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Complete { attempts: 3, retries_exhausted: true })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_third_attempt_after_two_aborts() {
        let factory = ScriptedFactory::new(vec![
            Script::status(500, ""),
            Script::status(502, ""),
            Script::status(200, "ok"),
        ]);
        let result = retry_request(target(), RetryOptions::new().with_request(factory.clone()))
            .collect_body()
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.attempts, 3);
        assert_eq!(result.body, "ok");
        assert_eq!(factory.abort_counts().iter().sum::<u32>(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_yields_single_failed_attempt() {
        let factory = ScriptedFactory::new(vec![Script::error("network down")]);
        let (tx, rx) = tokio::sync::oneshot::channel();
        retry_request_with_callback(
            target(),
            RetryOptions::new().with_retries(0).with_request(factory.clone()),
            move |result| {
                let _ = tx.send(result);
            },
        );

        assert!(rx.await.unwrap().is_err());
        assert_eq!(factory.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn declining_predicate_runs_once_with_budget_left() {
        let factory = ScriptedFactory::new(vec![Script::status(503, "")]);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let options = RetryOptions::new()
            .with_retries(1)
            .with_request(factory.clone())
            .with_should_retry_fn(move |_: &Outcome| {
                c.fetch_add(1, Ordering::SeqCst);
                false
            });
        let result = retry_request(target(), options).collect_body().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(factory.attempts(), 1);
        let done = result.unwrap();
        assert_eq!(done.response.status, 503);
        assert!(!done.retries_exhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_before_outcome_silences_both_adapters() {
        let factory = ScriptedFactory::with_mode(vec![Script::status(200, "ok")], true);
        let fired = Arc::new(Mutex::new(0u32));

        let f = fired.clone();
        let handle = retry_request_with_callback(
            target(),
            RetryOptions::new().with_request(factory.clone()),
            move |_| *f.lock().unwrap() += 1,
        );
        handle.abort();

        let mut stream = retry_request(target(), RetryOptions::new().with_request(factory.clone()));
        stream.abort();
        assert!(stream.next().await.is_none());

        handle.join().await;
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        assert_eq!(*fired.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn observers_see_events_before_adapter() {
        let factory = ScriptedFactory::new(vec![Script::status(429, ""), Script::status(200, "")]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let options = RetryOptions::new()
            .with_request(factory)
            .with_observer(FnObserver::new(move |event| {
                let tag = match event {
                    RetryEvent::AttemptStart { .. } => "start",
                    RetryEvent::Outcome { .. } => "outcome",
                    RetryEvent::RetryScheduled { .. } => "scheduled",
                    RetryEvent::Data(_) => "data",
                    RetryEvent::Terminal(_) => "terminal",
                };
                s.lock().unwrap().push(tag);
            }));
        let _ = retry_request(target(), options).collect_body().await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["start", "outcome", "scheduled", "start", "outcome", "terminal"]
        );
    }
}
