//! Callback-style consumption: one completion callback per operation.
//!
//! The callback runs exactly once, when the operation reaches a terminal
//! state, with `Ok(CompletedRequest)` for any final response (a 404 is a
//! normal response here, not an error) or `Err(TransportError)` for a
//! terminal transport failure. It never runs after
//! [`RequestHandle::abort`].

use crate::attempt::{Chunk, RequestTarget, ResponseInfo};
use crate::config::RetryOptions;
use crate::coordinator::{AbortHandle, RetryCoordinator, RetryState};
use crate::error::TransportError;
use crate::events::{RetryEvent, RetryObserver, Terminal};
use crate::predicate::Outcome;
use bytes::Bytes;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;

/// The final response of an operation together with its buffered body.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedRequest {
    pub response: ResponseInfo,
    /// Body of the final attempt only.
    pub body: Bytes,
    pub attempts: u32,
    /// The final response was still retryable but the budget ran out.
    pub retries_exhausted: bool,
}

/// Accumulates the body of the current attempt.
#[derive(Debug, Default)]
pub(crate) struct BodyBuffer {
    buf: Vec<u8>,
}

impl BodyBuffer {
    pub(crate) fn push(&mut self, chunk: &Chunk) {
        chunk.append_to(&mut self.buf);
    }

    pub(crate) fn reset(&mut self) {
        self.buf.clear();
    }

    pub(crate) fn take(&mut self) -> Bytes {
        Bytes::from(std::mem::take(&mut self.buf))
    }
}

/// Boxed completion callback.
pub type Callback = Box<dyn FnOnce(Result<CompletedRequest, TransportError>) + Send>;

struct CallbackState {
    body: BodyBuffer,
    callback: Option<Callback>,
}

/// Buffers the final attempt's body and fires the callback on the terminal
/// event.
struct CallbackForwarder {
    state: Mutex<CallbackState>,
}

impl RetryObserver for CallbackForwarder {
    fn on_event(&self, event: &RetryEvent<'_>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match event {
            RetryEvent::AttemptStart { .. } => state.body.reset(),
            RetryEvent::Data(chunk) => state.body.push(chunk),
            RetryEvent::Terminal(terminal) => {
                let Some(callback) = state.callback.take() else {
                    return;
                };
                let result = match terminal {
                    Terminal::Completed { response, attempts } => Ok(CompletedRequest {
                        response: response.clone(),
                        body: state.body.take(),
                        attempts: *attempts,
                        retries_exhausted: false,
                    }),
                    Terminal::Failed {
                        outcome: Outcome::Response(response),
                        attempts,
                    } => Ok(CompletedRequest {
                        response: response.clone(),
                        body: state.body.take(),
                        attempts: *attempts,
                        retries_exhausted: true,
                    }),
                    Terminal::Failed {
                        outcome: Outcome::TransportError(err),
                        ..
                    } => Err(err.clone()),
                };
                // Run the callback without holding the lock; it may abort or
                // start another operation.
                drop(state);
                callback(result);
            }
            RetryEvent::Outcome { .. } | RetryEvent::RetryScheduled { .. } => {}
        }
    }
}

/// Handle to an operation started with a callback.
///
/// Dropping the handle does not cancel the operation; call
/// [`abort`](Self::abort) for that.
pub struct RequestHandle {
    abort: AbortHandle,
    task: JoinHandle<()>,
}

impl RequestHandle {
    /// Start `target` under `options`; `callback` runs once on completion.
    ///
    /// The first attempt is dispatched on the current Tokio runtime right
    /// away. Must be called from within a Tokio runtime.
    pub fn start<F>(target: RequestTarget, options: RetryOptions, callback: F) -> Self
    where
        F: FnOnce(Result<CompletedRequest, TransportError>) + Send + 'static,
    {
        let policy = options.freeze();
        let forwarder = CallbackForwarder {
            state: Mutex::new(CallbackState {
                body: BodyBuffer::default(),
                callback: Some(Box::new(callback)),
            }),
        };
        let observer = policy.observer_chain(forwarder);
        let coordinator = RetryCoordinator::new(target, policy);
        let abort = coordinator.abort_handle();
        let task = coordinator.spawn(Arc::new(observer));
        Self { abort, task }
    }

    /// Cancel the operation. Works immediately, even before the first
    /// attempt is dispatched; the callback will not run.
    pub fn abort(&self) {
        self.abort.abort();
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    pub fn state(&self) -> RetryState {
        self.abort.state()
    }

    /// Wait until the callback has run or the operation was aborted.
    ///
    /// # Panics
    ///
    /// Resumes the panic if the predicate, an observer or the callback
    /// panicked while driving the operation.
    pub async fn join(self) {
        if let Err(err) = self.task.await
            && err.is_panic()
        {
            std::panic::resume_unwind(err.into_panic());
        }
    }
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("state", &self.state())
            .finish()
    }
}
