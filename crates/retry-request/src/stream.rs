//! Stream-style consumption: the operation as a `futures::Stream` of
//! [`StreamEvent`]s.
//!
//! Every attempt that produces a response yields one
//! [`StreamEvent::Response`], including attempts that are then retried. Body
//! data of the final attempt follows as [`StreamEvent::Data`]. The stream
//! ends with exactly one [`StreamEvent::Complete`] or one
//! [`StreamEvent::Error`], never both, or ends silently after
//! [`RetryStream::abort`].

use crate::attempt::{Chunk, RequestTarget, ResponseInfo};
use crate::callback::{BodyBuffer, CompletedRequest};
use crate::config::RetryOptions;
use crate::coordinator::{AbortHandle, RetryCoordinator, RetryState};
use crate::error::TransportError;
use crate::events::{RetryEvent, RetryObserver, Terminal};
use crate::predicate::Outcome;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// What a [`RetryStream`] yields.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// An attempt received a response.
    Response { ordinal: u32, response: ResponseInfo },
    /// Body data of the final attempt: bytes, or records in object mode.
    Data(Chunk),
    /// Terminal transport error.
    Error(TransportError),
    /// The operation finished with a response.
    Complete {
        attempts: u32,
        /// The final response was still retryable but the budget ran out.
        retries_exhausted: bool,
    },
}

impl StreamEvent {
    fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Error(_) | StreamEvent::Complete { .. })
    }
}

/// Translates coordinator events into stream events.
struct StreamForwarder {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl StreamForwarder {
    fn send(&self, event: StreamEvent) {
        // The receiver is gone once the stream is dropped.
        let _ = self.tx.send(event);
    }
}

impl RetryObserver for StreamForwarder {
    fn on_event(&self, event: &RetryEvent<'_>) {
        match event {
            RetryEvent::Outcome {
                ordinal,
                outcome: Outcome::Response(response),
                ..
            } => self.send(StreamEvent::Response {
                ordinal: *ordinal,
                response: response.clone(),
            }),
            RetryEvent::Data(chunk) => self.send(StreamEvent::Data((*chunk).clone())),
            RetryEvent::Terminal(Terminal::Completed { attempts, .. }) => {
                self.send(StreamEvent::Complete {
                    attempts: *attempts,
                    retries_exhausted: false,
                })
            }
            RetryEvent::Terminal(Terminal::Failed {
                outcome: Outcome::Response(_),
                attempts,
            }) => self.send(StreamEvent::Complete {
                attempts: *attempts,
                retries_exhausted: true,
            }),
            RetryEvent::Terminal(Terminal::Failed {
                outcome: Outcome::TransportError(err),
                ..
            }) => self.send(StreamEvent::Error(err.clone())),
            RetryEvent::AttemptStart { .. }
            | RetryEvent::Outcome { .. }
            | RetryEvent::RetryScheduled { .. } => {}
        }
    }
}

/// A retry operation consumed as a stream.
///
/// The coordinator starts on the current Tokio runtime when the stream is
/// created. Dropping the stream aborts the operation.
pub struct RetryStream {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    abort: AbortHandle,
    done: bool,
}

impl RetryStream {
    /// Start `target` under `options` and return its event stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(target: RequestTarget, options: RetryOptions) -> Self {
        let policy = options.freeze();
        let (tx, rx) = mpsc::unbounded_channel();
        let observer = policy.observer_chain(StreamForwarder { tx });
        let coordinator = RetryCoordinator::new(target, policy);
        let abort = coordinator.abort_handle();
        coordinator.spawn(Arc::new(observer));
        Self {
            rx,
            abort,
            done: false,
        }
    }

    /// Cancel the operation. Safe at any point; a no-op after completion.
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// A handle that can abort this operation from elsewhere.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn state(&self) -> RetryState {
        self.abort.state()
    }

    /// Drain the stream into the same result the callback form receives.
    ///
    /// Returns `None` if the operation was aborted.
    pub async fn collect_body(mut self) -> Option<Result<CompletedRequest, TransportError>> {
        let mut body = BodyBuffer::default();
        let mut last_response = None;
        while let Some(event) = self.next().await {
            match event {
                StreamEvent::Response { response, .. } => {
                    body.reset();
                    last_response = Some(response);
                }
                StreamEvent::Data(chunk) => body.push(&chunk),
                StreamEvent::Error(err) => return Some(Err(err)),
                StreamEvent::Complete {
                    attempts,
                    retries_exhausted,
                } => {
                    return Some(Ok(CompletedRequest {
                        response: last_response?,
                        body: body.take(),
                        attempts,
                        retries_exhausted,
                    }));
                }
            }
        }
        None
    }
}

impl Stream for RetryStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        let this = self.get_mut();
        if this.done || this.abort.is_aborted() {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                this.done = event.is_terminal();
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for RetryStream {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

impl std::fmt::Debug for RetryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryStream")
            .field("state", &self.state())
            .field("done", &self.done)
            .finish()
    }
}
