//! The retry state machine.
//!
//! ```text
//! Idle → Requesting → Evaluating ─┬→ Retrying → Requesting …
//!                                 ├→ Receiving → Completed | Failed
//!                                 └→ Failed
//!      (Requesting | Evaluating | Retrying | Receiving) → Aborted
//! ```
//!
//! One coordinator drives one operation. It issues attempts through the
//! policy's [`AttemptFactory`](crate::attempt::AttemptFactory), asks the
//! [`RetryPredicate`](crate::predicate::RetryPredicate) about every outcome,
//! waits out the [`Backoff`](crate::backoff::Backoff) delay between attempts
//! and reports each step to a [`RetryObserver`]. The loop in
//! [`RetryCoordinator::run`] is the only place attempts are created, so
//! there is never more than one attempt in flight or more than one timer
//! pending.
//!
//! `Receiving` is the window between accepting a final response and the end
//! of its body; the attempt stays current so an abort still reaches the
//! transport.

use crate::attempt::{
    AttemptContext, AttemptEvent, AttemptHandle, Chunk, Notifier, RequestTarget, ResponseInfo,
};
use crate::config::RetryPolicy;
use crate::error::TransportError;
use crate::events::{RetryEvent, RetryObserver, Terminal};
use crate::predicate::Outcome;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Where an operation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Requesting,
    Evaluating,
    Retrying,
    Receiving,
    Completed,
    Failed,
    Aborted,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed | Phase::Aborted)
    }
}

/// Snapshot of an operation's progress.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    pub phase: Phase,
    /// Attempts issued so far; never exceeds `max_retries + 1`.
    pub attempts_made: u32,
    pub last_error: Option<TransportError>,
    pub last_response: Option<ResponseInfo>,
    pub aborted: bool,
}

struct Inner {
    state: RetryState,
    current: Option<Box<dyn AttemptHandle>>,
}

struct Shared {
    inner: Mutex<Inner>,
    cancel: CancellationToken,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cancellation entry point for one operation. Cheap to clone.
#[derive(Clone)]
pub struct AbortHandle {
    shared: Arc<Shared>,
}

impl AbortHandle {
    /// Cancel the operation.
    ///
    /// Flips the state to [`Phase::Aborted`], cancels a pending retry timer
    /// and aborts the current attempt, all before returning. No response,
    /// completion or error is reported afterwards. A no-op once the
    /// operation has finished or was already aborted.
    pub fn abort(&self) {
        let current = {
            let mut inner = self.shared.lock();
            if inner.state.phase.is_terminal() {
                return;
            }
            inner.state.phase = Phase::Aborted;
            inner.state.aborted = true;
            inner.current.take()
        };
        self.shared.cancel.cancel();
        if let Some(handle) = current {
            handle.abort();
        }
        debug!("retry operation aborted");
    }

    pub fn is_aborted(&self) -> bool {
        self.shared.lock().state.aborted
    }

    pub fn state(&self) -> RetryState {
        self.shared.lock().state.clone()
    }
}

impl std::fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortHandle")
            .field("state", &self.state())
            .finish()
    }
}

/// Drives the attempts of one operation.
pub struct RetryCoordinator {
    target: RequestTarget,
    policy: RetryPolicy,
    shared: Arc<Shared>,
}

impl RetryCoordinator {
    pub fn new(target: RequestTarget, policy: RetryPolicy) -> Self {
        Self {
            target,
            policy,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: RetryState::default(),
                    current: None,
                }),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn state(&self) -> RetryState {
        self.shared.lock().state.clone()
    }

    /// Run the operation on the current Tokio runtime.
    pub fn spawn(self, observer: Arc<dyn RetryObserver>) -> JoinHandle<()> {
        tokio::spawn(self.run(observer))
    }

    /// Drive the operation to a terminal state.
    ///
    /// Returns after the terminal event has been delivered to `observer`, or
    /// as soon as the operation is aborted.
    pub async fn run(self, observer: Arc<dyn RetryObserver>) {
        let max_retries = self.policy.max_retries;
        let mut retries_done = 0u32;
        let mut ordinal = 0u32;

        loop {
            ordinal += 1;
            if !self.enter(Phase::Requesting, |state| state.attempts_made = ordinal) {
                return;
            }
            observer.on_event(&RetryEvent::AttemptStart { ordinal });

            // A fresh channel per attempt: reports from superseded attempts
            // land in a closed channel and vanish.
            let (tx, mut rx) = mpsc::unbounded_channel();
            let ctx = AttemptContext {
                ordinal,
                object_mode: self.policy.object_mode,
            };
            let handle =
                self.policy
                    .factory
                    .make_attempt(&self.target, &ctx, Notifier::new(ordinal, tx));
            if !self.install(handle) {
                return;
            }

            let mut held: Vec<Chunk> = Vec::new();
            let mut ended = false;
            let outcome = loop {
                let event = tokio::select! {
                    biased;
                    _ = self.shared.cancel.cancelled() => return,
                    event = rx.recv() => event,
                };
                match event {
                    Some(AttemptEvent::Response(response)) => break Outcome::Response(response),
                    Some(AttemptEvent::Error(err)) => break Outcome::TransportError(err),
                    Some(AttemptEvent::Data(chunk)) => held.push(chunk),
                    Some(AttemptEvent::End) => ended = true,
                    None => break Outcome::TransportError(TransportError::NoOutcome),
                }
            };

            let Some(finished) = self.evaluate(&outcome) else {
                return;
            };
            let wants_retry = self.policy.predicate.should_retry(&outcome);
            let will_retry = wants_retry && retries_done < max_retries;
            observer.on_event(&RetryEvent::Outcome {
                ordinal,
                outcome: &outcome,
                will_retry,
            });

            if will_retry {
                // Stop the superseded attempt from transferring a body
                // nobody will read.
                finished.abort();
                drop(finished);
                retries_done += 1;
                let delay = self.policy.backoff.delay(retries_done);
                if !self.enter(Phase::Retrying, |_| {}) {
                    return;
                }
                observer.on_event(&RetryEvent::RetryScheduled {
                    retry_number: retries_done,
                    delay,
                });
                trace!(ordinal, delay_ms = delay.as_millis() as u64, "waiting before retry");
                tokio::select! {
                    biased;
                    _ = self.shared.cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }

            let response = match outcome {
                Outcome::Response(response) => response,
                Outcome::TransportError(_) => {
                    drop(finished);
                    self.finish(
                        &observer,
                        Terminal::Failed {
                            outcome,
                            attempts: ordinal,
                        },
                    );
                    return;
                }
            };

            if !self.receive(finished) {
                return;
            }
            for chunk in held.drain(..) {
                observer.on_event(&RetryEvent::Data(&chunk));
            }
            while !ended {
                let event = tokio::select! {
                    biased;
                    _ = self.shared.cancel.cancelled() => return,
                    event = rx.recv() => event,
                };
                match event {
                    Some(AttemptEvent::Data(chunk)) => observer.on_event(&RetryEvent::Data(&chunk)),
                    Some(AttemptEvent::End) | None => ended = true,
                    Some(AttemptEvent::Error(err)) => {
                        // The response was already delivered; an interrupted
                        // body is final.
                        self.finish(
                            &observer,
                            Terminal::Failed {
                                outcome: Outcome::TransportError(err),
                                attempts: ordinal,
                            },
                        );
                        return;
                    }
                    Some(AttemptEvent::Response(_)) => {
                        trace!(ordinal, "ignoring duplicate response report");
                    }
                }
            }

            let terminal = if wants_retry {
                Terminal::Failed {
                    outcome: Outcome::Response(response),
                    attempts: ordinal,
                }
            } else {
                Terminal::Completed {
                    response,
                    attempts: ordinal,
                }
            };
            self.finish(&observer, terminal);
            return;
        }
    }

    /// Move to a non-terminal phase unless the operation was aborted.
    fn enter(&self, phase: Phase, update: impl FnOnce(&mut RetryState)) -> bool {
        let mut inner = self.shared.lock();
        if inner.state.aborted {
            return false;
        }
        inner.state.phase = phase;
        update(&mut inner.state);
        true
    }

    /// Store a freshly issued attempt as current. If an abort raced the
    /// factory call, the new attempt is aborted on the spot.
    fn install(&self, handle: Box<dyn AttemptHandle>) -> bool {
        let rejected = {
            let mut inner = self.shared.lock();
            if inner.state.aborted {
                Some(handle)
            } else {
                inner.current = Some(handle);
                None
            }
        };
        match rejected {
            Some(handle) => {
                handle.abort();
                false
            }
            None => true,
        }
    }

    /// Record the outcome and release the current attempt.
    fn evaluate(&self, outcome: &Outcome) -> Option<Box<dyn AttemptHandle>> {
        let mut inner = self.shared.lock();
        if inner.state.aborted {
            return None;
        }
        inner.state.phase = Phase::Evaluating;
        match outcome {
            Outcome::Response(response) => inner.state.last_response = Some(response.clone()),
            Outcome::TransportError(err) => inner.state.last_error = Some(err.clone()),
        }
        inner.current.take()
    }

    /// Make the final attempt current again while its body arrives. If an
    /// abort landed while the handle was out of `current`, it is aborted
    /// here instead.
    fn receive(&self, handle: Box<dyn AttemptHandle>) -> bool {
        let rejected = {
            let mut inner = self.shared.lock();
            if inner.state.aborted {
                Some(handle)
            } else {
                inner.state.phase = Phase::Receiving;
                inner.current = Some(handle);
                None
            }
        };
        match rejected {
            Some(handle) => {
                handle.abort();
                false
            }
            None => true,
        }
    }

    /// Enter the terminal phase and report it, unless an abort got there
    /// first.
    fn finish(&self, observer: &Arc<dyn RetryObserver>, terminal: Terminal) {
        {
            let mut inner = self.shared.lock();
            if inner.state.aborted {
                return;
            }
            inner.state.phase = match terminal {
                Terminal::Completed { .. } => Phase::Completed,
                Terminal::Failed { .. } => Phase::Failed,
            };
            if let Terminal::Failed {
                outcome: Outcome::TransportError(ref err),
                ..
            } = terminal
            {
                inner.state.last_error = Some(err.clone());
            }
            inner.current = None;
        }
        observer.on_event(&RetryEvent::Terminal(&terminal));
    }
}
