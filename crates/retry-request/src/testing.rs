//! Scripted attempt factories and recording observers for unit tests.

use crate::attempt::{
    AttemptContext, AttemptFactory, AttemptHandle, Notifier, RequestTarget, ResponseInfo,
};
use crate::error::TransportError;
use crate::events::{RetryEvent, RetryObserver, Terminal};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// What one scripted attempt does.
#[derive(Debug, Clone)]
pub(crate) enum Script {
    /// Respond with a status and a complete body.
    Status(u16, &'static str),
    /// Fail before producing a response.
    Error(TransportError),
    /// Never report anything; keep the attempt open until aborted.
    Hang,
    /// Drop the notifier without reporting.
    Silent,
    /// Respond, send part of the body, then fail mid-transfer.
    Truncated(u16),
    /// Respond, send part of the body, and keep the transfer open until
    /// aborted.
    Streaming(u16),
}

impl Script {
    pub(crate) fn status(code: u16, body: &'static str) -> Self {
        Script::Status(code, body)
    }

    pub(crate) fn error(message: &str) -> Self {
        Script::Error(TransportError::other(message))
    }
}

struct CountingHandle {
    aborts: Arc<AtomicU32>,
    // Keeps the channel open for `Script::Hang`.
    _notify: Option<Notifier>,
}

impl AttemptHandle for CountingHandle {
    fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Plays back a script, one entry per attempt; the last entry repeats.
pub(crate) struct ScriptedFactory {
    script: Vec<Script>,
    deferred: bool,
    attempts: AtomicU32,
    aborts: Mutex<Vec<Arc<AtomicU32>>>,
    contexts: Mutex<Vec<AttemptContext>>,
}

impl ScriptedFactory {
    /// Reports synchronously from inside `make_attempt`.
    pub(crate) fn new(script: Vec<Script>) -> Arc<Self> {
        Self::with_mode(script, false)
    }

    /// `deferred = true` reports from a spawned task instead.
    pub(crate) fn with_mode(script: Vec<Script>, deferred: bool) -> Arc<Self> {
        Arc::new(Self {
            script,
            deferred,
            attempts: AtomicU32::new(0),
            aborts: Mutex::new(Vec::new()),
            contexts: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// How many times each attempt's handle was aborted, in attempt order.
    pub(crate) fn abort_counts(&self) -> Vec<u32> {
        self.aborts
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.load(Ordering::SeqCst))
            .collect()
    }

    pub(crate) fn contexts(&self) -> Vec<AttemptContext> {
        self.contexts.lock().unwrap().clone()
    }

    fn play(step: Script, notify: Notifier) -> Option<Notifier> {
        match step {
            Script::Status(code, body) => notify.respond(ResponseInfo::new(code), body),
            Script::Error(err) => notify.error(err),
            Script::Hang => return Some(notify),
            Script::Silent => {}
            Script::Truncated(code) => {
                notify.response(ResponseInfo::new(code));
                notify.data("partial");
                notify.error(TransportError::Body("connection reset".into()));
            }
            Script::Streaming(code) => {
                notify.response(ResponseInfo::new(code));
                notify.data("partial");
                return Some(notify);
            }
        }
        None
    }
}

impl AttemptFactory for ScriptedFactory {
    fn make_attempt(
        &self,
        _target: &RequestTarget,
        ctx: &AttemptContext,
        notify: Notifier,
    ) -> Box<dyn AttemptHandle> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst) as usize;
        self.contexts.lock().unwrap().push(*ctx);
        let aborts = Arc::new(AtomicU32::new(0));
        self.aborts.lock().unwrap().push(aborts.clone());

        let step = self
            .script
            .get(n)
            .or_else(|| self.script.last())
            .cloned()
            .unwrap_or(Script::Hang);

        let kept = if self.deferred && !matches!(step, Script::Hang | Script::Streaming(_)) {
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                Self::play(step, notify);
            });
            None
        } else {
            Self::play(step, notify)
        };
        Box::new(CountingHandle {
            aborts,
            _notify: kept,
        })
    }
}

#[derive(Default)]
struct Log {
    events: usize,
    body: Vec<u8>,
    scheduled: Vec<u32>,
    terminal: Option<Terminal>,
}

/// Observer that records what the coordinator reported.
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    log: Arc<Mutex<Log>>,
}

impl Recorder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn observer(&self) -> Arc<dyn RetryObserver> {
        Arc::new(self.clone())
    }

    pub(crate) fn body(&self) -> Vec<u8> {
        self.log.lock().unwrap().body.clone()
    }

    pub(crate) fn scheduled(&self) -> Vec<u32> {
        self.log.lock().unwrap().scheduled.clone()
    }

    pub(crate) fn terminal(&self) -> Option<Terminal> {
        self.log.lock().unwrap().terminal.clone()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.log.lock().unwrap().events == 0
    }
}

impl RetryObserver for Recorder {
    fn on_event(&self, event: &RetryEvent<'_>) {
        let mut log = self.log.lock().unwrap();
        log.events += 1;
        match event {
            RetryEvent::Data(chunk) => chunk.append_to(&mut log.body),
            RetryEvent::RetryScheduled { retry_number, .. } => log.scheduled.push(*retry_number),
            RetryEvent::Terminal(terminal) => {
                assert!(log.terminal.is_none(), "terminal reported twice");
                log.terminal = Some((*terminal).clone());
            }
            RetryEvent::AttemptStart { .. } | RetryEvent::Outcome { .. } => {}
        }
    }
}
