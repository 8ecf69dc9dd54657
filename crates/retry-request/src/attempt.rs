//! The attempt seam: one execution of the underlying network operation.
//!
//! An [`AttemptFactory`] starts an attempt for a [`RequestTarget`] and
//! returns an [`AttemptHandle`] the coordinator can abort. The attempt
//! reports what happens through the [`Notifier`] it was given:
//!
//! 1. exactly one outcome: [`Notifier::response`] or [`Notifier::error`];
//! 2. zero or more body chunks via [`Notifier::data`];
//! 3. [`Notifier::end`] once the body is complete.
//!
//! Reports may be made synchronously inside `make_attempt` or later from a
//! spawned task; the coordinator handles both the same way. Dropping every
//! clone of the notifier without reporting an outcome counts as
//! [`TransportError::NoOutcome`].

use crate::error::TransportError;
use bytes::Bytes;
use reqwest::Method;
use reqwest::header::HeaderMap;
use tokio::sync::mpsc;

// ── Target ─────────────────────────────────────────────────────────

/// What to request. Passed to the attempt factory untouched on every
/// attempt; nothing here is parsed or validated by the retry engine.
#[derive(Debug, Clone)]
pub struct RequestTarget {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl RequestTarget {
    /// A `GET` request with no extra headers.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Per-attempt parameters handed to the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptContext {
    /// 1 for the first attempt, incremented for each retry.
    pub ordinal: u32,
    /// Deliver parsed records instead of raw byte chunks. The same value is
    /// passed to every attempt of one operation.
    pub object_mode: bool,
}

// ── Outcome payloads ───────────────────────────────────────────────

/// Response descriptor: everything the retry engine and its consumers learn
/// about a response before its body.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseInfo {
    pub status: u16,
    pub headers: HeaderMap,
    /// Final URL after redirects, when the transport knows it.
    pub url: Option<String>,
}

impl ResponseInfo {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            url: None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl From<&reqwest::Response> for ResponseInfo {
    fn from(resp: &reqwest::Response) -> Self {
        Self {
            status: resp.status().as_u16(),
            headers: resp.headers().clone(),
            url: Some(resp.url().to_string()),
        }
    }
}

/// A piece of response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    /// Raw bytes (the default mode).
    Bytes(Bytes),
    /// One parsed record (object mode).
    Record(serde_json::Value),
}

impl Chunk {
    /// Size in bytes for raw chunks, 1 for records.
    pub fn len(&self) -> usize {
        match self {
            Chunk::Bytes(b) => b.len(),
            Chunk::Record(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append this chunk to a byte buffer. Records are written as one JSON
    /// line each.
    pub fn append_to(&self, buf: &mut Vec<u8>) {
        match self {
            Chunk::Bytes(b) => buf.extend_from_slice(b),
            Chunk::Record(value) => {
                buf.extend_from_slice(value.to_string().as_bytes());
                buf.push(b'\n');
            }
        }
    }
}

impl From<Bytes> for Chunk {
    fn from(b: Bytes) -> Self {
        Chunk::Bytes(b)
    }
}

impl From<&'static str> for Chunk {
    fn from(s: &'static str) -> Self {
        Chunk::Bytes(Bytes::from_static(s.as_bytes()))
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(v: Vec<u8>) -> Self {
        Chunk::Bytes(Bytes::from(v))
    }
}

impl From<serde_json::Value> for Chunk {
    fn from(v: serde_json::Value) -> Self {
        Chunk::Record(v)
    }
}

// ── Notification channel ───────────────────────────────────────────

#[derive(Debug)]
pub(crate) enum AttemptEvent {
    Response(ResponseInfo),
    Error(TransportError),
    Data(Chunk),
    End,
}

/// Reporting side of one attempt. Cheap to clone; reports sent after the
/// coordinator has moved on (retry, abort, completion) are dropped.
#[derive(Debug, Clone)]
pub struct Notifier {
    ordinal: u32,
    tx: mpsc::UnboundedSender<AttemptEvent>,
}

impl Notifier {
    pub(crate) fn new(ordinal: u32, tx: mpsc::UnboundedSender<AttemptEvent>) -> Self {
        Self { ordinal, tx }
    }

    /// Ordinal of the attempt this notifier belongs to.
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Report that a response arrived.
    pub fn response(&self, response: ResponseInfo) {
        self.send(AttemptEvent::Response(response));
    }

    /// Report a transport failure.
    pub fn error(&self, err: TransportError) {
        self.send(AttemptEvent::Error(err));
    }

    pub fn data(&self, chunk: impl Into<Chunk>) {
        self.send(AttemptEvent::Data(chunk.into()));
    }

    /// Report that the body is complete.
    pub fn end(&self) {
        self.send(AttemptEvent::End);
    }

    /// Report a response with its whole body in one go.
    pub fn respond(&self, response: ResponseInfo, body: impl Into<Chunk>) {
        self.response(response);
        let chunk = body.into();
        if !chunk.is_empty() {
            self.data(chunk);
        }
        self.end();
    }

    /// `true` once nobody is listening to this attempt any more.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, event: AttemptEvent) {
        // The receiver is gone once the attempt is superseded or aborted.
        let _ = self.tx.send(event);
    }
}

// ── Capability traits ──────────────────────────────────────────────

/// Cancellation side of one attempt.
pub trait AttemptHandle: Send + Sync {
    /// Cancel in-flight work. Must be a no-op once the attempt has finished.
    fn abort(&self);
}

/// Handle for attempts that finish synchronously and have nothing to cancel.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandle;

impl AttemptHandle for NoopHandle {
    fn abort(&self) {}
}

/// Starts one attempt. The default implementation is
/// [`HttpAttemptFactory`](crate::transport::HttpAttemptFactory); callers
/// substitute their own through
/// [`RetryOptions::with_request`](crate::config::RetryOptions::with_request).
///
/// # Example
///
/// ```
/// use retry_request::{AttemptContext, AttemptFactory, AttemptHandle, NoopHandle};
/// use retry_request::{Notifier, RequestTarget, ResponseInfo};
///
/// struct AlwaysOk;
///
/// impl AttemptFactory for AlwaysOk {
///     fn make_attempt(
///         &self,
///         _target: &RequestTarget,
///         _ctx: &AttemptContext,
///         notify: Notifier,
///     ) -> Box<dyn AttemptHandle> {
///         notify.respond(ResponseInfo::new(200), "ok");
///         Box::new(NoopHandle)
///     }
/// }
/// ```
pub trait AttemptFactory: Send + Sync {
    fn make_attempt(
        &self,
        target: &RequestTarget,
        ctx: &AttemptContext,
        notify: Notifier,
    ) -> Box<dyn AttemptHandle>;
}

impl<T: AttemptFactory + ?Sized> AttemptFactory for std::sync::Arc<T> {
    fn make_attempt(
        &self,
        target: &RequestTarget,
        ctx: &AttemptContext,
        notify: Notifier,
    ) -> Box<dyn AttemptHandle> {
        (**self).make_attempt(target, ctx, notify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn respond_sends_outcome_body_and_end() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let notify = Notifier::new(1, tx);
        notify.respond(ResponseInfo::new(200), "hello");
        drop(notify);

        assert!(matches!(rx.try_recv(), Ok(AttemptEvent::Response(r)) if r.status == 200));
        assert!(matches!(rx.try_recv(), Ok(AttemptEvent::Data(Chunk::Bytes(b))) if b == "hello"));
        assert!(matches!(rx.try_recv(), Ok(AttemptEvent::End)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn respond_skips_empty_body() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        Notifier::new(1, tx).respond(ResponseInfo::new(204), "");
        assert!(matches!(rx.try_recv(), Ok(AttemptEvent::Response(_))));
        assert!(matches!(rx.try_recv(), Ok(AttemptEvent::End)));
    }

    #[test]
    fn reports_after_receiver_dropped_are_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        let notify = Notifier::new(3, tx);
        drop(rx);
        assert!(notify.is_closed());
        notify.error(TransportError::other("late"));
        assert_eq!(notify.ordinal(), 3);
    }

    #[test]
    fn records_append_as_json_lines() {
        let mut buf = Vec::new();
        Chunk::Record(serde_json::json!({"a": 1})).append_to(&mut buf);
        Chunk::from("tail").append_to(&mut buf);
        assert_eq!(buf, b"{\"a\":1}\ntail");
    }

    #[test]
    fn success_range() {
        assert!(ResponseInfo::new(204).is_success());
        assert!(!ResponseInfo::new(404).is_success());
    }
}
