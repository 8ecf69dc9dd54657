//! Default attempt factory: one HTTP request per attempt over `reqwest`.
//!
//! Each attempt runs on its own Tokio task. The response head is reported as
//! soon as it arrives; the body is then read incrementally via
//! `Response::chunk()` and forwarded chunk by chunk, so a slow body never
//! delays the retry decision. In object mode the body is treated as
//! newline-delimited JSON and each line is forwarded as one record.

use crate::attempt::{
    AttemptContext, AttemptFactory, AttemptHandle, Chunk, NoopHandle, Notifier, RequestTarget,
    ResponseInfo,
};
use crate::error::{ConfigError, TransportError};
use reqwest::header::HeaderMap;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const DEFAULT_USER_AGENT: &str = concat!("retry-request/", env!("CARGO_PKG_VERSION"));

/// Sends a [`RequestTarget`] with a shared `reqwest::Client`.
///
/// The [`Default`] factory builds its client on the first attempt. If that
/// fails (for example when the TLS backend cannot initialise), every attempt
/// reports a [`TransportError::Request`] instead of panicking.
#[derive(Debug, Clone, Default)]
pub struct HttpAttemptFactory {
    client: OnceLock<Result<reqwest::Client, String>>,
}

impl HttpAttemptFactory {
    /// A factory with default client settings.
    pub fn new() -> Result<Self, ConfigError> {
        Self::builder().build()
    }

    pub fn builder() -> HttpAttemptFactoryBuilder {
        HttpAttemptFactoryBuilder::default()
    }

    /// Use an existing client, including whatever TLS, proxy and header
    /// configuration it carries.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: OnceLock::from(Ok(client)),
        }
    }

    fn client(&self) -> Result<&reqwest::Client, TransportError> {
        self.client
            .get_or_init(|| {
                reqwest::Client::builder()
                    .user_agent(DEFAULT_USER_AGENT)
                    .build()
                    .map_err(|e| e.to_string())
            })
            .as_ref()
            .map_err(|e| TransportError::Request(format!("failed to build HTTP client: {e}")))
    }
}

impl AttemptFactory for HttpAttemptFactory {
    fn make_attempt(
        &self,
        target: &RequestTarget,
        ctx: &AttemptContext,
        notify: Notifier,
    ) -> Box<dyn AttemptHandle> {
        let client = match self.client() {
            Ok(client) => client,
            Err(err) => {
                notify.error(err);
                return Box::new(NoopHandle);
            }
        };
        let mut request = client
            .request(target.method.clone(), target.url.as_str())
            .headers(target.headers.clone());
        if let Some(body) = &target.body {
            request = request.body(body.clone());
        }
        debug!(
            ordinal = ctx.ordinal,
            method = %target.method,
            url = %target.url,
            "sending HTTP request"
        );
        let task = tokio::spawn(run_attempt(request, ctx.object_mode, notify));
        Box::new(TaskHandle(task.abort_handle()))
    }
}

/// Aborts the Tokio task running an attempt. Aborting a finished task does
/// nothing.
#[derive(Debug)]
pub struct TaskHandle(pub tokio::task::AbortHandle);

impl AttemptHandle for TaskHandle {
    fn abort(&self) {
        self.0.abort();
    }
}

async fn run_attempt(request: reqwest::RequestBuilder, object_mode: bool, notify: Notifier) {
    let ordinal = notify.ordinal();
    let start = Instant::now();

    let mut resp = match request.send().await {
        Ok(resp) => resp,
        Err(err) => {
            debug!(ordinal, error = %err, "HTTP request failed");
            notify.error(err.into());
            return;
        }
    };

    let info = ResponseInfo::from(&resp);
    debug!(
        ordinal,
        status = info.status,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "received HTTP response"
    );
    notify.response(info);

    let mut records = RecordDecoder::default();
    let mut total = 0usize;
    loop {
        let bytes = match resp.chunk().await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => break,
            Err(err) => {
                notify.error(TransportError::Body(err.to_string()));
                return;
            }
        };
        total += bytes.len();
        if !object_mode {
            notify.data(Chunk::Bytes(bytes));
            continue;
        }
        for record in records.push(&bytes) {
            match record {
                Ok(value) => notify.data(Chunk::Record(value)),
                Err(err) => {
                    notify.error(err);
                    return;
                }
            }
        }
    }

    if object_mode {
        match records.finish() {
            Some(Ok(value)) => notify.data(Chunk::Record(value)),
            Some(Err(err)) => {
                notify.error(err);
                return;
            }
            None => {}
        }
    }

    trace!(
        ordinal,
        bytes = total,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "HTTP body complete"
    );
    notify.end();
}

/// Splits a byte stream into newline-delimited JSON records.
///
/// Works on raw bytes so a multi-byte UTF-8 sequence split across two chunks
/// is reassembled before parsing. Bytes already searched for a newline are
/// not searched again.
#[derive(Debug, Default)]
struct RecordDecoder {
    buffer: Vec<u8>,
    scanned: usize,
}

impl RecordDecoder {
    /// Feed a chunk; returns every record completed by it.
    fn push(&mut self, bytes: &[u8]) -> Vec<Result<serde_json::Value, TransportError>> {
        self.buffer.extend_from_slice(bytes);
        let mut records = Vec::new();
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
            let newline_pos = self.scanned + offset;
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            self.scanned = 0;
            if let Some(record) = parse_line(&line) {
                records.push(record);
            }
        }
        self.scanned = self.buffer.len();
        records
    }

    /// Parse whatever is left once the body ends without a trailing newline.
    fn finish(&mut self) -> Option<Result<serde_json::Value, TransportError>> {
        self.scanned = 0;
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest)
    }
}

fn parse_line(line: &[u8]) -> Option<Result<serde_json::Value, TransportError>> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_slice(line).map_err(|e| TransportError::Decode(e.to_string())))
}

/// Builder for [`HttpAttemptFactory`].
#[derive(Debug, Default)]
pub struct HttpAttemptFactoryBuilder {
    timeout: Option<Duration>,
    user_agent: Option<String>,
    default_headers: Option<HeaderMap>,
}

impl HttpAttemptFactoryBuilder {
    /// Per-attempt timeout. Unset by default: the retry engine imposes no
    /// timeout of its own.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = Some(headers);
        self
    }

    pub fn build(self) -> Result<HttpAttemptFactory, ConfigError> {
        let mut builder = reqwest::Client::builder().user_agent(
            self.user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        );
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(headers) = self.default_headers {
            builder = builder.default_headers(headers);
        }
        Ok(HttpAttemptFactory::with_client(builder.build()?))
    }
}
