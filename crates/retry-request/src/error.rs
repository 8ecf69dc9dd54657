//! Error types shared by the transport, the coordinator and the CLI.

use thiserror::Error;

/// An attempt failed without producing a response, or its body transfer was
/// interrupted after the response arrived.
///
/// Always eligible for retry under the default predicate. It only reaches the
/// caller when the retry budget is exhausted or the active predicate declines
/// it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("failed to read response body: {0}")]
    Body(String),
    #[error("failed to decode record: {0}")]
    Decode(String),
    #[error("attempt ended without reporting an outcome")]
    NoOutcome,
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn other(message: impl Into<String>) -> Self {
        TransportError::Other(message.into())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let message = err.to_string();
        if err.is_timeout() {
            TransportError::Timeout(message)
        } else if err.is_connect() {
            TransportError::Connect(message)
        } else if err.is_body() {
            TransportError::Body(message)
        } else if err.is_decode() {
            TransportError::Decode(message)
        } else {
            TransportError::Request(message)
        }
    }
}

/// Problems building a request target or HTTP client from user input.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid header {0:?}: expected `Name: value`")]
    InvalidHeader(String),
    #[error("invalid HTTP method {0:?}")]
    InvalidMethod(String),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}
