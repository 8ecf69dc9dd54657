//! Fetch a URL with automatic retries and print the response body.
//!
//! The body goes to stdout; logs and a one-line JSON summary go to stderr.
//! Exits with status 1 when the request ends in a transport error.
//!
//! # Examples
//!
//! ```sh
//! # Plain GET with the default budget of two retries
//! retry-request https://example.com/
//!
//! # POST with headers, five retries and debug logging
//! retry-request https://api.example.com/items \
//!   --method POST --header "Content-Type: application/json" \
//!   --data '{"name":"widget"}' --retries 5 -v
//!
//! # Stream an NDJSON endpoint record by record
//! retry-request https://api.example.com/events --object-mode
//! ```

use clap::Parser;
use futures::StreamExt;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use retry_request::{
    CompletedRequest, ConfigError, HttpAttemptFactory, LoggingObserver, RequestTarget,
    RetryOptions, StreamEvent, TransportError, retry_request, retry_request_with_callback,
};
use serde::Serialize;
use std::io::Write;
use std::process;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Fetch a URL with automatic retries and print the response body.
#[derive(Parser)]
#[command(name = "retry-request", version)]
struct Cli {
    // ── Request ────────────────────────────────────────────────
    /// URL to request
    url: String,

    /// HTTP method
    #[arg(long, short = 'X', default_value = "GET")]
    method: String,

    /// Request header as "Name: value" (repeatable)
    #[arg(long = "header", short = 'H')]
    headers: Vec<String>,

    /// Request body
    #[arg(long, short = 'd')]
    data: Option<String>,

    // ── Retry behavior ─────────────────────────────────────────
    /// Retries allowed beyond the first attempt
    #[arg(long, default_value_t = retry_request::DEFAULT_RETRIES)]
    retries: u32,

    /// Per-attempt timeout in seconds (none by default)
    #[arg(long)]
    timeout: Option<u64>,

    // ── Output mode ────────────────────────────────────────────
    /// Parse the body as newline-delimited JSON and print one record per line
    #[arg(long)]
    object_mode: bool,

    /// Buffer the body and print it once the request completes
    #[arg(long)]
    callback: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// What the summary line on stderr reports.
#[derive(Serialize)]
struct Summary {
    status: Option<u16>,
    attempts: u32,
    retries_exhausted: bool,
    bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

// ── Setup ──────────────────────────────────────────────────────────

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Parse repeated `Name: value` arguments into a header map.
fn parse_headers(raw: &[String]) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::new();
    for entry in raw {
        let (name, value) = entry
            .split_once(':')
            .ok_or_else(|| ConfigError::InvalidHeader(entry.clone()))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| ConfigError::InvalidHeader(entry.clone()))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| ConfigError::InvalidHeader(entry.clone()))?;
        headers.append(name, value);
    }
    Ok(headers)
}

fn build_target(cli: &Cli) -> Result<RequestTarget, ConfigError> {
    let method = Method::from_bytes(cli.method.to_ascii_uppercase().as_bytes())
        .map_err(|_| ConfigError::InvalidMethod(cli.method.clone()))?;
    let mut target =
        RequestTarget::new(method, cli.url.clone()).with_headers(parse_headers(&cli.headers)?);
    if let Some(data) = &cli.data {
        target = target.with_body(data.clone());
    }
    Ok(target)
}

fn build_options(cli: &Cli) -> Result<RetryOptions, ConfigError> {
    let mut factory = HttpAttemptFactory::builder();
    if let Some(secs) = cli.timeout {
        factory = factory.timeout(Duration::from_secs(secs));
    }
    Ok(RetryOptions::new()
        .with_retries(cli.retries)
        .with_object_mode(cli.object_mode)
        .with_request(factory.build()?)
        .with_observer(LoggingObserver))
}

// ── Output ─────────────────────────────────────────────────────────

fn write_stdout(bytes: &[u8]) {
    let mut out = std::io::stdout().lock();
    if let Err(e) = out.write_all(bytes).and_then(|()| out.flush()) {
        eprintln!("Error: failed to write output: {e}");
        process::exit(1);
    }
}

fn print_summary(summary: &Summary) {
    match serde_json::to_string(summary) {
        Ok(line) => eprintln!("{line}"),
        Err(e) => eprintln!("Error: failed to encode summary: {e}"),
    }
}

/// Print the summary; the exit code is non-zero on a transport error.
fn report(result: Result<CompletedRequest, TransportError>, attempts: u32, bytes: usize) -> i32 {
    match result {
        Ok(done) => {
            print_summary(&Summary {
                status: Some(done.response.status),
                attempts: done.attempts,
                retries_exhausted: done.retries_exhausted,
                bytes,
                error: None,
            });
            0
        }
        Err(err) => {
            print_summary(&Summary {
                status: None,
                attempts,
                retries_exhausted: false,
                bytes,
                error: Some(err.to_string()),
            });
            1
        }
    }
}

// ── Modes ──────────────────────────────────────────────────────────

async fn run_stream(target: RequestTarget, options: RetryOptions) -> i32 {
    let mut stream = retry_request(target, options);
    let mut last_status = None;
    let mut bytes = 0usize;
    let mut line = Vec::new();

    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Response { response, .. } => last_status = Some(response.status),
            StreamEvent::Data(chunk) => {
                line.clear();
                chunk.append_to(&mut line);
                bytes += line.len();
                write_stdout(&line);
            }
            StreamEvent::Error(err) => {
                let attempts = stream.state().attempts_made;
                print_summary(&Summary {
                    status: None,
                    attempts,
                    retries_exhausted: false,
                    bytes,
                    error: Some(err.to_string()),
                });
                return 1;
            }
            StreamEvent::Complete {
                attempts,
                retries_exhausted,
            } => {
                print_summary(&Summary {
                    status: last_status,
                    attempts,
                    retries_exhausted,
                    bytes,
                    error: None,
                });
                return 0;
            }
        }
    }

    eprintln!("Error: request ended without a result");
    1
}

async fn run_callback(target: RequestTarget, options: RetryOptions) -> i32 {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let handle = retry_request_with_callback(target, options, move |result| {
        let _ = tx.send(result);
    });

    let result = match rx.await {
        Ok(result) => result,
        Err(_) => {
            eprintln!("Error: request ended without a result");
            return 1;
        }
    };
    let attempts = handle.state().attempts_made;
    handle.join().await;

    let bytes = match &result {
        Ok(done) => {
            write_stdout(&done.body);
            done.body.len()
        }
        Err(_) => 0,
    };
    report(result, attempts, bytes)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let parts = build_target(&cli).and_then(|target| Ok((target, build_options(&cli)?)));
    let (target, options) = match parts {
        Ok(parts) => parts,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    let code = if cli.callback {
        run_callback(target, options).await
    } else {
        run_stream(target, options).await
    };
    process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_headers() {
        let headers = parse_headers(&[
            "Content-Type: application/json".to_string(),
            "X-Trace:abc".to_string(),
        ])
        .unwrap();
        assert_eq!(headers["content-type"], "application/json");
        assert_eq!(headers["x-trace"], "abc");
    }

    #[test]
    fn rejects_header_without_colon() {
        let err = parse_headers(&["NoColon".to_string()]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHeader(_)));
    }

    #[test]
    fn builds_target_from_flags() {
        let cli = Cli::parse_from([
            "retry-request",
            "http://localhost/items",
            "-X",
            "post",
            "-H",
            "Accept: */*",
            "-d",
            "payload",
        ]);
        let target = build_target(&cli).unwrap();
        assert_eq!(target.method, Method::POST);
        assert_eq!(target.url, "http://localhost/items");
        assert_eq!(target.body.as_deref(), Some(&b"payload"[..]));
        assert_eq!(target.headers["accept"], "*/*");
        assert_eq!(cli.retries, retry_request::DEFAULT_RETRIES);
    }

    #[test]
    fn rejects_bad_method() {
        let cli = Cli::parse_from(["retry-request", "http://localhost/", "-X", "GE T"]);
        assert!(matches!(build_target(&cli), Err(ConfigError::InvalidMethod(_))));
    }
}
