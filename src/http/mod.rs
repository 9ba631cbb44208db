//! Blocking HTTP GET over libcurl with retry and backoff.
//!
//! Every request uses its own `curl::easy::Easy` handle so the functions are
//! safe to call from rayon worker threads.

pub mod retry;

pub use retry::{ErrorKind, RetryDecision, RetryPolicy, classify_curl_error, classify_http_status};

use curl::easy::{Easy, List};
use serde::de::DeserializeOwned;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("curl: {0}")]
    Curl(#[from] curl::Error),

    #[error("HTTP {status} from {url}: {body}")]
    Status { url: String, status: u32, body: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HttpError {
    /// Retry classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HttpError::Curl(e) => classify_curl_error(e),
            HttpError::Status { status, .. } => classify_http_status(*status),
            HttpError::Io(_) => ErrorKind::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            request: Duration::from_secs(60),
        }
    }
}

/// Status and body of a completed request.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u32,
    pub body: Vec<u8>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Performs one GET and returns whatever the server answered, any status.
pub fn get(url: &str, headers: &[(&str, &str)], timeouts: Timeouts) -> Result<Response, HttpError> {
    let mut easy = Easy::new();
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.connect_timeout(timeouts.connect)?;
    easy.timeout(timeouts.request)?;
    easy.useragent(concat!("landlensdb/", env!("CARGO_PKG_VERSION")))?;

    if !headers.is_empty() {
        let mut list = List::new();
        for (name, value) in headers {
            list.append(&format!("{name}: {value}"))?;
        }
        easy.http_headers(list)?;
    }

    let mut body = Vec::new();
    {
        let mut transfer = easy.transfer();
        transfer.write_function(|data| {
            body.extend_from_slice(data);
            Ok(data.len())
        })?;
        transfer.perform()?;
    }

    let status = easy.response_code()?;
    Ok(Response { status, body })
}

/// Like [`get`], but a non-2xx status becomes [`HttpError::Status`].
pub fn get_ok(url: &str, headers: &[(&str, &str)], timeouts: Timeouts) -> Result<Response, HttpError> {
    let response = get(url, headers, timeouts)?;
    if response.is_success() {
        Ok(response)
    } else {
        Err(HttpError::Status {
            url: strip_query(url),
            status: response.status,
            body: response.text(),
        })
    }
}

/// [`get_ok`] repeated until it succeeds or `policy` gives up.
pub fn get_with_retry(
    url: &str,
    headers: &[(&str, &str)],
    timeouts: Timeouts,
    policy: &RetryPolicy,
) -> Result<Response, HttpError> {
    run_with_retry(policy, || get_ok(url, headers, timeouts))
}

/// Downloads `url` to `dest`, creating parent directories. Returns the number of bytes written.
///
/// The body is written to a `.part` file first and renamed when complete.
pub fn download_to_file(
    url: &str,
    dest: &Path,
    timeouts: Timeouts,
    policy: &RetryPolicy,
) -> Result<u64, HttpError> {
    let response = get_with_retry(url, &[], timeouts, policy)?;
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let part = dest.with_extension("part");
    {
        let mut file = fs::File::create(&part)?;
        file.write_all(&response.body)?;
        file.sync_all()?;
    }
    fs::rename(&part, dest)?;
    Ok(response.body.len() as u64)
}

/// Runs `op` until it succeeds or the policy stops retrying. Sleeps between attempts.
pub fn run_with_retry<T, F>(policy: &RetryPolicy, mut op: F) -> Result<T, HttpError>
where
    F: FnMut() -> Result<T, HttpError>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => match policy.decide(attempt, err.kind()) {
                RetryDecision::NoRetry => return Err(err),
                RetryDecision::RetryAfter(delay) => {
                    tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "request failed, retrying");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            },
        }
    }
}

/// URL without its query string, so access tokens never end up in logs or errors.
fn strip_query(url: &str) -> String {
    url.split('?').next().unwrap_or(url).to_string()
}
