//! Probe engine: one HEAD-then-optional-GET sequence against a URL.

use std::time::{Duration, Instant};

use reqwest::{Client, Response, StatusCode};

use crate::models::CheckHeaders;

/// Normalized outcome of a probe, independent of storage.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// HTTP status of the final response; None when transport failed.
    pub status: Option<u16>,
    pub headers: CheckHeaders,
    pub timeout: bool,
    pub error: Option<String>,
    pub response_time_ms: i64,
    /// Whether the probe fell back to a GET after the HEAD.
    pub performed_get: bool,
}

impl ProbeResult {
    /// Availability surfaced in notifications: unknown when throttled,
    /// available on 2xx, unavailable otherwise.
    pub fn available(&self) -> Option<bool> {
        match self.status {
            Some(429) => None,
            Some(status) if (200..300).contains(&status) => Some(true),
            _ => Some(false),
        }
    }

    /// Whether the scheduler should place the resource in backoff.
    pub fn needs_backoff(&self) -> bool {
        self.status == Some(429) || self.status.is_none()
    }
}

/// HTTP prober with a fixed user agent and hard per-request timeout.
#[derive(Debug, Clone)]
pub struct ProbeEngine {
    client: Client,
}

impl ProbeEngine {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()?;
        Ok(Self { client })
    }

    /// The underlying client, shared with the download path so analysis
    /// reuses the same identity and timeout.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Probe a URL: HEAD first, then GET when the HEAD was inconclusive
    /// (501, non-2xx, or 2xx without a Content-Length). The GET response
    /// body is never read; headers are all the probe needs.
    pub async fn probe(&self, url: &str) -> ProbeResult {
        let started = Instant::now();

        match self.client.head(url).send().await {
            Ok(response) if !switch_to_get(&response) => self.finish(Ok(response), started, false),
            Ok(_) => {
                let outcome = self.client.get(url).send().await;
                self.finish(outcome, started, true)
            }
            Err(e) => self.finish(Err(e), started, false),
        }
    }

    fn finish(
        &self,
        outcome: Result<Response, reqwest::Error>,
        started: Instant,
        performed_get: bool,
    ) -> ProbeResult {
        let response_time_ms = started.elapsed().as_millis() as i64;
        match outcome {
            Ok(response) => {
                let status = response.status();
                let error = if status.as_u16() >= 400 {
                    status.canonical_reason().map(String::from)
                } else {
                    None
                };
                ProbeResult {
                    status: Some(status.as_u16()),
                    headers: capture_headers(&response),
                    timeout: false,
                    error,
                    response_time_ms,
                    performed_get,
                }
            }
            Err(e) => {
                let timeout = e.is_timeout();
                ProbeResult {
                    status: None,
                    headers: CheckHeaders::default(),
                    timeout,
                    error: if timeout {
                        None
                    } else {
                        Some(e.without_url().to_string())
                    },
                    response_time_ms,
                    performed_get,
                }
            }
        }
    }
}

/// A GET follows the HEAD iff the HEAD returned 501, a non-2xx status, or a
/// 2xx response without a usable Content-Length.
fn should_switch(status: StatusCode, content_length: Option<&str>) -> bool {
    if status == StatusCode::NOT_IMPLEMENTED || !status.is_success() {
        return true;
    }
    content_length.map(|v| v.trim().is_empty()).unwrap_or(true)
}

fn switch_to_get(head: &Response) -> bool {
    should_switch(
        head.status(),
        head.headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok()),
    )
}

fn capture_headers(response: &Response) -> CheckHeaders {
    let mut headers = CheckHeaders::default();
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            headers
                .0
                .insert(name.as_str().to_lowercase(), value.to_string());
        }
    }
    headers
}
