//! Per-user HTTP session with request instrumentation.
//!
//! Every request sent through an [`HttpSession`] is timed, classified and
//! handed to the shared [`Recorder`]. Scenarios never see or handle errors.

use crate::metrics::Recorder;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Why a request counted as a failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RequestError {
    #[error("connection error: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP {0}")]
    Status(u16),

    #[error("failed to read body: {0}")]
    Body(String),

    #[error("request error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for RequestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RequestError::Timeout
        } else if err.is_connect() {
            RequestError::Connect(err.to_string())
        } else {
            RequestError::Other(err.to_string())
        }
    }
}

/// Outcome of one instrumented request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEvent {
    pub method: String,
    /// Stats key, the request path as passed by the scenario.
    pub name: String,
    pub url: String,
    /// 0 when no response was received.
    pub status: u16,
    pub latency_us: u64,
    pub bytes: usize,
    pub error: Option<RequestError>,
    /// Milliseconds since the recorder was created.
    pub elapsed_ms: u64,
}

impl RequestEvent {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Stats key grouping requests by method and name, e.g. `GET /query`.
    pub fn endpoint(&self) -> String {
        format!("{} {}", self.method, self.name)
    }
}

/// HTTP client bound to a base host, shared by the tasks of one user.
#[derive(Clone)]
pub struct HttpSession {
    client: reqwest::Client,
    host: String,
    recorder: Arc<Recorder>,
}

impl HttpSession {
    pub fn new(client: reqwest::Client, host: &str, recorder: Arc<Recorder>) -> Self {
        Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            recorder,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Absolute URL for a path relative to the host.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.host, path)
        } else {
            format!("{}/{}", self.host, path)
        }
    }

    /// Send one GET request with an empty body and record its outcome.
    pub async fn get(&self, path: &str) -> RequestEvent {
        let url = self.url_for(path);
        let start = Instant::now();

        let (status, bytes, error) = match self.client.get(&url).send().await {
            Ok(response) => {
                let status = response.status();
                match response.bytes().await {
                    Ok(body) if status.is_success() => (status.as_u16(), body.len(), None),
                    Ok(body) => (
                        status.as_u16(),
                        body.len(),
                        Some(RequestError::Status(status.as_u16())),
                    ),
                    Err(e) => (status.as_u16(), 0, Some(RequestError::Body(e.to_string()))),
                }
            }
            Err(e) => (0, 0, Some(RequestError::from(e))),
        };

        let event = RequestEvent {
            method: "GET".to_string(),
            name: path.to_string(),
            url,
            status,
            latency_us: start.elapsed().as_micros() as u64,
            bytes,
            error,
            elapsed_ms: self.recorder.elapsed_ms(),
        };

        self.recorder.record(&event).await;
        event
    }
}
