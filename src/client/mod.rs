//! Multi-backend failover client.
//!
//! Candidates come from the configured backend list, normalized and ordered
//! with local hosts last. The chat call streams events from the first
//! candidate that answers; bounded calls retry each URL before moving on.

pub mod bounded;
pub mod streaming;

pub use streaming::{EventStream, StreamCanceller};

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::error::{CandidateError, ClientError};
use crate::transport::{ordered_candidates, BackendCandidate, HttpTransport, RetryPolicy};

const ERROR_BODY_MAX_CHARS: usize = 512;

pub struct FailoverStreamClient {
    transport: Arc<HttpTransport>,
    backends: Vec<String>,
    release_urls: Vec<String>,
    concurrent: bool,
    stream_timeout: Option<Duration>,
    request_timeout: Duration,
    channel_capacity: usize,
    retry: RetryPolicy,
}

impl FailoverStreamClient {
    #[must_use]
    pub fn new(transport: Arc<HttpTransport>, config: &AppConfig) -> Self {
        Self {
            transport,
            backends: config.backends.as_slice().to_vec(),
            release_urls: config.release_urls.clone(),
            concurrent: config.concurrent_requests_enabled,
            stream_timeout: config.transport.stream_timeout(),
            request_timeout: config.transport.request_timeout(),
            channel_capacity: config.stream.channel_capacity.max(1),
            retry: RetryPolicy::from_config(&config.retry),
        }
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<HttpTransport> {
        &self.transport
    }

    #[must_use]
    pub fn is_concurrent(&self) -> bool {
        self.concurrent
    }

    /// Ordered candidates, or a configuration error when none are usable.
    pub(crate) fn candidates(&self) -> Result<Vec<BackendCandidate>, ClientError> {
        let candidates = ordered_candidates(&self.backends);
        if candidates.is_empty() {
            return Err(ClientError::Configuration(
                "no backend servers configured".to_string(),
            ));
        }
        Ok(candidates)
    }
}

/// Turn a non-success response into a candidate error, reading the body
/// best-effort.
pub(crate) async fn status_error(url: &str, response: reqwest::Response) -> CandidateError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let body = match body.char_indices().nth(ERROR_BODY_MAX_CHARS) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body,
    };
    tracing::warn!(candidate = url, status, "backend returned error status");
    CandidateError::status(url, status, body)
}
