use std::time::{Duration, SystemTime};

use http::header::RETRY_AFTER;

use crate::config::RetryConfig;
use crate::error::{CandidateError, CandidateFailure};

/// Per-candidate retry schedule for bounded calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_step: Duration,
    pub retry_after_max: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_step: Duration::from_millis(config.backoff_step_ms),
            retry_after_max: Duration::from_secs(config.retry_after_max_secs),
        }
    }

    /// Linear backoff: `step * (attempt + 1)` for the zero-based `attempt`
    /// that just failed.
    #[inline]
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_step.saturating_mul(attempt.saturating_add(1))
    }

    /// Delay before the next attempt, preferring a `Retry-After` header.
    #[must_use]
    pub fn retry_delay(&self, headers: Option<&http::HeaderMap>, attempt: u32) -> Duration {
        headers
            .and_then(|headers| parse_retry_after_delay(headers, self.retry_after_max))
            .unwrap_or_else(|| self.backoff_delay(attempt))
    }

    /// Whether another attempt against the same URL is worthwhile.
    #[must_use]
    pub fn should_retry(&self, error: &CandidateError, attempt: u32) -> bool {
        if attempt.saturating_add(1) >= self.max_attempts {
            return false;
        }
        match &error.failure {
            CandidateFailure::Status { status, .. } => should_retry_upstream_status(*status),
            CandidateFailure::Transport(message) => should_retry_transport_message(message),
            CandidateFailure::Timeout(_) => true,
            CandidateFailure::Malformed(_) => false,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[inline]
pub(crate) fn should_retry_upstream_status(status: u16) -> bool {
    matches!(status, 408 | 425 | 429 | 500 | 502 | 503 | 504 | 529)
}

#[inline]
pub(crate) fn should_retry_transport_message(message: &str) -> bool {
    const NEEDLES: [&[u8]; 10] = [
        b"timed out",
        b"timeout",
        b"connection reset",
        b"connection aborted",
        b"connection closed",
        b"broken pipe",
        b"http2 error",
        b"connection refused",
        b"unexpected eof",
        b"error sending request",
    ];
    let haystack = message.as_bytes();
    NEEDLES
        .iter()
        .any(|needle| contains_ascii_case_insensitive(haystack, needle))
}

#[inline]
fn contains_ascii_case_insensitive(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    if haystack.len() < needle.len() {
        return false;
    }

    haystack.windows(needle.len()).any(|window| {
        window
            .iter()
            .zip(needle.iter())
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    })
}

/// Parse `Retry-After` as delta-seconds or an HTTP date, capped at `max`.
#[inline]
pub(crate) fn parse_retry_after_delay(headers: &http::HeaderMap, max: Duration) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds).min(max));
    }

    let target = httpdate::parse_http_date(raw).ok()?;
    let delay = target.duration_since(SystemTime::now()).unwrap_or_default();
    Some(delay.min(max))
}
