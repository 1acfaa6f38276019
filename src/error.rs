use std::time::Duration;

/// Broad failure category derived from the last upstream HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    RateLimit,
    Authentication,
    Permission,
    NotFound,
    ServerError,
    BadGateway,
    ServiceUnavailable,
    Unreachable,
    Unknown,
}

/// Map an upstream HTTP status code to an error category.
#[must_use]
pub fn category_from_upstream_status(status: u16) -> ErrorCategory {
    match status {
        429 => ErrorCategory::RateLimit,
        401 => ErrorCategory::Authentication,
        403 => ErrorCategory::Permission,
        404 => ErrorCategory::NotFound,
        500 => ErrorCategory::ServerError,
        502 => ErrorCategory::BadGateway,
        503 => ErrorCategory::ServiceUnavailable,
        _ => ErrorCategory::Unknown,
    }
}

impl ErrorCategory {
    /// Human-readable classification shown to the user instead of a raw error string.
    #[must_use]
    pub fn friendly_message(self) -> &'static str {
        match self {
            ErrorCategory::RateLimit => "Too many requests, the service is rate limiting",
            ErrorCategory::Authentication => "Authentication failed, check the API key",
            ErrorCategory::Permission => "Access denied by the service",
            ErrorCategory::NotFound => "The requested endpoint or model was not found",
            ErrorCategory::ServerError => "The service hit an internal error",
            ErrorCategory::BadGateway => "Bad gateway between the proxy and the model provider",
            ErrorCategory::ServiceUnavailable => "The service is temporarily unavailable",
            ErrorCategory::Unreachable => "No backend could be reached",
            ErrorCategory::Unknown => "The request failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Per-candidate failures
// ---------------------------------------------------------------------------

/// Why a single backend candidate failed.
#[derive(Debug, thiserror::Error)]
pub enum CandidateFailure {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// A transient failure scoped to one backend candidate.
#[derive(Debug, thiserror::Error)]
#[error("candidate {url} failed: {failure}")]
pub struct CandidateError {
    pub url: String,
    pub failure: CandidateFailure,
}

impl CandidateError {
    #[must_use]
    pub fn status(url: &str, status: u16, body: String) -> Self {
        Self {
            url: url.to_owned(),
            failure: CandidateFailure::Status { status, body },
        }
    }

    #[must_use]
    pub fn timeout(url: &str, message: impl Into<String>) -> Self {
        Self {
            url: url.to_owned(),
            failure: CandidateFailure::Timeout(message.into()),
        }
    }

    #[must_use]
    pub fn malformed(url: &str, message: impl Into<String>) -> Self {
        Self {
            url: url.to_owned(),
            failure: CandidateFailure::Malformed(message.into()),
        }
    }

    /// Classify a reqwest failure for this candidate.
    #[must_use]
    pub fn from_reqwest(url: &str, err: &reqwest::Error) -> Self {
        let failure = if err.is_timeout() {
            CandidateFailure::Timeout(error_chain_message(err))
        } else {
            CandidateFailure::Transport(error_chain_message(err))
        };
        Self {
            url: url.to_owned(),
            failure,
        }
    }

    /// The upstream HTTP status, when the candidate answered with one.
    #[must_use]
    pub fn http_status(&self) -> Option<u16> {
        match self.failure {
            CandidateFailure::Status { status, .. } => Some(status),
            _ => None,
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match &self.failure {
            CandidateFailure::Status { status, .. } => category_from_upstream_status(*status),
            CandidateFailure::Transport(_) | CandidateFailure::Timeout(_) => {
                ErrorCategory::Unreachable
            }
            CandidateFailure::Malformed(_) => ErrorCategory::Unknown,
        }
    }
}

/// Flatten an error and its sources into one line; reqwest hides the useful
/// part (e.g. "Connection refused") in the source chain.
fn error_chain_message(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        let inner_message = inner.to_string();
        if !message.contains(&inner_message) {
            message.push_str(": ");
            message.push_str(&inner_message);
        }
        source = inner.source();
    }
    message
}

// ---------------------------------------------------------------------------
// Client-level errors
// ---------------------------------------------------------------------------

/// Canonical error type surfaced by the client.
///
/// There is no cancellation variant: a cancelled stream ends with `None`.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("HTTP transport is not initialized")]
    NotInitialized,
    #[error(transparent)]
    Candidate(#[from] CandidateError),
    #[error("{friendly} (all {attempts} backend candidates failed; last error: {last})")]
    AllCandidatesExhausted {
        attempts: usize,
        friendly: String,
        last: Box<CandidateError>,
    },
    #[error("Stream from {url} timed out after {elapsed:?}")]
    StreamTimeout { url: String, elapsed: Duration },
    #[error("Stream interrupted after partial content: {0}")]
    StreamInterrupted(Box<CandidateError>),
}

impl ClientError {
    /// Build the aggregate failure after every candidate was tried.
    #[must_use]
    pub fn exhausted(attempts: usize, last: CandidateError) -> Self {
        let friendly = last.category().friendly_message().to_owned();
        ClientError::AllCandidatesExhausted {
            attempts,
            friendly,
            last: Box::new(last),
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            ClientError::Configuration(_) | ClientError::NotInitialized => ErrorCategory::Unknown,
            ClientError::Candidate(err) => err.category(),
            ClientError::StreamInterrupted(err) | ClientError::AllCandidatesExhausted { last: err, .. } => {
                err.category()
            }
            ClientError::StreamTimeout { .. } => ErrorCategory::Unreachable,
        }
    }

    /// The last HTTP status observed, if any.
    #[must_use]
    pub fn last_http_status(&self) -> Option<u16> {
        match self {
            ClientError::Candidate(err) => err.http_status(),
            ClientError::StreamInterrupted(err) | ClientError::AllCandidatesExhausted { last: err, .. } => {
                err.http_status()
            }
            _ => None,
        }
    }

    /// Message suitable for the transcript: classification first, details after.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Configuration(message) => format!("Configuration error: {message}"),
            ClientError::AllCandidatesExhausted { friendly, last, .. } => match last.http_status()
            {
                Some(status) => format!("{friendly} (HTTP {status})"),
                None => friendly.clone(),
            },
            other => other.category().friendly_message().to_owned(),
        }
    }
}
