use std::pin::{pin, Pin};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::stream::FuturesUnordered;
use futures_util::{Stream, StreamExt};
use reqwest::multipart::{Form, Part};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use super::{status_error, FailoverStreamClient};
use crate::error::{CandidateError, ClientError};
use crate::protocol::request::InlineDataContent;
use crate::protocol::{Attachment, ChatRequest, StreamEvent};
use crate::stream::event_stream;
use crate::transport::{BackendCandidate, CHAT_PATH};

type StreamItem = Result<StreamEvent, ClientError>;

// ---------------------------------------------------------------------------
// Cancellation handle
// ---------------------------------------------------------------------------

/// Cloneable handle that stops a chat stream.
///
/// Cancelling is idempotent and never surfaces as an error: the stream ends.
#[derive(Debug, Clone, Default)]
pub struct StreamCanceller {
    token: CancellationToken,
}

impl StreamCanceller {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

// ---------------------------------------------------------------------------
// EventStream
// ---------------------------------------------------------------------------

enum StreamState {
    Idle(Option<Producer>),
    Running {
        rx: mpsc::Receiver<StreamItem>,
        _task: JoinHandle<()>,
    },
    Done,
}

/// Decoded events from the first backend that answers.
///
/// The stream is cold: no request is sent until it is first polled. Dropping
/// it cancels the producer and closes the connection. After a terminal error
/// item the stream ends.
pub struct EventStream {
    state: StreamState,
    token: CancellationToken,
    _guard: DropGuard,
}

impl EventStream {
    fn new(producer: Producer) -> Self {
        let token = CancellationToken::new();
        Self {
            state: StreamState::Idle(Some(producer)),
            _guard: token.clone().drop_guard(),
            token,
        }
    }

    /// Stop the stream. Further polls return `None`.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn canceller(&self) -> StreamCanceller {
        StreamCanceller {
            token: self.token.clone(),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Stream for EventStream {
    type Item = StreamItem;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.token.is_cancelled() {
            this.state = StreamState::Done;
            return Poll::Ready(None);
        }
        loop {
            match &mut this.state {
                StreamState::Idle(producer) => {
                    let Some(producer) = producer.take() else {
                        this.state = StreamState::Done;
                        continue;
                    };
                    let (tx, rx) = mpsc::channel(producer.channel_capacity);
                    let task = tokio::spawn(producer.run(tx, this.token.clone()));
                    this.state = StreamState::Running { rx, _task: task };
                }
                StreamState::Running { rx, .. } => {
                    return match rx.poll_recv(cx) {
                        Poll::Ready(Some(item)) => Poll::Ready(Some(item)),
                        Poll::Ready(None) => {
                            this.state = StreamState::Done;
                            Poll::Ready(None)
                        }
                        Poll::Pending => Poll::Pending,
                    };
                }
                StreamState::Done => return Poll::Ready(None),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

struct Attempt {
    url: String,
    started: Instant,
    result: Result<reqwest::Response, CandidateError>,
}

enum ForwardError {
    /// Nothing reached the consumer; the next candidate may be tried.
    BeforeFirstEvent(CandidateError),
    /// Content was already delivered; restarting would duplicate it.
    AfterEvents(ClientError),
    ConsumerGone,
}

enum AttemptOutcome {
    /// The turn is over, successfully or not.
    Finished(Result<(), ClientError>),
    /// This candidate failed; move on to the next one.
    Failed(CandidateError),
}

struct Producer {
    client: reqwest::Client,
    candidates: Vec<BackendCandidate>,
    request_json: String,
    attachments: Vec<Attachment>,
    concurrent: bool,
    stream_timeout: Option<Duration>,
    channel_capacity: usize,
}

impl Producer {
    async fn run(self, tx: mpsc::Sender<StreamItem>, token: CancellationToken) {
        debug!(
            candidates = self.candidates.len(),
            concurrent = self.concurrent,
            "starting chat stream"
        );
        let outcome = tokio::select! {
            biased;
            () = token.cancelled() => {
                debug!("chat stream cancelled");
                return;
            }
            outcome = self.drive(&tx) => outcome,
        };
        if let Err(err) = outcome {
            warn!(error = %err, "chat stream failed");
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                _ = tx.send(Err(err)) => {}
            }
        }
    }

    async fn drive(&self, tx: &mpsc::Sender<StreamItem>) -> Result<(), ClientError> {
        let mut tried = 0usize;
        let mut last_error: Option<CandidateError> = None;

        if self.concurrent {
            // Responses are consumed in arrival order; slower ones stay queued
            // until the earlier winner fails before its first event.
            let mut pending: FuturesUnordered<_> = self
                .candidates
                .iter()
                .map(|candidate| self.connect(candidate))
                .collect();
            while let Some(attempt) = pending.next().await {
                tried += 1;
                match self.consume(attempt, tx).await {
                    AttemptOutcome::Finished(result) => return result,
                    AttemptOutcome::Failed(err) => last_error = Some(err),
                }
            }
        } else {
            for candidate in &self.candidates {
                let attempt = self.connect(candidate).await;
                tried += 1;
                match self.consume(attempt, tx).await {
                    AttemptOutcome::Finished(result) => return result,
                    AttemptOutcome::Failed(err) => last_error = Some(err),
                }
            }
        }

        match last_error {
            Some(err) => Err(ClientError::exhausted(tried, err)),
            None => Err(ClientError::Configuration(
                "no backend servers configured".to_string(),
            )),
        }
    }

    async fn consume(&self, attempt: Attempt, tx: &mpsc::Sender<StreamItem>) -> AttemptOutcome {
        let Attempt {
            url,
            started,
            result,
        } = attempt;
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                warn!(candidate = %url, error = %err, "backend candidate failed");
                return AttemptOutcome::Failed(err);
            }
        };
        match self.forward(&url, started, response, tx).await {
            Ok(()) => AttemptOutcome::Finished(Ok(())),
            Err(ForwardError::BeforeFirstEvent(err)) => {
                warn!(candidate = %url, error = %err, "backend stream failed before any event");
                AttemptOutcome::Failed(err)
            }
            Err(ForwardError::AfterEvents(err)) => AttemptOutcome::Finished(Err(err)),
            Err(ForwardError::ConsumerGone) => {
                debug!(candidate = %url, "consumer dropped chat stream");
                AttemptOutcome::Finished(Ok(()))
            }
        }
    }

    async fn connect(&self, candidate: &BackendCandidate) -> Attempt {
        let url = candidate.endpoint(CHAT_PATH);
        let started = Instant::now();
        let result = self.send(&url).await;
        Attempt {
            url,
            started,
            result,
        }
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response, CandidateError> {
        let form = build_form(&self.request_json, &self.attachments)
            .map_err(|err| CandidateError::malformed(url, err.to_string()))?;
        let request = self.client.post(url).multipart(form).send();
        let sent = match self.stream_timeout {
            Some(limit) => match tokio::time::timeout(limit, request).await {
                Ok(sent) => sent,
                Err(_) => {
                    return Err(CandidateError::timeout(
                        url,
                        format!("no response within {limit:?}"),
                    ))
                }
            },
            None => request.await,
        };
        match sent {
            Ok(response) if response.status().is_success() => {
                info!(candidate = url, status = response.status().as_u16(), "backend accepted chat request");
                Ok(response)
            }
            Ok(response) => Err(status_error(url, response).await),
            Err(err) => Err(CandidateError::from_reqwest(url, &err)),
        }
    }

    async fn forward(
        &self,
        url: &str,
        started: Instant,
        response: reqwest::Response,
        tx: &mpsc::Sender<StreamItem>,
    ) -> Result<(), ForwardError> {
        let deadline = self.stream_timeout.map(|limit| started + limit);
        let mut events = pin!(event_stream(response.bytes_stream()));
        let mut forwarded = 0usize;

        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, events.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        let elapsed = started.elapsed();
                        return Err(if forwarded == 0 {
                            ForwardError::BeforeFirstEvent(CandidateError::timeout(
                                url,
                                format!("no events within {elapsed:?}"),
                            ))
                        } else {
                            ForwardError::AfterEvents(ClientError::StreamTimeout {
                                url: url.to_owned(),
                                elapsed,
                            })
                        });
                    }
                },
                None => events.next().await,
            };

            match next {
                Some(Ok(event)) => {
                    if tx.send(Ok(event)).await.is_err() {
                        return Err(ForwardError::ConsumerGone);
                    }
                    forwarded += 1;
                }
                Some(Err(err)) => {
                    let err = CandidateError::from_reqwest(url, &err);
                    return Err(if forwarded == 0 {
                        ForwardError::BeforeFirstEvent(err)
                    } else {
                        ForwardError::AfterEvents(ClientError::StreamInterrupted(Box::new(err)))
                    });
                }
                None => {
                    debug!(candidate = url, events = forwarded, "backend stream completed");
                    return Ok(());
                }
            }
        }
    }
}

/// Multipart body: the JSON request, then document parts, then inline data.
fn build_form(request_json: &str, attachments: &[Attachment]) -> Result<Form, reqwest::Error> {
    let mut form = Form::new().part(
        "chat_request_json",
        Part::text(request_json.to_owned()).mime_str("application/json")?,
    );
    for attachment in attachments {
        match attachment {
            Attachment::Document {
                file_name,
                mime_type,
                bytes,
            } => {
                let part = Part::stream_with_length(reqwest::Body::from(bytes.clone()), bytes.len() as u64)
                    .file_name(file_name.clone())
                    .mime_str(mime_type)?;
                form = form.part("uploaded_documents", part);
            }
            Attachment::InlineData {
                mime_type,
                data_base64,
            } => {
                let payload = serde_json::to_string(&InlineDataContent {
                    mime_type,
                    data: data_base64,
                })
                .unwrap_or_default();
                form = form.part(
                    "inline_data_content",
                    Part::text(payload).mime_str("application/json")?,
                );
            }
        }
    }
    Ok(form)
}

impl FailoverStreamClient {
    /// Stream a chat response from the first backend that answers.
    ///
    /// The returned stream is cold; the request is sent on first poll.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] when no backends are configured
    /// or an attachment is invalid, and [`ClientError::NotInitialized`] when
    /// the transport is closed. Failures while streaming arrive as the last
    /// stream item.
    pub fn stream_chat_response(
        &self,
        request: &ChatRequest,
        attachments: Vec<Attachment>,
    ) -> Result<EventStream, ClientError> {
        let candidates = self.candidates()?;
        let client = self.transport.client()?;
        let request_json = serde_json::to_string(request).map_err(|err| {
            ClientError::Configuration(format!("failed to encode chat request: {err}"))
        })?;
        build_form(&request_json, &attachments)
            .map_err(|err| ClientError::Configuration(format!("invalid attachment: {err}")))?;

        Ok(EventStream::new(Producer {
            client,
            candidates,
            request_json,
            attachments,
            concurrent: self.concurrent,
            stream_timeout: self.stream_timeout,
            channel_capacity: self.channel_capacity,
        }))
    }
}
