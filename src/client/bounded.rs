use bytes::Bytes;
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use tracing::warn;

use super::{status_error, FailoverStreamClient};
use crate::error::{CandidateError, ClientError};
use crate::protocol::request::{
    parse_models_response, ImageGenerationRequest, ImageGenerationResponse, ReleaseInfo,
};
use crate::transport::candidates::models_endpoints;
use crate::transport::IMAGE_GENERATION_PATH;

const RELEASE_USER_AGENT: &str = concat!("streamchat-rs/", env!("CARGO_PKG_VERSION"));

fn parse_json<T: DeserializeOwned>(url: &str, body: &[u8]) -> Result<T, CandidateError> {
    serde_json::from_slice(body).map_err(|err| CandidateError::malformed(url, err.to_string()))
}

impl FailoverStreamClient {
    /// Generate images through the first backend that succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] for an empty backend list and
    /// [`ClientError::AllCandidatesExhausted`] when every backend failed.
    pub async fn generate_image(
        &self,
        request: &ImageGenerationRequest,
    ) -> Result<ImageGenerationResponse, ClientError> {
        let urls: Vec<String> = self
            .candidates()?
            .iter()
            .map(|candidate| candidate.endpoint(IMAGE_GENERATION_PATH))
            .collect();
        let body = Bytes::from(serde_json::to_vec(request).map_err(|err| {
            ClientError::Configuration(format!("failed to encode image request: {err}"))
        })?);

        self.call_with_fallback(
            "generate_image",
            &urls,
            |client, url| {
                client
                    .post(url)
                    .header(CONTENT_TYPE, "application/json")
                    .body(body.clone())
            },
            parse_json::<ImageGenerationResponse>,
        )
        .await
    }

    /// List model ids from a provider API address.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] for a blank `api_url` and
    /// [`ClientError::AllCandidatesExhausted`] when every URL failed.
    pub async fn get_models(&self, api_url: &str, api_key: &str) -> Result<Vec<String>, ClientError> {
        let urls = models_endpoints(api_url);
        self.call_with_fallback(
            "get_models",
            &urls,
            |client, url| {
                client
                    .get(url)
                    .bearer_auth(api_key)
                    .header(ACCEPT, "application/json")
            },
            |url, body| {
                parse_models_response(body)
                    .map_err(|err| CandidateError::malformed(url, err.to_string()))
            },
        )
        .await
    }

    /// Fetch the latest release description from the configured release URLs.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] when no release URLs are
    /// configured and [`ClientError::AllCandidatesExhausted`] when all failed.
    pub async fn get_latest_release(&self) -> Result<ReleaseInfo, ClientError> {
        let urls: Vec<String> = self
            .release_urls
            .iter()
            .map(|url| url.trim().to_owned())
            .filter(|url| !url.is_empty())
            .collect();
        self.call_with_fallback(
            "get_latest_release",
            &urls,
            |client, url| {
                client
                    .get(url)
                    .header(USER_AGENT, RELEASE_USER_AGENT)
                    .header(ACCEPT, "application/vnd.github+json")
            },
            parse_json::<ReleaseInfo>,
        )
        .await
    }

    async fn call_with_fallback<T, B, P>(
        &self,
        operation: &'static str,
        urls: &[String],
        build: B,
        parse: P,
    ) -> Result<T, ClientError>
    where
        T: Send,
        B: Fn(&reqwest::Client, &str) -> RequestBuilder + Sync,
        P: Fn(&str, &[u8]) -> Result<T, CandidateError> + Sync,
    {
        if urls.is_empty() {
            return Err(ClientError::Configuration(format!(
                "no endpoints configured for {operation}"
            )));
        }
        let client = self.transport.client()?;
        let mut last_error: Option<CandidateError> = None;

        if self.concurrent {
            let mut pending: FuturesUnordered<_> = urls
                .iter()
                .map(|url| self.request_with_retry(&client, url, &build, &parse))
                .collect();
            while let Some(result) = pending.next().await {
                match result {
                    Ok(value) => return Ok(value),
                    Err(err) => {
                        warn!(operation, candidate = %err.url, error = %err, "bounded call candidate failed");
                        last_error = Some(err);
                    }
                }
            }
        } else {
            for url in urls {
                match self.request_with_retry(&client, url, &build, &parse).await {
                    Ok(value) => return Ok(value),
                    Err(err) => {
                        warn!(operation, candidate = %url, error = %err, "bounded call candidate failed");
                        last_error = Some(err);
                    }
                }
            }
        }

        match last_error {
            Some(err) => Err(ClientError::exhausted(urls.len(), err)),
            None => Err(ClientError::Configuration(format!(
                "no endpoints configured for {operation}"
            ))),
        }
    }

    /// One URL with linear-backoff retries for transient failures.
    async fn request_with_retry<T, B, P>(
        &self,
        client: &reqwest::Client,
        url: &str,
        build: &B,
        parse: &P,
    ) -> Result<T, CandidateError>
    where
        B: Fn(&reqwest::Client, &str) -> RequestBuilder + Sync,
        P: Fn(&str, &[u8]) -> Result<T, CandidateError> + Sync,
    {
        let mut attempt = 0u32;
        loop {
            let (err, headers) = match build(client, url)
                .timeout(self.request_timeout)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => match response.bytes().await {
                    Ok(body) => match parse(url, &body) {
                        Ok(value) => return Ok(value),
                        Err(err) => (err, None),
                    },
                    Err(err) => (CandidateError::from_reqwest(url, &err), None),
                },
                Ok(response) => {
                    let headers = response.headers().clone();
                    (status_error(url, response).await, Some(headers))
                }
                Err(err) => (CandidateError::from_reqwest(url, &err), None),
            };

            if !self.retry.should_retry(&err, attempt) {
                return Err(err);
            }
            let delay = self.retry.retry_delay(headers.as_ref(), attempt);
            warn!(
                candidate = url,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying bounded call"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
