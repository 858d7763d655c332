/// Text-to-speech. Turns question text into an audio URL that the playback
/// controller can load, so questions without pre-recorded audio can still be read aloud.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Speech API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Nothing to synthesize: text is empty")]
    EmptyText,

    #[error("Speech API response carried no audio url")]
    MissingUrl,

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },
}

#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Returns a URL for an audio rendition of `text`.
    async fn synthesize(&self, text: &str) -> Result<String, SpeechError>;
}

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SynthesisResponse {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorMessage,
}

#[derive(Debug, Deserialize)]
struct ApiErrorMessage {
    message: String,
}

/// Speech backend reached over HTTP.
/// Retries on 429 and 5xx with exponential backoff.
#[derive(Clone)]
pub struct HttpSpeechProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    backoff: Duration,
}

impl HttpSpeechProvider {
    pub fn new(endpoint: String, api_key: Option<String>) -> Result<Self, SpeechError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            backoff: Duration::from_secs(1),
        })
    }

    /// Base delay before the first retry; doubles on each further attempt.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

#[async_trait]
impl SpeechProvider for HttpSpeechProvider {
    async fn synthesize(&self, text: &str) -> Result<String, SpeechError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SpeechError::EmptyText);
        }

        let mut last_error: Option<SpeechError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = self.backoff * (1 << (attempt - 1));
                warn!(
                    "Speech call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .post(&self.endpoint)
                .json(&SynthesisRequest { text });
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(SpeechError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("Speech API returned {}: {}", status, body);
                last_error = Some(SpeechError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ApiErrorBody>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(SpeechError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let body: SynthesisResponse = response.json().await?;
            let url = body
                .url
                .filter(|u| !u.trim().is_empty())
                .ok_or(SpeechError::MissingUrl)?;
            debug!(chars = text.len(), "Speech synthesized");
            return Ok(url);
        }

        Err(last_error.unwrap_or(SpeechError::RateLimited {
            retries: MAX_RETRIES,
        }))
    }
}
