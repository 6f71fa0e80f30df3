//! Primary backend: Gemini generation with API key rotation.
//!
//! Holds an ordered, immutable list of API keys. Each call to
//! [`StreamingProvider::stream_generate`] rotates through the keys from the
//! first, abandoning a key on any failure (open or mid-stream) and moving to
//! the next. Chunks already forwarded before a mid-stream failure are not
//! retracted, so a later key restarts generation from scratch and the caller
//! may see partial content twice.

use crate::provider::{ChunkStream, DisconnectCheck, StreamingProvider};
use crate::sse_stream::{SseEvent, SseStream, SseStreamExt};
use crate::Error;
use async_stream::stream;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const PROVIDER_NAME: &str = "Gemini";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini provider with key rotation.
#[derive(Clone)]
pub struct GeminiProvider {
    client: Client,
    model: String,
    api_keys: Arc<Vec<String>>,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    top_p: f64,
    top_k: u32,
}

impl GenerateContentRequest {
    fn from_prompt(prompt: &str) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.7,
                top_p: 1.0,
                top_k: 1,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate's parts, if any.
    fn text(&self) -> Option<String> {
        let text: String = self
            .candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

impl GeminiProvider {
    /// Create a new Gemini provider.
    ///
    /// Fails with [`Error::Config`] when `api_keys` is empty so that a
    /// misconfigured primary is caught at startup, not per request.
    pub fn new(model: String, api_keys: Vec<String>) -> Result<Self, Error> {
        Self::new_with_base_url(model, api_keys, DEFAULT_BASE_URL.to_string())
    }

    /// Create a new Gemini provider with a custom base URL.
    pub fn new_with_base_url(
        model: String,
        api_keys: Vec<String>,
        base_url: String,
    ) -> Result<Self, Error> {
        if api_keys.is_empty() {
            return Err(Error::config(
                "GeminiProvider requires at least one API key",
            ));
        }
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;

        Ok(Self {
            client,
            model,
            api_keys: Arc::new(api_keys),
            base_url,
        })
    }

    /// Number of API keys in rotation.
    pub fn key_count(&self) -> usize {
        self.api_keys.len()
    }

    /// Open one streaming generation call with a single API key.
    async fn open_stream(
        &self,
        prompt: &str,
        api_key: &str,
    ) -> Result<SseStream<impl Stream<Item = Result<Bytes, reqwest::Error>>>, Error> {
        let request = GenerateContentRequest::from_prompt(prompt);
        let url = format!(
            "{}/models/{}:streamGenerateContent",
            self.base_url, self.model
        );

        let response = self
            .client
            .post(&url)
            .query(&[("alt", "sse"), ("key", api_key)])
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await?;
            return Err(Error::provider(
                PROVIDER_NAME,
                format!("API error ({status}): {body}"),
            ));
        }

        Ok(response.bytes_stream().sse_events())
    }
}

/// Extract the text delta carried by one SSE event, strictly parsed.
/// A malformed event fails the whole key attempt.
fn text_delta(event: &SseEvent) -> Result<Option<String>, Error> {
    let response: GenerateContentResponse = serde_json::from_str(&event.data)?;
    Ok(response.text())
}

#[async_trait::async_trait]
impl StreamingProvider for GeminiProvider {
    /// Stream generated text, rotating through API keys on failure.
    ///
    /// The disconnect predicate is not consulted here; a key attempt runs to
    /// completion or failure regardless of the caller's connection state.
    async fn stream_generate(
        &self,
        prompt: &str,
        _disconnected: DisconnectCheck,
    ) -> Result<ChunkStream, Error> {
        let this = self.clone();
        let prompt = prompt.to_string();

        let stream = stream! {
            let total = this.api_keys.len();
            let mut last_error: Option<Error> = None;
            let mut completed = false;

            'keys: for (attempt, api_key) in this.api_keys.iter().enumerate() {
                debug!(attempt = attempt + 1, total, model = %this.model, "trying Gemini API key");
                let mut events = match this.open_stream(&prompt, api_key).await {
                    Ok(events) => events,
                    Err(e) => {
                        warn!(attempt = attempt + 1, total, error = %e, "Gemini key failed to open stream");
                        last_error = Some(e);
                        continue 'keys;
                    }
                };

                while let Some(event) = events.next().await {
                    match event.and_then(|ev| text_delta(&ev)) {
                        Ok(Some(text)) => {
                            yield Ok(text);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(attempt = attempt + 1, total, error = %e, "Gemini key failed mid-stream");
                            last_error = Some(e);
                            continue 'keys;
                        }
                    }
                }

                debug!(attempt = attempt + 1, "Gemini stream completed");
                completed = true;
                break 'keys;
            }

            if !completed {
                warn!(total, "all Gemini API keys failed");
                let last = last_error
                    .unwrap_or_else(|| Error::provider(PROVIDER_NAME, "no API keys attempted"));
                yield Err(Error::keys_exhausted(total, last));
            }
        };

        Ok(Box::pin(stream))
    }
}
