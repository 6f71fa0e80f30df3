//! Fallback backend: single-key OpenAI-compatible chat completions router.
//!
//! Makes exactly one attempt per call, with no retry and no key rotation, and
//! stops forwarding as soon as the caller's disconnect predicate turns true.

use crate::provider::{ChunkStream, DisconnectCheck, StreamingProvider};
use crate::sse_stream::SseStreamExt;
use crate::Error;
use async_stream::try_stream;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const PROVIDER_NAME: &str = "Router";
const DEFAULT_BASE_URL: &str = "https://router.requesty.ai/v1";

/// OpenAI-compatible router provider used as the fallback backend.
#[derive(Clone)]
pub struct RouterProvider {
    client: Client,
    model: String,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

impl ChatCompletionChunk {
    /// Text delta of the first choice, if the chunk carries one.
    fn delta_text(self) -> Option<String> {
        self.choices.into_iter().next()?.delta.content
    }
}

impl RouterProvider {
    /// Create a new router provider.
    ///
    /// `site_url` and `site_name` become the `HTTP-Referer` and `X-Title`
    /// default headers; empty values are omitted entirely.
    pub fn new(
        model: String,
        api_key: String,
        site_url: Option<String>,
        site_name: Option<String>,
    ) -> Result<Self, Error> {
        Self::new_with_base_url(model, api_key, site_url, site_name, DEFAULT_BASE_URL.to_string())
    }

    /// Create a new router provider with a custom base URL.
    pub fn new_with_base_url(
        model: String,
        api_key: String,
        site_url: Option<String>,
        site_name: Option<String>,
        base_url: String,
    ) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        if let Some(url) = site_url.filter(|v| !v.is_empty()) {
            let value = HeaderValue::from_str(&url)
                .map_err(|_| Error::config("site URL is not a valid header value"))?;
            headers.insert("HTTP-Referer", value);
        }
        if let Some(name) = site_name.filter(|v| !v.is_empty()) {
            let value = HeaderValue::from_str(&name)
                .map_err(|_| Error::config("site name is not a valid header value"))?;
            headers.insert("X-Title", value);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            model,
            api_key,
            base_url,
        })
    }
}

#[async_trait::async_trait]
impl StreamingProvider for RouterProvider {
    /// Stream generated text through the chat completions endpoint.
    ///
    /// Failures (open or mid-stream) propagate as-is. A true disconnect
    /// predicate stops the stream cleanly without an error.
    async fn stream_generate(
        &self,
        prompt: &str,
        disconnected: DisconnectCheck,
    ) -> Result<ChunkStream, Error> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt.to_string(),
            }],
            stream: true,
        };

        debug!(model = %self.model, "opening fallback chat completions stream");
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
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

        let mut events = response.bytes_stream().sse_events();
        let stream = try_stream! {
            while let Some(event) = events.next().await {
                if disconnected() {
                    debug!("client disconnected, cancelling fallback stream");
                    break;
                }
                let event = event?;
                if event.is_done() {
                    break;
                }
                // Events that do not parse as chat chunks carry no delta
                // (keep-alives, vendor extensions) and are skipped.
                let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(&event.data) else {
                    continue;
                };
                if let Some(content) = chunk.delta_text() {
                    if !content.is_empty() {
                        yield content;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
