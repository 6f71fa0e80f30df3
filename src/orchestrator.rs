//! Composition of the primary and fallback backends into one stream.

use crate::provider::{ChunkStream, DisconnectCheck, StreamingProvider, RESTART_MARKER};
use crate::providers::{GeminiProvider, RouterProvider};
use crate::{Error, Settings};
use async_stream::try_stream;
use futures_util::StreamExt;
use std::sync::Arc;
use tracing::{info, warn};

/// Coordinates the primary backend and the fallback into a single `generate`
/// operation.
///
/// The primary is tried first when configured. If it fails entirely (every
/// API key exhausted), one [`RESTART_MARKER`] chunk is emitted and the same
/// prompt is replayed against the fallback on the same outbound stream.
/// Chunks pass through unmodified; this layer does no content transformation
/// and no buffering.
pub struct Orchestrator {
    primary: Option<Arc<dyn StreamingProvider>>,
    fallback: Arc<dyn StreamingProvider>,
}

impl Orchestrator {
    /// Compose an orchestrator from explicit backends.
    pub fn new(
        primary: Option<Arc<dyn StreamingProvider>>,
        fallback: Arc<dyn StreamingProvider>,
    ) -> Self {
        Self { primary, fallback }
    }

    /// Wire up the concrete backends from startup settings.
    ///
    /// An empty primary key list disables the primary backend; a fallback
    /// that cannot be constructed is a fatal configuration error.
    pub fn from_settings(settings: &Settings) -> Result<Self, Error> {
        let primary: Option<Arc<dyn StreamingProvider>> = if settings.has_primary() {
            let provider = GeminiProvider::new(
                settings.primary_model.clone(),
                settings.primary_api_keys.clone(),
            )?;
            info!(
                model = %settings.primary_model,
                keys = provider.key_count(),
                "primary provider initialized"
            );
            Some(Arc::new(provider))
        } else {
            warn!("no primary API keys configured, requests go straight to the fallback");
            None
        };

        let fallback = RouterProvider::new(
            settings.fallback_model.clone(),
            settings.fallback_api_key.clone(),
            settings.site_url.clone(),
            settings.site_name.clone(),
        )?;
        info!(model = %settings.fallback_model, "fallback provider initialized");

        Ok(Self::new(primary, Arc::new(fallback)))
    }

    /// Whether a primary backend is configured.
    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    /// Generate a streamed answer for `prompt`, falling back on total primary
    /// failure.
    ///
    /// The disconnect predicate is forwarded to both backends; only the
    /// fallback observes it. Fallback errors surface unmodified as `Err`
    /// items in the returned stream.
    pub async fn generate(
        &self,
        prompt: &str,
        disconnected: DisconnectCheck,
    ) -> Result<ChunkStream, Error> {
        let primary = self.primary.clone();
        let fallback = self.fallback.clone();
        let prompt = prompt.to_string();

        let stream = try_stream! {
            let mut primary_error: Option<Error> = None;
            let mut primary_done = false;

            if let Some(primary) = primary {
                info!("attempting generation with primary provider");
                match primary.stream_generate(&prompt, disconnected.clone()).await {
                    Ok(mut chunks) => loop {
                        match chunks.next().await {
                            Some(Ok(chunk)) => {
                                yield chunk;
                            }
                            Some(Err(e)) => {
                                primary_error = Some(e);
                                break;
                            }
                            None => {
                                primary_done = true;
                                break;
                            }
                        }
                    },
                    Err(e) => primary_error = Some(e),
                }
            }

            if !primary_done {
                if let Some(e) = primary_error {
                    warn!(error = %e, "primary provider failed, switching to fallback");
                    yield RESTART_MARKER.to_string();
                } else {
                    info!("using fallback provider");
                }

                let mut chunks = fallback.stream_generate(&prompt, disconnected).await?;
                while let Some(chunk) = chunks.next().await {
                    yield chunk?;
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::never_disconnected;
    use futures_util::stream;
    use std::sync::Mutex;

    /// Scripted backend: either refuses to open, or plays back a fixed item
    /// sequence. Records every prompt it is asked to generate for.
    struct StubProvider {
        script: Mutex<Option<Result<Vec<Result<String, Error>>, Error>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl StubProvider {
        fn yielding(items: Vec<Result<String, Error>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(Some(Ok(items))),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn chunks(texts: &[&str]) -> Arc<Self> {
            Self::yielding(texts.iter().map(|t| Ok(t.to_string())).collect())
        }

        fn refusing(error: Error) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(Some(Err(error))),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts_seen(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl StreamingProvider for StubProvider {
        async fn stream_generate(
            &self,
            prompt: &str,
            _disconnected: DisconnectCheck,
        ) -> Result<ChunkStream, Error> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let script = self
                .script
                .lock()
                .unwrap()
                .take()
                .expect("stub provider called more than once");
            let items = script?;
            Ok(Box::pin(stream::iter(items)))
        }
    }

    async fn drain(mut chunks: ChunkStream) -> (Vec<String>, Option<Error>) {
        let mut out = Vec::new();
        while let Some(item) = chunks.next().await {
            match item {
                Ok(chunk) => out.push(chunk),
                Err(e) => return (out, Some(e)),
            }
        }
        (out, None)
    }

    fn exhausted() -> Error {
        Error::keys_exhausted(2, Error::provider("Gemini", "quota"))
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let primary = StubProvider::chunks(&["Hel", "lo"]);
        let fallback = StubProvider::chunks(&["UNREACHED"]);
        let orchestrator = Orchestrator::new(Some(primary), fallback.clone());

        let chunks = orchestrator
            .generate("prompt", never_disconnected())
            .await
            .unwrap();
        let (out, err) = drain(chunks).await;

        assert!(err.is_none());
        assert_eq!(out, vec!["Hel", "lo"]);
        assert!(fallback.prompts_seen().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_primary_switches_with_marker() {
        let primary = StubProvider::yielding(vec![Err(exhausted())]);
        let fallback = StubProvider::chunks(&["Fall", "back"]);
        let orchestrator = Orchestrator::new(Some(primary), fallback);

        let chunks = orchestrator
            .generate("prompt", never_disconnected())
            .await
            .unwrap();
        let (out, err) = drain(chunks).await;

        assert!(err.is_none());
        assert_eq!(out, vec![RESTART_MARKER, "Fall", "back"]);
    }

    #[tokio::test]
    async fn test_partial_primary_output_precedes_marker() {
        let primary = StubProvider::yielding(vec![
            Ok("par".to_string()),
            Ok("tial".to_string()),
            Err(exhausted()),
        ]);
        let fallback = StubProvider::chunks(&["done"]);
        let orchestrator = Orchestrator::new(Some(primary), fallback);

        let chunks = orchestrator
            .generate("prompt", never_disconnected())
            .await
            .unwrap();
        let (out, err) = drain(chunks).await;

        assert!(err.is_none());
        assert_eq!(out, vec!["par", "tial", RESTART_MARKER, "done"]);
    }

    #[tokio::test]
    async fn test_primary_open_failure_also_switches() {
        let primary = StubProvider::refusing(exhausted());
        let fallback = StubProvider::chunks(&["ok"]);
        let orchestrator = Orchestrator::new(Some(primary), fallback);

        let chunks = orchestrator
            .generate("prompt", never_disconnected())
            .await
            .unwrap();
        let (out, err) = drain(chunks).await;

        assert!(err.is_none());
        assert_eq!(out, vec![RESTART_MARKER, "ok"]);
    }

    #[tokio::test]
    async fn test_no_primary_means_no_marker() {
        let fallback = StubProvider::chunks(&["OK"]);
        let orchestrator = Orchestrator::new(None, fallback);

        assert!(!orchestrator.has_primary());
        let chunks = orchestrator
            .generate("prompt", never_disconnected())
            .await
            .unwrap();
        let (out, err) = drain(chunks).await;

        assert!(err.is_none());
        assert_eq!(out, vec!["OK"]);
    }

    #[tokio::test]
    async fn test_fallback_failure_propagates() {
        let primary = StubProvider::refusing(exhausted());
        let fallback = StubProvider::yielding(vec![
            Ok("partial".to_string()),
            Err(Error::provider("Router", "boom")),
        ]);
        let orchestrator = Orchestrator::new(Some(primary), fallback);

        let chunks = orchestrator
            .generate("prompt", never_disconnected())
            .await
            .unwrap();
        let (out, err) = drain(chunks).await;

        assert_eq!(out, vec![RESTART_MARKER, "partial"]);
        assert!(matches!(err, Some(Error::Provider { .. })));
    }

    #[tokio::test]
    async fn test_same_prompt_reaches_both_providers() {
        let primary = StubProvider::refusing(exhausted());
        let fallback = StubProvider::chunks(&["ok"]);
        let orchestrator = Orchestrator::new(Some(primary.clone()), fallback.clone());

        let chunks = orchestrator
            .generate("the exact prompt", never_disconnected())
            .await
            .unwrap();
        drain(chunks).await;

        assert_eq!(primary.prompts_seen(), vec!["the exact prompt"]);
        assert_eq!(fallback.prompts_seen(), vec!["the exact prompt"]);
    }

    #[tokio::test]
    async fn test_from_settings_without_primary_keys() {
        let settings = Settings {
            primary_model: "gemini-1.5-flash-latest".to_string(),
            primary_api_keys: vec![],
            fallback_model: "gemini-1.5-pro-latest".to_string(),
            fallback_api_key: "rk".to_string(),
            site_url: None,
            site_name: None,
        };
        let orchestrator = Orchestrator::from_settings(&settings).unwrap();
        assert!(!orchestrator.has_primary());
    }

    #[tokio::test]
    async fn test_from_settings_with_primary_keys() {
        let settings = Settings {
            primary_model: "gemini-1.5-flash-latest".to_string(),
            primary_api_keys: vec!["k1".to_string(), "k2".to_string()],
            fallback_model: "gemini-1.5-pro-latest".to_string(),
            fallback_api_key: "rk".to_string(),
            site_url: Some("https://example.com".to_string()),
            site_name: Some("Example".to_string()),
        };
        let orchestrator = Orchestrator::from_settings(&settings).unwrap();
        assert!(orchestrator.has_primary());
    }
}
