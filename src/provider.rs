use crate::Error;
use futures_util::stream::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// A lazy sequence of generated text chunks.
///
/// Chunks are forwarded in the order the active backend produced them; the
/// stream never buffers the full answer.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, Error>> + Send>>;

/// Live predicate for "has the calling client closed its connection".
///
/// Must be cheap to call repeatedly; it is consulted between chunks.
pub type DisconnectCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// In-band sentinel chunk emitted exactly once when generation switches from
/// the primary backend to the fallback. Consumers must treat it as a protocol
/// signal, not as model output.
pub const RESTART_MARKER: &str = "[STREAM_RESTART]\n";

/// A disconnect check for callers whose connection can never close early.
pub fn never_disconnected() -> DisconnectCheck {
    Arc::new(|| false)
}

/// A backend that can stream generated text for a prompt.
///
/// Implementations differ in how they handle failure: the primary backend
/// rotates through its API keys internally, while the fallback makes a single
/// attempt and honors the disconnect predicate between chunks. Backends that
/// do not observe disconnection accept the predicate and ignore it.
#[async_trait::async_trait]
pub trait StreamingProvider: Send + Sync + 'static {
    /// Open a streaming generation call for `prompt`.
    ///
    /// Errors may surface either from the returned future (the call never
    /// opened) or as an `Err` item inside the stream (mid-stream failure).
    async fn stream_generate(
        &self,
        prompt: &str,
        disconnected: DisconnectCheck,
    ) -> Result<ChunkStream, Error>;
}
