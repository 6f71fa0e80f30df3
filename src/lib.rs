//! Streaming LLM generation with API key rotation and provider fallback.
//!
//! This library wraps two interchangeable generation backends behind one
//! `generate` operation: a primary backend that rotates through multiple API
//! keys until one yields a complete stream, and an always-available fallback
//! backend reached through an OpenAI-compatible chat completions router.
//! When the primary exhausts every key, the orchestrator injects a single
//! `[STREAM_RESTART]` marker into the outbound stream and continues with the
//! fallback, so the caller keeps one live connection throughout.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod provider;
pub mod providers;
pub mod sse_stream;

// Re-export core types for easy usage
pub use config::Settings;
pub use error::Error;
pub use orchestrator::Orchestrator;
pub use provider::{
    never_disconnected, ChunkStream, DisconnectCheck, StreamingProvider, RESTART_MARKER,
};
pub use providers::{GeminiProvider, RouterProvider};
pub use sse_stream::{SseEvent, SseStreamExt};
