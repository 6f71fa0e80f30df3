//! Incremental parser for Server-Sent Events arriving as raw byte chunks.

use crate::Error;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

/// Upper bound on buffered bytes for a single event. A well-behaved backend
/// terminates events long before this.
const MAX_EVENT_BYTES: usize = 1_000_000;

/// One parsed SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    /// Value of the `event:` field, when present.
    pub event: Option<String>,
    /// Joined `data:` lines.
    pub data: String,
}

impl SseEvent {
    /// Whether this is the `[DONE]` sentinel used by OpenAI-compatible
    /// backends to signal end of stream.
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Adapter that turns a fallible byte stream into a stream of [`SseEvent`]s.
///
/// Events split across network chunks are reassembled; an unterminated final
/// event is flushed when the underlying stream ends.
pub struct SseStream<S> {
    inner: S,
    buffer: Vec<u8>,
    finished: bool,
}

impl<S> SseStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            finished: false,
        }
    }

    /// Pop the next complete event out of the buffer, skipping event blocks
    /// that carry no data (comments, keep-alives).
    fn next_buffered_event(&mut self) -> Result<Option<SseEvent>, Error> {
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let rest = self.buffer.split_off(pos + 2);
            let block = std::mem::replace(&mut self.buffer, rest);
            let text = std::str::from_utf8(&block[..pos])
                .map_err(|e| Error::streaming(format!("invalid UTF-8 in SSE event: {e}")))?;
            if let Some(event) = parse_event(text) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    /// Parse whatever remains in the buffer as a final event. Backends
    /// sometimes omit the trailing blank line before closing the connection.
    fn flush_trailing(&mut self) -> Result<Option<SseEvent>, Error> {
        let block = std::mem::take(&mut self.buffer);
        let text = std::str::from_utf8(&block)
            .map_err(|e| Error::streaming(format!("invalid UTF-8 in SSE event: {e}")))?;
        Ok(parse_event(text))
    }
}

/// Parse one event block. Returns `None` when the block has no `data:` lines.
fn parse_event(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data_lines = Vec::new();

    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data_lines.push(value),
            _ => {}
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
    })
}

impl<S, E> Stream for SseStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Item = Result<SseEvent, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match this.next_buffered_event() {
                Ok(Some(event)) => return Poll::Ready(Some(Ok(event))),
                Ok(None) => {}
                Err(e) => return Poll::Ready(Some(Err(e))),
            }
            if this.finished {
                return Poll::Ready(None);
            }

            match ready!(this.inner.poll_next_unpin(cx)) {
                Some(Ok(chunk)) => {
                    this.buffer.extend_from_slice(&chunk);
                    if this.buffer.len() > MAX_EVENT_BYTES {
                        this.buffer.clear();
                        return Poll::Ready(Some(Err(Error::streaming(
                            "SSE event exceeded maximum buffered size",
                        ))));
                    }
                }
                Some(Err(e)) => {
                    return Poll::Ready(Some(Err(Error::streaming(format!(
                        "transport error: {}",
                        e.into()
                    )))));
                }
                None => {
                    this.finished = true;
                    return match this.flush_trailing() {
                        Ok(Some(event)) => Poll::Ready(Some(Ok(event))),
                        Ok(None) => Poll::Ready(None),
                        Err(e) => Poll::Ready(Some(Err(e))),
                    };
                }
            }
        }
    }
}

/// Extension trait to parse byte streams as SSE.
pub trait SseStreamExt: Stream {
    fn sse_events(self) -> SseStream<Self>
    where
        Self: Sized,
    {
        SseStream::new(self)
    }
}

impl<S: Stream> SseStreamExt for S {}
