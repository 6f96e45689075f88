//! The contract shared by every streaming response handler.

use segstream_core::{ResponseChunk, Result, SegmentEvent, ToolInvocation};

use crate::listener::StreamListener;

/// Incrementally turns a streamed LLM response into segment events and
/// tool invocations.
///
/// Lifecycle: created → [`feed`](Self::feed) 0..N times →
/// [`finalize`](Self::finalize) (terminal) → optionally
/// [`reset`](Self::reset) → fed again.  One handler serves one response at
/// a time; calls must be sequential.
pub trait StreamingResponseHandler: Send {
    /// Short identifier used in logs and errors (e.g. `"parsing:xml"`).
    fn name(&self) -> &'static str;

    /// Install the listener notified inline for every event and invocation.
    fn set_listener(&mut self, listener: Box<dyn StreamListener>);

    /// Consume the next chunk and return the events it produced.
    ///
    /// Fails with [`segstream_core::StreamError::AlreadyFinalized`] after
    /// [`finalize`](Self::finalize).
    fn feed(&mut self, chunk: &ResponseChunk) -> Result<Vec<SegmentEvent>>;

    /// Convenience wrapper feeding a text chunk.
    fn feed_text(&mut self, text: &str) -> Result<Vec<SegmentEvent>> {
        self.feed(&ResponseChunk::Text(text.to_owned()))
    }

    /// Flush buffered content, close every open segment, and return the
    /// complete invocation list in order.  Calling it again returns the same
    /// list without emitting anything.
    fn finalize(&mut self) -> Result<Vec<ToolInvocation>>;

    /// Discard all buffers and history; the listener is kept.
    fn reset(&mut self);

    /// Invocations finalized so far.
    fn tool_invocations(&self) -> &[ToolInvocation];

    /// Every event emitted since creation or the last reset.
    fn events(&self) -> &[SegmentEvent];

    fn is_finalized(&self) -> bool;
}
