//! Pass-through handler for agents without tools.
//!
//! No grammar is scanned: all text becomes one lazily opened `Text`
//! segment, and tool-call fragments are ignored.  The invocation list is
//! always empty, even when the text looks like tool markup.

use tracing::{debug, trace};

use segstream_core::{ResponseChunk, Result, SegmentEvent, ToolInvocation};

use crate::emitter::SegmentEmitter;
use crate::handler::StreamingResponseHandler;
use crate::listener::StreamListener;

#[derive(Debug, Default)]
pub struct PassThroughStreamingResponseHandler {
    emitter: SegmentEmitter,
    text_segment: Option<String>,
}

impl PassThroughStreamingResponseHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamingResponseHandler for PassThroughStreamingResponseHandler {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn set_listener(&mut self, listener: Box<dyn StreamListener>) {
        self.emitter.set_listener(listener);
    }

    fn feed(&mut self, chunk: &ResponseChunk) -> Result<Vec<SegmentEvent>> {
        self.emitter.ensure_feedable(self.name())?;

        if !chunk.tool_calls().is_empty() {
            trace!(
                fragments = chunk.tool_calls().len(),
                "ignoring tool-call fragments in pass-through mode"
            );
        }

        let text = chunk.content();
        if !text.is_empty() {
            let id = match &self.text_segment {
                Some(id) => id.clone(),
                None => {
                    let id = self.emitter.start_text()?;
                    self.text_segment = Some(id.clone());
                    id
                }
            };
            self.emitter.content(&id, text)?;
        }

        Ok(self.emitter.take_batch())
    }

    fn finalize(&mut self) -> Result<Vec<ToolInvocation>> {
        if self.emitter.is_finalized() {
            return Ok(Vec::new());
        }
        if let Some(id) = self.text_segment.take() {
            self.emitter.end(&id)?;
        }
        self.emitter.end_all()?;
        self.emitter.take_batch();
        self.emitter.mark_finalized();
        debug!(events = self.emitter.history().len(), "pass-through response finalized");
        Ok(Vec::new())
    }

    fn reset(&mut self) {
        self.emitter.reset();
        self.text_segment = None;
    }

    fn tool_invocations(&self) -> &[ToolInvocation] {
        self.emitter.invocations()
    }

    fn events(&self) -> &[SegmentEvent] {
        self.emitter.history()
    }

    fn is_finalized(&self) -> bool {
        self.emitter.is_finalized()
    }
}
