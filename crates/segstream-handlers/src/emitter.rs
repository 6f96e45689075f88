//! Segment bookkeeping shared by every handler.
//!
//! [`SegmentEmitter`] owns what all handlers have in common: the listener,
//! the events produced by the current call, the event history, the set of
//! open segments, the finalized invocations, and the finalized flag.  It
//! enforces the per-segment order `Start`, `Content*`, `End?` so handler
//! code cannot emit out of order.

use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use segstream_core::{
    Result, SegmentEvent, SegmentType, StreamError, ToolInvocation, new_segment_id,
};

use crate::listener::StreamListener;

#[derive(Default)]
pub(crate) struct SegmentEmitter {
    listener: Option<Box<dyn StreamListener>>,
    /// Events produced by the current `feed()`/`finalize()` call.
    batch: Vec<SegmentEvent>,
    history: Vec<SegmentEvent>,
    /// Open segments in start order.
    open: Vec<String>,
    /// Every id that has ever been started; ids are never reused.
    started: HashSet<String>,
    invocations: Vec<ToolInvocation>,
    finalized: bool,
}

impl SegmentEmitter {
    pub(crate) fn set_listener(&mut self, listener: Box<dyn StreamListener>) {
        self.listener = Some(listener);
    }

    /// Fail fast when the handler has already been finalized.
    pub(crate) fn ensure_feedable(&self, handler: &'static str) -> Result<()> {
        if self.finalized {
            return Err(StreamError::AlreadyFinalized { handler });
        }
        Ok(())
    }

    pub(crate) fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub(crate) fn mark_finalized(&mut self) {
        self.finalized = true;
    }

    pub(crate) fn is_open(&self, segment_id: &str) -> bool {
        self.open.iter().any(|id| id == segment_id)
    }

    /// Open a new segment.  Returns `false` (and emits nothing) if the id was
    /// already used.
    pub(crate) fn start(
        &mut self,
        segment_id: &str,
        segment_type: SegmentType,
        metadata: Map<String, Value>,
    ) -> Result<bool> {
        if !self.started.insert(segment_id.to_owned()) {
            warn!(segment_id, "segment id already used; start ignored");
            return Ok(false);
        }
        debug!(segment_id, segment_type = ?segment_type, "segment started");
        self.open.push(segment_id.to_owned());
        self.dispatch(SegmentEvent::start(segment_id, segment_type, metadata))?;
        Ok(true)
    }

    /// Open a new text segment with a generated id.
    pub(crate) fn start_text(&mut self) -> Result<String> {
        let id = new_segment_id("seg");
        self.start(&id, SegmentType::Text, Map::new())?;
        Ok(id)
    }

    /// Append a delta to an open segment.  Empty deltas are dropped.
    pub(crate) fn content(&mut self, segment_id: &str, delta: &str) -> Result<()> {
        if delta.is_empty() {
            return Ok(());
        }
        if !self.is_open(segment_id) {
            warn!(segment_id, "content for a segment that is not open; dropped");
            return Ok(());
        }
        self.dispatch(SegmentEvent::content(segment_id, delta))
    }

    /// Close an open segment.  Closing twice is a no-op.
    pub(crate) fn end(&mut self, segment_id: &str) -> Result<()> {
        let Some(pos) = self.open.iter().position(|id| id == segment_id) else {
            return Ok(());
        };
        self.open.remove(pos);
        debug!(segment_id, "segment ended");
        self.dispatch(SegmentEvent::end(segment_id))
    }

    /// Close every segment still open, in start order.
    pub(crate) fn end_all(&mut self) -> Result<()> {
        for id in std::mem::take(&mut self.open) {
            debug!(segment_id = %id, "segment force-closed");
            self.dispatch(SegmentEvent::end(id))?;
        }
        Ok(())
    }

    /// Record a finalized invocation and notify the listener.
    pub(crate) fn invocation(&mut self, invocation: ToolInvocation) -> Result<()> {
        debug!(
            id = %invocation.id,
            name = %invocation.name,
            arguments = invocation.arguments.len(),
            "tool invocation finalized"
        );
        self.invocations.push(invocation);
        if let (Some(listener), Some(invocation)) = (self.listener.as_mut(), self.invocations.last())
        {
            listener.on_tool_invocation(invocation)?;
        }
        Ok(())
    }

    pub(crate) fn invocations(&self) -> &[ToolInvocation] {
        &self.invocations
    }

    pub(crate) fn history(&self) -> &[SegmentEvent] {
        &self.history
    }

    /// Take the events produced since the last call.
    pub(crate) fn take_batch(&mut self) -> Vec<SegmentEvent> {
        std::mem::take(&mut self.batch)
    }

    /// Forget everything except the listener.
    pub(crate) fn reset(&mut self) {
        self.batch.clear();
        self.history.clear();
        self.open.clear();
        self.started.clear();
        self.invocations.clear();
        self.finalized = false;
    }

    fn dispatch(&mut self, event: SegmentEvent) -> Result<()> {
        self.history.push(event.clone());
        self.batch.push(event);
        if let (Some(listener), Some(event)) = (self.listener.as_mut(), self.batch.last()) {
            listener.on_segment_event(event)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SegmentEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentEmitter")
            .field("has_listener", &self.listener.is_some())
            .field("events", &self.history.len())
            .field("open", &self.open)
            .field("invocations", &self.invocations.len())
            .field("finalized", &self.finalized)
            .finish()
    }
}
