//! Listener seam for live segment events and finalized invocations.
//!
//! Handlers call their listener synchronously, inline from `feed()` and
//! `finalize()`.  A listener error aborts the call that triggered it and is
//! returned to the caller unchanged; the handler does not retry.

use segstream_core::{Result, SegmentEvent, ToolInvocation};

/// Receives events as a handler produces them.
///
/// Both methods default to no-ops so implementors only override what they
/// consume.
pub trait StreamListener: Send {
    /// Called once per segment event, in emission order.
    fn on_segment_event(&mut self, event: &SegmentEvent) -> Result<()> {
        let _ = event;
        Ok(())
    }

    /// Called once per finalized tool invocation, before the `End` event of
    /// its segment.
    fn on_tool_invocation(&mut self, invocation: &ToolInvocation) -> Result<()> {
        let _ = invocation;
        Ok(())
    }
}

/// Callback invoked for every segment event.
pub type SegmentEventCallback = Box<dyn FnMut(&SegmentEvent) -> Result<()> + Send>;

/// Callback invoked for every finalized tool invocation.
pub type ToolInvocationCallback = Box<dyn FnMut(&ToolInvocation) -> Result<()> + Send>;

/// A [`StreamListener`] built from optional closures.
///
/// ```rust
/// # use segstream_handlers::CallbackListener;
/// let listener = CallbackListener::new()
///     .with_segment_events(|event| {
///         println!("{:?} {}", event.event_type, event.segment_id);
///         Ok(())
///     });
/// # drop(listener);
/// ```
#[derive(Default)]
pub struct CallbackListener {
    on_event: Option<SegmentEventCallback>,
    on_invocation: Option<ToolInvocationCallback>,
}

impl CallbackListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the segment event callback.
    pub fn with_segment_events<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&SegmentEvent) -> Result<()> + Send + 'static,
    {
        self.on_event = Some(Box::new(callback));
        self
    }

    /// Set the tool invocation callback.
    pub fn with_tool_invocations<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&ToolInvocation) -> Result<()> + Send + 'static,
    {
        self.on_invocation = Some(Box::new(callback));
        self
    }
}

impl std::fmt::Debug for CallbackListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackListener")
            .field("on_event", &self.on_event.is_some())
            .field("on_invocation", &self.on_invocation.is_some())
            .finish()
    }
}

impl StreamListener for CallbackListener {
    fn on_segment_event(&mut self, event: &SegmentEvent) -> Result<()> {
        match self.on_event.as_mut() {
            Some(callback) => callback(event),
            None => Ok(()),
        }
    }

    fn on_tool_invocation(&mut self, invocation: &ToolInvocation) -> Result<()> {
        match self.on_invocation.as_mut() {
            Some(callback) => callback(invocation),
            None => Ok(()),
        }
    }
}
