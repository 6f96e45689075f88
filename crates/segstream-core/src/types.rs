//! Segment and invocation data model.
//!
//! These types are the shared vocabulary of every streaming handler: a
//! response is cut into [`SegmentEvent`]s for live rendering, and the
//! tool-bearing segments are additionally finalized into
//! [`ToolInvocation`]s for the execution pipeline.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Segments
// ---------------------------------------------------------------------------

/// How a span of output should be rendered or interpreted downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentType {
    /// Plain narrative text.
    Text,
    /// A generic named tool call.
    ToolCall,
    /// A tool call that writes a whole file.
    WriteFile,
    /// A tool call that applies a patch to a file.
    PatchFile,
    /// A shell command.
    Bash,
    /// Raw file content from the `<file>` shorthand.
    File,
}

impl SegmentType {
    /// Parse the snake_case wire name used by sentinel headers.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "tool_call" | "tool" => Some(Self::ToolCall),
            "write_file" => Some(Self::WriteFile),
            "patch_file" => Some(Self::PatchFile),
            "bash" => Some(Self::Bash),
            "file" => Some(Self::File),
            _ => None,
        }
    }

    /// Whether segments of this type produce a [`ToolInvocation`] on close.
    pub fn is_tool(self) -> bool {
        !matches!(self, Self::Text)
    }
}

/// Position of an event within its segment's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentEventType {
    Start,
    Content,
    End,
}

/// One lifecycle event of one segment.
///
/// Per `segment_id` the order is always `Start`, any number of `Content`,
/// then at most one `End`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentEvent {
    pub event_type: SegmentEventType,

    pub segment_id: String,

    /// Only present on `Start`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_type: Option<SegmentType>,

    /// `{"metadata": {...}}` on `Start`, `{"delta": "..."}` on `Content`,
    /// empty on `End`.
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl SegmentEvent {
    /// Create a `Start` event carrying the segment's metadata.
    pub fn start(
        segment_id: impl Into<String>,
        segment_type: SegmentType,
        metadata: Map<String, Value>,
    ) -> Self {
        let mut payload = Map::new();
        payload.insert("metadata".into(), Value::Object(metadata));
        Self {
            event_type: SegmentEventType::Start,
            segment_id: segment_id.into(),
            segment_type: Some(segment_type),
            payload,
        }
    }

    /// Create a `Content` event carrying an incremental delta.
    pub fn content(segment_id: impl Into<String>, delta: impl Into<String>) -> Self {
        let mut payload = Map::new();
        payload.insert("delta".into(), Value::String(delta.into()));
        Self {
            event_type: SegmentEventType::Content,
            segment_id: segment_id.into(),
            segment_type: None,
            payload,
        }
    }

    /// Create an `End` event.
    pub fn end(segment_id: impl Into<String>) -> Self {
        Self {
            event_type: SegmentEventType::End,
            segment_id: segment_id.into(),
            segment_type: None,
            payload: Map::new(),
        }
    }

    /// The delta string of a `Content` event.
    pub fn delta(&self) -> Option<&str> {
        self.payload.get("delta").and_then(Value::as_str)
    }

    /// The metadata object of a `Start` event.
    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        self.payload.get("metadata").and_then(Value::as_object)
    }

    /// A string field of the `Start` metadata (e.g. `"path"`).
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata()?.get(key).and_then(Value::as_str)
    }
}

// ---------------------------------------------------------------------------
// Tool invocations
// ---------------------------------------------------------------------------

/// A finalized tool call extracted from a response.
///
/// The `id` equals the `segment_id` of the segment that carried the call, so
/// an approval sent back by a UI resolves to the same invocation.  The
/// [`Default`] value is the *invalid* invocation meaning "no tool call
/// present"; a valid call always has a non-empty name, even when its
/// arguments are empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,

    pub name: String,

    /// Arguments in wire order.
    #[serde(default)]
    pub arguments: Map<String, Value>,

    /// The unparsed argument text, kept when the authoritative parse failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_arguments: Option<String>,
}

impl ToolInvocation {
    /// Create a valid invocation.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            raw_arguments: None,
        }
    }

    /// The invocation meaning "no tool call present".
    pub fn invalid() -> Self {
        Self::default()
    }

    /// Whether this record describes an actual tool call.
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty()
    }

    /// A string argument, if present.
    pub fn argument_str(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

// ---------------------------------------------------------------------------
// Extraction results
// ---------------------------------------------------------------------------

/// The outcome of one [`crate::JsonStringFieldExtractor::feed`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionResult {
    /// Final fields whose closing quote arrived during this call, fully
    /// assembled and unescaped.
    pub completed: HashMap<String, String>,

    /// Stream fields that grew during this call, mapped to the unescaped text
    /// appended since the previous call.
    pub deltas: HashMap<String, String>,
}

impl ExtractionResult {
    /// `true` when the call neither completed a field nor produced a delta.
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.deltas.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Ids
// ---------------------------------------------------------------------------

/// Generate a fresh, time-ordered segment id such as `seg_0190c2...`.
pub fn new_segment_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::now_v7().simple())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
