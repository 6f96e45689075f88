//! Handler for provider-native tool-call deltas.
//!
//! Providers with structured tool calling stream each call as fragments
//! `{index, call_id, name, arguments_delta}`, where `arguments_delta` is an
//! arbitrary byte split of the call's JSON arguments.  Fragments of several
//! calls may interleave, and narrative text arrives alongside them as chunk
//! content.
//!
//! One [`CallBuilder`] per index accumulates the id, name and raw argument
//! text.  Providers may split the name and send the call id late, so a call
//! is classified only when its first argument fragment arrives (or at
//! finalize when none does):
//!
//! - **File tools** (`write_file`, `patch_file`, ...) get a
//!   [`FileContentStreamer`].  Their segment starts only once the `path`
//!   argument has arrived, with the path in its metadata, and the file body
//!   streams live as `Content` from then on.
//! - **Other tools** start at classification and stream their raw argument
//!   text.
//!
//! At [`finalize`](StreamingResponseHandler::finalize) the accumulated
//! argument text of every call is parsed once, authoritatively, into the
//! invocation arguments.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use segstream_core::{
    FileContentStreamer, ResponseChunk, Result, SegmentEvent, SegmentType, ToolCallDelta,
    ToolInvocation, new_segment_id,
};

use crate::config::{StreamConfig, ToolClassification};
use crate::emitter::SegmentEmitter;
use crate::handler::StreamingResponseHandler;
use crate::listener::StreamListener;

// ---------------------------------------------------------------------------
// Call builder
// ---------------------------------------------------------------------------

/// In-progress tool call assembled from streaming fragments.
#[derive(Debug, Default)]
struct CallBuilder {
    /// Provider call id (e.g. `"call_abc123"`), first one wins.
    call_id: Option<String>,
    /// Accumulated function name.
    name: String,
    /// Accumulated argument JSON text.
    raw_arguments: String,
    /// Set when the call is classified.
    segment_type: Option<SegmentType>,
    /// Present for file-mutating tools.
    file: Option<FileContentStreamer>,
    /// Set once `Start` has been emitted.
    segment_id: Option<String>,
}

impl CallBuilder {
    /// Classify the call by its accumulated name.  Returns `false` while no
    /// name has arrived.
    fn classify(&mut self, tools: &ToolClassification) -> bool {
        let name = self.name.trim();
        if name.is_empty() {
            return false;
        }
        let segment_type = tools.segment_type(name);
        self.segment_type = Some(segment_type);
        self.file = tools.file_kind(name).map(FileContentStreamer::new);
        debug!(tool = %name, segment_type = ?segment_type, "tool call classified");
        true
    }
}

// ---------------------------------------------------------------------------
// ApiToolCallStreamingResponseHandler
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ApiToolCallStreamingResponseHandler {
    tools: ToolClassification,
    /// Builders keyed by provider index; iteration order is index order.
    builders: BTreeMap<usize, CallBuilder>,
    text_segment: Option<String>,
    emitter: SegmentEmitter,
}

impl Default for ApiToolCallStreamingResponseHandler {
    fn default() -> Self {
        Self::new(&StreamConfig::default())
    }
}

impl ApiToolCallStreamingResponseHandler {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            tools: config.tools.clone(),
            builders: BTreeMap::new(),
            text_segment: None,
            emitter: SegmentEmitter::default(),
        }
    }

    fn text(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        let id = match &self.text_segment {
            Some(id) => id.clone(),
            None => {
                let id = self.emitter.start_text()?;
                self.text_segment = Some(id.clone());
                id
            }
        };
        self.emitter.content(&id, text)
    }

    fn apply_delta(&mut self, delta: &ToolCallDelta) -> Result<()> {
        let builder = self.builders.entry(delta.index).or_default();

        if let Some(call_id) = delta.call_id.as_deref().filter(|id| !id.is_empty()) {
            if builder.call_id.is_none() {
                builder.call_id = Some(call_id.to_owned());
            }
        }
        if let Some(name) = &delta.name {
            builder.name.push_str(name);
        }
        let fragment = delta.arguments_delta.as_deref().unwrap_or_default();
        builder.raw_arguments.push_str(fragment);

        if builder.segment_type.is_some() {
            return stream_arguments(&mut self.emitter, builder, fragment);
        }
        // The name is complete once arguments start.
        if fragment.is_empty() || !builder.classify(&self.tools) {
            return Ok(());
        }

        if builder.file.is_none() {
            let metadata = tool_metadata(builder.name.trim());
            start_segment(&mut self.emitter, builder, metadata)?;
        }
        let replay = builder.raw_arguments.clone();
        stream_arguments(&mut self.emitter, builder, &replay)
    }
}

fn tool_metadata(tool_name: &str) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("tool_name".into(), Value::String(tool_name.to_owned()));
    metadata
}

/// Emit `Start` for a call, using the provider call id when it is unused.
fn start_segment(
    emitter: &mut SegmentEmitter,
    builder: &mut CallBuilder,
    metadata: Map<String, Value>,
) -> Result<()> {
    let segment_type = builder.segment_type.unwrap_or(SegmentType::ToolCall);
    let preferred = builder
        .call_id
        .clone()
        .unwrap_or_else(|| new_segment_id("call"));

    let id = if emitter.start(&preferred, segment_type, metadata.clone())? {
        preferred
    } else {
        let fresh = new_segment_id("call");
        warn!(call_id = %preferred, segment_id = %fresh, "duplicate provider call id; using a fresh segment id");
        emitter.start(&fresh, segment_type, metadata)?;
        fresh
    };
    builder.segment_id = Some(id);
    Ok(())
}

/// Stream a fragment of argument text for a classified call.
fn stream_arguments(
    emitter: &mut SegmentEmitter,
    builder: &mut CallBuilder,
    fragment: &str,
) -> Result<()> {
    if fragment.is_empty() {
        return Ok(());
    }

    let update = match builder.file.as_mut() {
        Some(file) => file.feed(fragment),
        None => {
            return match &builder.segment_id {
                Some(id) => emitter.content(id, fragment),
                None => Ok(()),
            };
        }
    };

    if builder.segment_id.is_none() {
        // Deferred until the path is known.
        let Some(path) = update.path else {
            return Ok(());
        };
        let mut metadata = Map::new();
        metadata.insert("path".into(), Value::String(path));
        metadata.insert("tool_name".into(), Value::String(builder.name.trim().to_owned()));
        start_segment(emitter, builder, metadata)?;
    }
    match &builder.segment_id {
        Some(id) => emitter.content(id, &update.content_delta),
        None => Ok(()),
    }
}

/// Parse the accumulated argument text.  Returns the raw text alongside
/// empty arguments when it is not a JSON object.
fn parse_arguments(raw: &str, tool: &str) -> (Map<String, Value>, Option<String>) {
    if raw.trim().is_empty() {
        return (Map::new(), None);
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(arguments)) => (arguments, None),
        Ok(_) => {
            warn!(tool, "tool call arguments are not a JSON object; using defaults");
            (Map::new(), Some(raw.to_owned()))
        }
        Err(e) => {
            warn!(tool, error = %e, "tool call arguments are not valid JSON; using defaults");
            (Map::new(), Some(raw.to_owned()))
        }
    }
}

impl StreamingResponseHandler for ApiToolCallStreamingResponseHandler {
    fn name(&self) -> &'static str {
        "api_tool_call"
    }

    fn set_listener(&mut self, listener: Box<dyn StreamListener>) {
        self.emitter.set_listener(listener);
    }

    fn feed(&mut self, chunk: &ResponseChunk) -> Result<Vec<SegmentEvent>> {
        self.emitter.ensure_feedable(self.name())?;
        self.text(chunk.content())?;
        for delta in chunk.tool_calls() {
            self.apply_delta(delta)?;
        }
        Ok(self.emitter.take_batch())
    }

    fn finalize(&mut self) -> Result<Vec<ToolInvocation>> {
        if self.emitter.is_finalized() {
            return Ok(self.emitter.invocations().to_vec());
        }

        for (index, mut builder) in std::mem::take(&mut self.builders) {
            let name = builder.name.trim().to_owned();
            if name.is_empty() {
                warn!(
                    index,
                    arguments = builder.raw_arguments.len(),
                    "tool call without a name dropped"
                );
                continue;
            }

            if builder.segment_type.is_none() {
                builder.classify(&self.tools);
                if let Some(file) = builder.file.as_mut() {
                    file.feed(&builder.raw_arguments);
                }
            }

            let (mut arguments, raw_arguments) = parse_arguments(&builder.raw_arguments, &name);
            if let Some(file) = &builder.file {
                let path = file.path().unwrap_or_default().to_owned();
                let body = file.content().unwrap_or_default().to_owned();
                arguments
                    .entry("path")
                    .or_insert_with(|| Value::String(path));
                arguments
                    .entry(file.kind().body_field())
                    .or_insert_with(|| Value::String(body));
            }

            if builder.segment_id.is_none() {
                let mut metadata = tool_metadata(&name);
                let body_field = builder.file.as_ref().map(|f| f.kind().body_field());
                if builder.file.is_some() {
                    let path = arguments.get("path").cloned().unwrap_or_default();
                    metadata.insert("path".into(), path);
                }
                start_segment(&mut self.emitter, &mut builder, metadata)?;
                let body = body_field
                    .and_then(|field| arguments.get(field))
                    .and_then(Value::as_str);
                if let (Some(id), Some(body)) = (&builder.segment_id, body) {
                    self.emitter.content(id, body)?;
                }
            }

            let id = builder.segment_id.unwrap_or_default();
            let mut invocation = ToolInvocation::new(id.clone(), name, arguments);
            invocation.raw_arguments = raw_arguments;
            self.emitter.invocation(invocation)?;
            self.emitter.end(&id)?;
        }

        if let Some(id) = self.text_segment.take() {
            self.emitter.end(&id)?;
        }
        self.emitter.end_all()?;
        self.emitter.take_batch();
        self.emitter.mark_finalized();
        debug!(
            invocations = self.emitter.invocations().len(),
            "native tool-call response finalized"
        );
        Ok(self.emitter.invocations().to_vec())
    }

    fn reset(&mut self) {
        self.builders.clear();
        self.text_segment = None;
        self.emitter.reset();
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

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use segstream_core::SegmentEventType;
    use serde_json::json;

    use super::*;

    fn args(index: usize, text: &str) -> ResponseChunk {
        ToolCallDelta::arguments(index, text).into()
    }

    fn deltas_for(h: &ApiToolCallStreamingResponseHandler, id: &str) -> String {
        h.events()
            .iter()
            .filter(|e| e.segment_id == id)
            .filter_map(SegmentEvent::delta)
            .collect()
    }

    #[test]
    fn generic_tool_starts_on_first_arguments_and_streams_raw_text() {
        let mut h = ApiToolCallStreamingResponseHandler::default();
        let events = h
            .feed(&ToolCallDelta::begin(0, "call_1", "search").into())
            .unwrap();
        assert!(events.is_empty());

        let events = h.feed(&args(0, "{\"q\": ")).unwrap();
        assert_eq!(events[0].event_type, SegmentEventType::Start);
        assert_eq!(events[0].segment_id, "call_1");
        assert_eq!(events[0].segment_type, Some(SegmentType::ToolCall));
        assert_eq!(events[1].delta(), Some("{\"q\": "));
        h.feed(&args(0, "\"rust\"}")).unwrap();
        let invs = h.finalize().unwrap();
        assert_eq!(invs[0].id, "call_1");
        assert_eq!(Value::Object(invs[0].arguments.clone()), json!({"q": "rust"}));
        assert_eq!(deltas_for(&h, "call_1"), "{\"q\": \"rust\"}");
    }

    #[test]
    fn file_tool_defers_start_until_path() {
        let mut h = ApiToolCallStreamingResponseHandler::default();
        h.feed(&ToolCallDelta::begin(0, "call_w", "write_file").into())
            .unwrap();
        assert!(h.feed(&args(0, "{\"content\": \"line 1\\n")).unwrap().is_empty());
        assert!(h.feed(&args(0, "line 2\", \"pa")).unwrap().is_empty());

        let events = h.feed(&args(0, "th\": \"notes.md\"}")).unwrap();
        assert_eq!(events[0].event_type, SegmentEventType::Start);
        assert_eq!(events[0].segment_type, Some(SegmentType::WriteFile));
        assert_eq!(events[0].metadata_str("path"), Some("notes.md"));
        assert_eq!(events[0].metadata_str("tool_name"), Some("write_file"));
        assert_eq!(events[1].delta(), Some("line 1\nline 2"));

        let invs = h.finalize().unwrap();
        assert_eq!(invs[0].argument_str("path"), Some("notes.md"));
        assert_eq!(invs[0].argument_str("content"), Some("line 1\nline 2"));
    }

    #[test]
    fn path_first_streams_body_live() {
        let mut h = ApiToolCallStreamingResponseHandler::default();
        h.feed(&ToolCallDelta::begin(0, "call_p", "patch_file").into())
            .unwrap();
        let events = h.feed(&args(0, "{\"path\": \"a.rs\", \"patch\": \"-x")).unwrap();
        assert_eq!(events[0].segment_type, Some(SegmentType::PatchFile));
        assert_eq!(events[1].delta(), Some("-x"));
        let events = h.feed(&args(0, "\\n+y\"}")).unwrap();
        assert_eq!(events[0].delta(), Some("\n+y"));
    }

    #[test]
    fn parallel_calls_finalize_in_index_order() {
        let mut h = ApiToolCallStreamingResponseHandler::default();
        h.feed(&ResponseChunk::ToolCalls {
            content: "Running both.".into(),
            tool_calls: vec![
                ToolCallDelta::begin(1, "call_b", "run_bash"),
                ToolCallDelta::begin(0, "call_a", "search"),
            ],
        })
        .unwrap();
        h.feed(&args(1, "{\"command\": \"ls\"}")).unwrap();
        h.feed(&args(0, "{\"q\": \"x\"}")).unwrap();

        let invs = h.finalize().unwrap();
        let ids: Vec<_> = invs.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["call_a", "call_b"]);
        assert_eq!(invs[1].argument_str("command"), Some("ls"));

        let last = h.events().last().unwrap();
        assert_eq!(last.event_type, SegmentEventType::End);
        assert!(last.segment_id.starts_with("seg_"));
    }

    #[test]
    fn invalid_arguments_keep_raw_text() {
        let mut h = ApiToolCallStreamingResponseHandler::default();
        h.feed(&ToolCallDelta::begin(0, "call_1", "write_file").into())
            .unwrap();
        h.feed(&args(0, "{\"path\": \"x.txt\", \"content\": \"unterminated"))
            .unwrap();
        let invs = h.finalize().unwrap();
        assert_eq!(invs[0].argument_str("path"), Some("x.txt"));
        assert_eq!(invs[0].argument_str("content"), Some(""));
        assert!(invs[0].raw_arguments.as_deref().unwrap().ends_with("unterminated"));
    }

    #[test]
    fn deferred_file_tool_starts_at_finalize() {
        let mut h = ApiToolCallStreamingResponseHandler::default();
        h.feed(&ToolCallDelta::begin(0, "call_1", "write_file").into())
            .unwrap();
        h.feed(&args(0, "{\"content\": \"orphan\"}")).unwrap();
        assert!(h.events().is_empty());

        let invs = h.finalize().unwrap();
        assert_eq!(invs[0].argument_str("path"), Some(""));
        let kinds: Vec<_> = h.events().iter().map(|e| e.event_type).collect();
        assert_eq!(
            kinds,
            vec![SegmentEventType::Start, SegmentEventType::Content, SegmentEventType::End]
        );
        assert_eq!(h.events()[1].delta(), Some("orphan"));
    }

    #[test]
    fn nameless_calls_are_dropped() {
        let mut h = ApiToolCallStreamingResponseHandler::default();
        h.feed(&args(3, "{\"a\": 1}")).unwrap();
        assert!(h.finalize().unwrap().is_empty());
        assert!(h.events().is_empty());
    }

    #[test]
    fn missing_call_id_gets_generated_id() {
        let mut h = ApiToolCallStreamingResponseHandler::default();
        h.feed(
            &ToolCallDelta {
                index: 0,
                name: Some("list_files".into()),
                ..Default::default()
            }
            .into(),
        )
        .unwrap();
        let invs = h.finalize().unwrap();
        assert!(invs[0].id.starts_with("call_"));
        assert!(invs[0].arguments.is_empty());
        assert!(invs[0].raw_arguments.is_none());
    }

    #[test]
    fn split_name_is_classified_once_complete() {
        let mut h = ApiToolCallStreamingResponseHandler::default();
        h.feed(&ToolCallDelta::begin(0, "call_1", "write").into()).unwrap();
        h.feed(
            &ToolCallDelta {
                index: 0,
                name: Some("_file".into()),
                ..Default::default()
            }
            .into(),
        )
        .unwrap();
        let events = h
            .feed(&args(0, "{\"path\": \"a.txt\", \"content\": \"hi\"}"))
            .unwrap();
        assert_eq!(events[0].event_type, SegmentEventType::Start);
        assert_eq!(events[0].segment_type, Some(SegmentType::WriteFile));
        assert_eq!(events[0].metadata_str("tool_name"), Some("write_file"));
        assert_eq!(events[0].metadata_str("path"), Some("a.txt"));

        let invs = h.finalize().unwrap();
        assert_eq!(invs[0].name, "write_file");
        assert_eq!(invs[0].id, "call_1");
        assert_eq!(deltas_for(&h, "call_1"), "hi");
    }

    #[test]
    fn call_id_after_name_becomes_segment_id() {
        let mut h = ApiToolCallStreamingResponseHandler::default();
        h.feed(
            &ToolCallDelta {
                index: 0,
                name: Some("search".into()),
                ..Default::default()
            }
            .into(),
        )
        .unwrap();
        h.feed(
            &ToolCallDelta {
                index: 0,
                call_id: Some("call_late".into()),
                ..Default::default()
            }
            .into(),
        )
        .unwrap();
        let events = h.feed(&args(0, "{\"q\": \"x\"}")).unwrap();
        assert_eq!(events[0].segment_id, "call_late");

        let invs = h.finalize().unwrap();
        assert_eq!(invs[0].id, "call_late");
    }

    #[test]
    fn split_name_without_arguments_is_classified_at_finalize() {
        let mut h = ApiToolCallStreamingResponseHandler::default();
        h.feed(&ToolCallDelta::begin(0, "call_1", "run_").into()).unwrap();
        h.feed(
            &ToolCallDelta {
                index: 0,
                name: Some("bash".into()),
                ..Default::default()
            }
            .into(),
        )
        .unwrap();
        assert!(h.events().is_empty());
        let invs = h.finalize().unwrap();
        assert_eq!(invs[0].name, "run_bash");
        assert_eq!(h.events()[0].segment_type, Some(SegmentType::Bash));
    }

    #[test]
    fn duplicate_call_ids_get_distinct_segments() {
        let mut h = ApiToolCallStreamingResponseHandler::default();
        h.feed(&ToolCallDelta::begin(0, "call_x", "a").into()).unwrap();
        h.feed(&ToolCallDelta::begin(1, "call_x", "b").into()).unwrap();
        let invs = h.finalize().unwrap();
        assert_eq!(invs[0].id, "call_x");
        assert_ne!(invs[1].id, "call_x");
    }
}
