//! The json grammar: one call object per fenced block.
//!
//! ````text
//! ```json
//! {"name": "write_file", "arguments": {"path": "a.txt", "content": "hi"}}
//! ```
//! ````
//!
//! The name may be given as `name` or `tool` and the arguments as
//! `arguments` or `parameters` (an object, or a string holding one).  The
//! segment starts as soon as the top-level name string is complete, which
//! may be after the arguments.  A block whose object completes without a
//! name is ordinary text.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use segstream_core::{JsonStringFieldExtractor, Result};

use super::scan::{JsonObjectScanner, ObjectScan};
use super::{Header, OpenSegment, ParsingStreamingResponseHandler, ScanState, SegmentForm};

pub(super) const OPENER: &str = "```json";
pub(super) const FENCE: &str = "```";

const NAME_KEYS: [&str; 2] = ["name", "tool"];
const ARGUMENT_KEYS: [&str; 2] = ["arguments", "parameters"];

/// A fenced block whose tool name has not arrived yet.
#[derive(Debug, Clone)]
pub(super) struct JsonHeader {
    /// The opening fence and the whitespace after it.
    fence: String,
    /// Object text consumed so far.
    object: String,
    scanner: JsonObjectScanner,
    names: JsonStringFieldExtractor,
}

impl JsonHeader {
    pub(super) fn new(opener: &str) -> Self {
        Self {
            fence: opener.to_owned(),
            object: String::new(),
            scanner: JsonObjectScanner::default(),
            names: JsonStringFieldExtractor::new(Vec::<String>::new(), NAME_KEYS),
        }
    }

    pub(super) fn fence(&self) -> &str {
        &self.fence
    }

    pub(super) fn object(&self) -> &str {
        &self.object
    }
}

impl ParsingStreamingResponseHandler {
    pub(super) fn json_header(&mut self, mut header: JsonHeader) -> Result<(ScanState, bool)> {
        let tail = &self.buffer[self.cursor..];
        if tail.is_empty() {
            return Ok((ScanState::InsideHeader(Header::Json(header)), false));
        }

        if header.object.is_empty() {
            let trimmed = tail.trim_start();
            let ws = tail.len() - trimmed.len();
            if ws > 0 {
                header.fence.push_str(&tail[..ws]);
                self.cursor += ws;
                return Ok((ScanState::InsideHeader(Header::Json(header)), true));
            }
            if !trimmed.starts_with('{') {
                debug!("fenced json block without an object kept as text");
                self.sink.text(&header.fence)?;
                return Ok((ScanState::ScanningText, true));
            }
        }

        let scan = header.scanner.feed(tail);
        let take = match scan {
            ObjectScan::Complete(n) => n,
            ObjectScan::Incomplete => tail.len(),
            ObjectScan::Invalid => {
                self.sink.text(&header.fence)?;
                return Ok((ScanState::ScanningText, true));
            }
        };
        let piece = &tail[..take];
        header.object.push_str(piece);
        let mut found = header.names.feed(piece);
        self.cursor += take;

        let name = NAME_KEYS
            .iter()
            .find_map(|key| found.completed.remove(*key))
            .map(|name| name.trim().to_owned())
            .filter(|name| !name.is_empty());
        let complete = matches!(scan, ObjectScan::Complete(_));

        match name {
            Some(name) => {
                let segment_type = self.tools.segment_type(&name);
                let id = self.sink.open_tool(segment_type, &name, Map::new())?;
                let mut segment =
                    OpenSegment::new(id, segment_type, name, SegmentForm::Json(header.scanner));
                segment.append(&mut self.sink, &header.object)?;
                if complete {
                    self.finish_segment(segment)?;
                    self.fence_pending = true;
                    return Ok((ScanState::ScanningText, true));
                }
                Ok((ScanState::InsideBody(segment), true))
            }
            None if complete => {
                debug!("fenced json object without a tool name kept as text");
                self.sink.text(&header.fence)?;
                self.sink.text(&header.object)?;
                Ok((ScanState::ScanningText, true))
            }
            None => Ok((ScanState::InsideHeader(Header::Json(header)), take > 0)),
        }
    }

    pub(super) fn json_body(&mut self, mut segment: OpenSegment) -> Result<(ScanState, bool)> {
        let tail = &self.buffer[self.cursor..];
        if tail.is_empty() {
            return Ok((ScanState::InsideBody(segment), false));
        }
        let scan = match &mut segment.form {
            SegmentForm::Json(scanner) => scanner.feed(tail),
            _ => ObjectScan::Incomplete,
        };
        let take = match scan {
            ObjectScan::Complete(n) => n,
            _ => tail.len(),
        };
        segment.append(&mut self.sink, &tail[..take])?;
        self.cursor += take;

        if matches!(scan, ObjectScan::Complete(_)) {
            self.finish_segment(segment)?;
            self.fence_pending = true;
            return Ok((ScanState::ScanningText, true));
        }
        Ok((ScanState::InsideBody(segment), true))
    }
}

/// Arguments of a call object, plus the raw text when they could not be
/// decoded.
pub(super) fn call_arguments(object_text: &str) -> (Map<String, Value>, Option<String>) {
    let mut object = match serde_json::from_str::<Map<String, Value>>(object_text) {
        Ok(object) => object,
        Err(e) => {
            warn!(error = %e, "tool call object is not valid JSON; using empty arguments");
            return (Map::new(), Some(object_text.to_owned()));
        }
    };

    match ARGUMENT_KEYS.iter().find_map(|key| object.remove(*key)) {
        None | Some(Value::Null) => (Map::new(), None),
        Some(Value::Object(arguments)) => (arguments, None),
        Some(Value::String(text)) if text.trim().is_empty() => (Map::new(), None),
        Some(Value::String(text)) => match serde_json::from_str::<Map<String, Value>>(&text) {
            Ok(arguments) => (arguments, None),
            Err(e) => {
                warn!(error = %e, "string arguments are not a JSON object; using empty arguments");
                (Map::new(), Some(text))
            }
        },
        Some(other) => {
            warn!("tool call arguments are not an object; using empty arguments");
            (Map::new(), Some(other.to_string()))
        }
    }
}
