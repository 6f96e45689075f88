//! The sentinel grammar.
//!
//! ```text
//! [[SEG_START {"type": "write_file", "tool_name": "write_file", "arguments": {"path": "a.txt"}}]]
//! file body streams here verbatim
//! [[SEG_END]]
//! ```
//!
//! The header is one JSON object.  `type` selects the segment type and
//! `tool_name` the invocation name; either may be omitted when the other
//! implies it.  Header fields other than `type` and `arguments` become
//! `Start` metadata.  A `"text"` segment produces no invocation.  The body
//! fills `content`, `patch` or `command` when the header arguments lack it.

use std::ops::Range;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use segstream_core::{Result, SegmentType, new_segment_id};

use super::scan::{JsonObjectScanner, ObjectScan};
use super::{Header, OpenSegment, ParsingStreamingResponseHandler, ScanState, SegmentForm};

pub(super) const OPENER: &str = "[[SEG_START";
const CLOSE: &str = "[[SEG_END]]";
const HEADER_END: &str = "]]";

#[derive(Debug, Deserialize)]
struct SentinelHeader {
    #[serde(rename = "type", default)]
    segment_type: Option<String>,

    #[serde(default)]
    tool_name: Option<String>,

    #[serde(default)]
    arguments: Option<Value>,

    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, PartialEq, Eq)]
enum HeaderScan {
    /// `json` is the header object; `len` covers everything through `]]`.
    Complete { json: Range<usize>, len: usize },
    NeedMore,
    Invalid,
}

/// Scans the text following the opener marker, resuming each step where
/// the previous one stopped.
#[derive(Debug, Default)]
pub(super) struct HeaderScanner {
    object: JsonObjectScanner,
    /// Bytes after the opener already fed to `object`.
    scanned: usize,
    /// End of the header object once it has closed.
    object_end: Option<usize>,
}

impl HeaderScanner {
    fn scan(&mut self, after: &str) -> HeaderScan {
        let end = match self.object_end {
            Some(end) => end,
            None => match self.object.feed(&after[self.scanned..]) {
                ObjectScan::Complete(n) => {
                    let end = self.scanned + n;
                    self.object_end = Some(end);
                    end
                }
                ObjectScan::Incomplete => {
                    self.scanned = after.len();
                    return HeaderScan::NeedMore;
                }
                ObjectScan::Invalid => return HeaderScan::Invalid,
            },
        };
        let start = after.len() - after.trim_start().len();
        let rest = after[end..].trim_start();
        if rest.starts_with(HEADER_END) {
            let close_at = after.len() - rest.len();
            return HeaderScan::Complete {
                json: start..end,
                len: close_at + HEADER_END.len(),
            };
        }
        if HEADER_END.starts_with(rest) {
            return HeaderScan::NeedMore;
        }
        HeaderScan::Invalid
    }
}

impl ParsingStreamingResponseHandler {
    pub(super) fn sentinel_header(
        &mut self,
        mut scanner: HeaderScanner,
    ) -> Result<(ScanState, bool)> {
        let tail = &self.buffer[self.cursor..];
        let after = &tail[OPENER.len()..];
        let max = self.parsing.max_header_bytes;

        let (json, header_len) = match scanner.scan(after) {
            HeaderScan::Complete { json, len } if OPENER.len() + len <= max => {
                (json, OPENER.len() + len)
            }
            HeaderScan::NeedMore if tail.len() <= max => {
                return Ok((ScanState::InsideHeader(Header::Sentinel(scanner)), false));
            }
            HeaderScan::Invalid => {
                debug!("malformed sentinel header released as text");
                return self.release_opener_byte();
            }
            _ => {
                warn!(max_header_bytes = max, "sentinel header too long; released as text");
                return self.release_opener_byte();
            }
        };

        let header: SentinelHeader = match serde_json::from_str(&after[json]) {
            Ok(header) => header,
            Err(e) => {
                warn!(error = %e, "sentinel header is not a valid object; released as text");
                return self.release_opener_byte();
            }
        };
        self.cursor += header_len;

        let declared = header.segment_type.as_deref().and_then(SegmentType::from_wire);
        let tool_name = header
            .tool_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_owned);
        let (segment_type, tool_name) = match (declared, tool_name) {
            (Some(SegmentType::Text), _) | (None, None) => (SegmentType::Text, None),
            (Some(ty), Some(name)) => (ty, Some(name)),
            (Some(ty), None) => match self.default_tool_name(ty) {
                Some(name) => (ty, Some(name)),
                None => {
                    warn!("sentinel tool segment without a tool_name rendered as text");
                    (SegmentType::Text, None)
                }
            },
            (None, Some(name)) => (self.tools.segment_type(&name), Some(name)),
        };

        let mut arguments = match header.arguments {
            Some(Value::Object(map)) => map,
            Some(Value::String(text)) => serde_json::from_str(&text).unwrap_or_default(),
            _ => Map::new(),
        };
        let mut metadata = header.extra;
        if let Some(path) = metadata.get("path").cloned() {
            arguments.entry("path").or_insert(path);
        } else if let Some(path) = arguments.get("path").cloned() {
            metadata.insert("path".into(), path);
        }

        let segment = match tool_name {
            Some(name) => {
                let id = self.sink.open_tool(segment_type, &name, metadata)?;
                OpenSegment::new(id, segment_type, name, SegmentForm::Sentinel { arguments })
            }
            None => {
                self.sink.close_text()?;
                let id = new_segment_id("seg");
                self.sink.emitter.start(&id, SegmentType::Text, metadata)?;
                OpenSegment::new(
                    id,
                    SegmentType::Text,
                    String::new(),
                    SegmentForm::Sentinel { arguments },
                )
            }
        };

        let next = ScanState::InsideRaw {
            segment,
            close: CLOSE,
            resume: false,
        };
        Ok((next, true))
    }

    fn default_tool_name(&self, segment_type: SegmentType) -> Option<String> {
        match segment_type {
            SegmentType::WriteFile | SegmentType::File => Some(self.parsing.file_tool_name.clone()),
            SegmentType::Bash => Some(self.parsing.bash_tool_name.clone()),
            SegmentType::PatchFile => Some(
                self.tools
                    .patch_file
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "patch_file".to_owned()),
            ),
            SegmentType::ToolCall | SegmentType::Text => None,
        }
    }
}

/// Header arguments completed from the body.
pub(super) fn fill_arguments(
    segment_type: SegmentType,
    mut arguments: Map<String, Value>,
    body: &str,
) -> Map<String, Value> {
    let file_body = || {
        let body = body
            .strip_prefix("\r\n")
            .or_else(|| body.strip_prefix('\n'))
            .unwrap_or(body);
        Value::String(body.to_owned())
    };
    match segment_type {
        SegmentType::WriteFile | SegmentType::File => {
            arguments.entry("content").or_insert_with(file_body);
        }
        SegmentType::PatchFile => {
            arguments.entry("patch").or_insert_with(file_body);
        }
        SegmentType::Bash => {
            arguments
                .entry("command")
                .or_insert_with(|| Value::String(body.trim().to_owned()));
        }
        SegmentType::ToolCall if arguments.is_empty() => {
            if let Ok(parsed) = serde_json::from_str::<Map<String, Value>>(body.trim()) {
                arguments = parsed;
            }
        }
        SegmentType::ToolCall | SegmentType::Text => {}
    }
    arguments
}
