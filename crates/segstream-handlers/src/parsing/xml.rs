//! The xml grammar.
//!
//! ```text
//! <tool name="search"><arg name="query">rust</arg></tool>
//! <file path="src/main.rs">fn main() {}</file>
//! <bash>cargo test</bash>
//! ```
//!
//! `<tool>` bodies are scanned for `</tool>` (whitespace may precede the
//! `>`) and `<![CDATA[`; a CDATA
//! section is raw until `]]>` so it may contain `</tool>`.  `<file>` and
//! `<bash>` bodies are raw until their close tag: markup, comments and
//! entities inside them are content.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use segstream_core::{Result, SegmentType};

use super::scan::{Accept, MarkerSearch};
use super::{Header, OpenSegment, ParsingStreamingResponseHandler, ScanState, SegmentForm};
use crate::xml_document::{TagScan, scan_start_tag};

pub(super) const OPENERS: [&str; 3] = ["<tool", "<file", "<bash"];
pub(super) const BODY_MARKERS: [&str; 2] = ["</tool", "<![CDATA["];

const TOOL_CLOSE: usize = 0;
const CDATA_CLOSE: &str = "]]>";
const FILE_CLOSE: &str = "</file>";
const BASH_CLOSE: &str = "</bash>";

impl ParsingStreamingResponseHandler {
    pub(super) fn xml_header(&mut self, marker: usize) -> Result<(ScanState, bool)> {
        let tail = &self.buffer[self.cursor..];
        let max = self.parsing.max_header_bytes;

        // Prose such as `<tool that's` is released as soon as it stops
        // looking like attributes.
        let tag = match scan_start_tag(tail) {
            TagScan::Complete(tag) if tag.len <= max => tag,
            TagScan::Complete(_) => return self.oversized_header(),
            TagScan::Incomplete if tail.len() > max => return self.oversized_header(),
            TagScan::Incomplete => {
                return Ok((ScanState::InsideHeader(Header::Markup { marker }), false));
            }
            TagScan::Invalid => {
                debug!("malformed opening tag released as text");
                return self.release_opener_byte();
            }
        };
        let header_len = tag.len;

        match tag.name.as_str() {
            "tool" => {
                let name = tag.attribute("name").map(str::trim).unwrap_or_default();
                if name.is_empty() {
                    warn!("<tool> without a name attribute released as text");
                    self.sink.text(&tail[..header_len])?;
                    self.cursor += header_len;
                    return Ok((ScanState::ScanningText, true));
                }
                let segment_type = self.tools.segment_type(name);
                let mut metadata = Map::new();
                if let Some(path) = tag.attribute("path") {
                    metadata.insert("path".into(), Value::String(path.to_owned()));
                }
                let id = self.sink.open_tool(segment_type, name, metadata)?;
                self.cursor += header_len;
                let segment = OpenSegment::new(id, segment_type, name.to_owned(), SegmentForm::XmlTool);
                self.open_body(segment, tag.self_closing, None)
            }
            "file" => {
                let path = tag.attribute("path").unwrap_or_default().to_owned();
                let tool_name = self.parsing.file_tool_name.clone();
                let mut metadata = Map::new();
                metadata.insert("path".into(), Value::String(path.clone()));
                let id = self.sink.open_tool(SegmentType::File, &tool_name, metadata)?;
                self.cursor += header_len;
                let segment = OpenSegment::new(id, SegmentType::File, tool_name, SegmentForm::XmlFile { path });
                self.open_body(segment, tag.self_closing, Some(FILE_CLOSE))
            }
            "bash" => {
                let tool_name = self.parsing.bash_tool_name.clone();
                let id = self.sink.open_tool(SegmentType::Bash, &tool_name, Map::new())?;
                self.cursor += header_len;
                let segment = OpenSegment::new(id, SegmentType::Bash, tool_name, SegmentForm::XmlBash);
                self.open_body(segment, tag.self_closing, Some(BASH_CLOSE))
            }
            _ => self.release_opener_byte(),
        }
    }

    fn oversized_header(&mut self) -> Result<(ScanState, bool)> {
        warn!(
            max_header_bytes = self.parsing.max_header_bytes,
            "opening tag too long; released as text"
        );
        self.release_opener_byte()
    }

    /// Continue after a start tag: close at once when self-closing, else scan
    /// the body (raw when `raw_close` is set).
    fn open_body(
        &mut self,
        segment: OpenSegment,
        self_closing: bool,
        raw_close: Option<&'static str>,
    ) -> Result<(ScanState, bool)> {
        if self_closing {
            self.finish_segment(segment)?;
            return Ok((ScanState::ScanningText, true));
        }
        let next = match raw_close {
            Some(close) => ScanState::InsideRaw {
                segment,
                close,
                resume: false,
            },
            None => ScanState::InsideBody(segment),
        };
        Ok((next, true))
    }

    pub(super) fn xml_body(&mut self, mut segment: OpenSegment) -> Result<(ScanState, bool)> {
        let tail = &self.buffer[self.cursor..];
        let search = match &self.xml_body {
            Some(markers) => markers.find_with(tail, |pos, marker| match marker {
                TOOL_CLOSE => close_tag_rest(&tail[pos + BODY_MARKERS[TOOL_CLOSE].len()..]),
                _ => Accept::Yes,
            }),
            None => MarkerSearch::NotFound,
        };

        match search {
            MarkerSearch::Found { pos, marker } => {
                segment.append(&mut self.sink, &tail[..pos])?;
                let token = BODY_MARKERS[marker];
                if marker == TOOL_CLOSE {
                    let rest = &tail[pos + token.len()..];
                    let padding = rest.len() - rest.trim_start().len();
                    self.cursor += pos + token.len() + padding + 1;
                    self.finish_segment(segment)?;
                    return Ok((ScanState::ScanningText, true));
                }
                self.cursor += pos + token.len();
                segment.append(&mut self.sink, token)?;
                let next = ScanState::InsideRaw {
                    segment,
                    close: CDATA_CLOSE,
                    resume: true,
                };
                Ok((next, true))
            }
            MarkerSearch::Partial(pos) => {
                segment.append(&mut self.sink, &tail[..pos])?;
                self.cursor += pos;
                Ok((ScanState::InsideBody(segment), pos > 0))
            }
            MarkerSearch::NotFound => {
                let progressed = !tail.is_empty();
                segment.append(&mut self.sink, tail)?;
                self.cursor = self.buffer.len();
                Ok((ScanState::InsideBody(segment), progressed))
            }
        }
    }
}

/// Whether the text after `</tool` completes the close tag.  `</tools>` and
/// the like stay in the body.
fn close_tag_rest(rest: &str) -> Accept {
    let rest = rest.trim_start();
    if rest.starts_with('>') {
        Accept::Yes
    } else if rest.is_empty() {
        Accept::NeedMore
    } else {
        Accept::No
    }
}

/// `write_file {path, content}` from the `<file>` shorthand.
pub(super) fn file_arguments(path: String, content: String) -> Map<String, Value> {
    let mut arguments = Map::new();
    arguments.insert("path".into(), Value::String(path));
    arguments.insert("content".into(), Value::String(content));
    arguments
}

/// `run_bash {command}` from the `<bash>` shorthand.
pub(super) fn bash_arguments(body: &str) -> Map<String, Value> {
    let mut arguments = Map::new();
    arguments.insert("command".into(), Value::String(body.trim().to_owned()));
    arguments
}
