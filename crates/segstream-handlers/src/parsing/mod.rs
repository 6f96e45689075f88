//! Handler for tool calls embedded in free text.
//!
//! [`ParsingStreamingResponseHandler`] runs one incremental scanner over an
//! append-only buffer.  Each `feed()` appends the chunk and scans only the
//! unconsumed tail; whatever cannot be decided yet (a partial `<to`, an
//! unterminated header, half of a close token) stays in the buffer until
//! the next chunk.  The grammar is fixed per instance:
//!
//! - **xml**: `<tool name="...">...</tool>`, plus the `<file path="...">`
//!   and `<bash>` shorthands (see [`xml`]).
//! - **json**: a fenced ```` ```json ```` block holding one call object
//!   (see [`json`]).
//! - **sentinel**: `[[SEG_START {...}]] body [[SEG_END]]` (see
//!   [`sentinel`]).
//!
//! Scanner states:
//!
//! ```text
//! ScanningText ──partial marker──▶ MatchingOpenMarker ──▶ ScanningText
//!      │ marker
//!      ▼
//! InsideHeader ──malformed──▶ ScanningText (released as text)
//!      │ header parsed
//!      ▼
//! InsideBody ◀──▶ InsideRaw (CDATA, file/bash/sentinel bodies)
//!      │ close marker
//!      ▼
//! ScanningText
//! ```

mod json;
mod scan;
mod sentinel;
mod xml;

use serde_json::{Map, Value};
use tracing::{debug, trace};

use segstream_core::{
    ResponseChunk, Result, SegmentEvent, SegmentType, StreamError, ToolInvocation,
    new_segment_id,
};

use crate::config::{ParserKind, ParsingConfig, StreamConfig, ToolClassification};
use crate::emitter::SegmentEmitter;
use crate::handler::StreamingResponseHandler;
use crate::listener::StreamListener;
use crate::xml_document::parse_xml_arguments;

use self::scan::{Accept, MarkerSearch, MarkerSet, find_token};

// ---------------------------------------------------------------------------
// Scanner state
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum ScanState {
    ScanningText,
    /// The tail may be the start of an opening marker.
    MatchingOpenMarker,
    InsideHeader(Header),
    InsideBody(OpenSegment),
    /// Bytes pass through verbatim until the literal `close` token.  With
    /// `resume` the segment continues in [`ScanState::InsideBody`] afterwards;
    /// otherwise the token closes the segment.
    InsideRaw {
        segment: OpenSegment,
        close: &'static str,
        resume: bool,
    },
}

#[derive(Debug)]
enum Header {
    /// An xml start tag at the cursor, opened by the given marker.
    Markup { marker: usize },
    /// A sentinel header at the cursor.
    Sentinel(sentinel::HeaderScanner),
    /// A fenced json block whose tool name is not known yet.
    Json(json::JsonHeader),
}

/// A segment that has been started and not yet closed.
#[derive(Debug)]
struct OpenSegment {
    id: String,
    segment_type: SegmentType,
    tool_name: String,
    /// Every body byte seen so far.
    body: String,
    form: SegmentForm,
}

#[derive(Debug)]
enum SegmentForm {
    XmlTool,
    XmlFile { path: String },
    XmlBash,
    Sentinel { arguments: Map<String, Value> },
    Json(scan::JsonObjectScanner),
}

impl OpenSegment {
    fn new(id: String, segment_type: SegmentType, tool_name: String, form: SegmentForm) -> Self {
        Self {
            id,
            segment_type,
            tool_name,
            body: String::new(),
            form,
        }
    }

    /// Record body text and stream it as `Content`.
    fn append(&mut self, sink: &mut Sink, piece: &str) -> Result<()> {
        self.body.push_str(piece);
        sink.emitter.content(&self.id, piece)
    }
}

// ---------------------------------------------------------------------------
// Text segments
// ---------------------------------------------------------------------------

/// The emitter plus the running text segment.
#[derive(Debug, Default)]
struct Sink {
    emitter: SegmentEmitter,
    text_segment: Option<String>,
    /// Whitespace seen while no text segment was open.
    pending_ws: String,
}

impl Sink {
    /// Emit narrative text, opening a text segment on the first
    /// non-whitespace character.
    fn text(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        if let Some(id) = &self.text_segment {
            return self.emitter.content(id, text);
        }
        if text.trim().is_empty() {
            self.pending_ws.push_str(text);
            return Ok(());
        }
        let id = self.emitter.start_text()?;
        let mut delta = std::mem::take(&mut self.pending_ws);
        delta.push_str(text);
        self.emitter.content(&id, &delta)?;
        self.text_segment = Some(id);
        Ok(())
    }

    fn close_text(&mut self) -> Result<()> {
        match self.text_segment.take() {
            Some(id) => self.emitter.end(&id),
            None => Ok(()),
        }
    }

    /// Close the running text segment and start a tool segment.
    fn open_tool(
        &mut self,
        segment_type: SegmentType,
        tool_name: &str,
        mut metadata: Map<String, Value>,
    ) -> Result<String> {
        self.close_text()?;
        let id = new_segment_id("call");
        metadata
            .entry("tool_name")
            .or_insert_with(|| Value::String(tool_name.to_owned()));
        self.emitter.start(&id, segment_type, metadata)?;
        Ok(id)
    }
}

// ---------------------------------------------------------------------------
// ParsingStreamingResponseHandler
// ---------------------------------------------------------------------------

/// Extracts xml, json, or sentinel tool calls from streamed text.
#[derive(Debug)]
pub struct ParsingStreamingResponseHandler {
    grammar: ParserKind,
    tools: ToolClassification,
    parsing: ParsingConfig,
    openers: MarkerSet,
    /// Markers searched inside an xml `<tool>` body.
    xml_body: Option<MarkerSet>,
    buffer: String,
    /// Everything before this offset has been consumed.
    cursor: usize,
    state: ScanState,
    /// A json block just closed; its closing fence is skipped.
    fence_pending: bool,
    sink: Sink,
}

impl ParsingStreamingResponseHandler {
    /// Build a handler for one embedded grammar.
    ///
    /// [`ParserKind::ApiToolCall`] is not an embedded grammar and is rejected.
    pub fn new(grammar: ParserKind, config: &StreamConfig) -> Result<Self> {
        let (openers, xml_body) = match grammar {
            ParserKind::Xml => (
                MarkerSet::new(&xml::OPENERS)?,
                Some(MarkerSet::new(&xml::BODY_MARKERS)?),
            ),
            ParserKind::Json => (MarkerSet::new(&[json::OPENER])?, None),
            ParserKind::Sentinel => (MarkerSet::new(&[sentinel::OPENER])?, None),
            ParserKind::ApiToolCall => {
                return Err(StreamError::UnknownParser {
                    name: grammar.to_string(),
                });
            }
        };
        Ok(Self {
            grammar,
            tools: config.tools.clone(),
            parsing: config.parsing.clone(),
            openers,
            xml_body,
            buffer: String::new(),
            cursor: 0,
            state: ScanState::ScanningText,
            fence_pending: false,
            sink: Sink::default(),
        })
    }

    /// Build a handler from a parser name such as `"xml"`.
    pub fn from_parser_name(name: &str, config: &StreamConfig) -> Result<Self> {
        Self::new(name.parse()?, config)
    }

    pub fn grammar(&self) -> ParserKind {
        self.grammar
    }

    /// Run the scanner until it needs more input.
    fn pump(&mut self) -> Result<()> {
        while self.step()? {}
        Ok(())
    }

    /// Advance the scanner by one transition.  Returns `false` when nothing
    /// can be decided without more input.
    fn step(&mut self) -> Result<bool> {
        let state = std::mem::replace(&mut self.state, ScanState::ScanningText);
        let (next, progressed) = match state {
            ScanState::ScanningText | ScanState::MatchingOpenMarker => self.scan_text()?,
            ScanState::InsideHeader(Header::Markup { marker }) => self.xml_header(marker)?,
            ScanState::InsideHeader(Header::Sentinel(scanner)) => self.sentinel_header(scanner)?,
            ScanState::InsideHeader(Header::Json(header)) => self.json_header(header)?,
            ScanState::InsideBody(segment) => match segment.form {
                SegmentForm::Json(_) => self.json_body(segment)?,
                _ => self.xml_body(segment)?,
            },
            ScanState::InsideRaw {
                segment,
                close,
                resume,
            } => self.raw_body(segment, close, resume)?,
        };
        self.state = next;
        Ok(progressed)
    }

    fn scan_text(&mut self) -> Result<(ScanState, bool)> {
        let tail = &self.buffer[self.cursor..];

        if self.fence_pending {
            let trimmed = tail.trim_start();
            if trimmed.starts_with(json::FENCE) {
                self.cursor += tail.len() - trimmed.len() + json::FENCE.len();
                self.fence_pending = false;
                return Ok((ScanState::ScanningText, true));
            }
            if trimmed.is_empty() || json::FENCE.starts_with(trimmed) {
                return Ok((ScanState::ScanningText, false));
            }
            self.fence_pending = false;
        }

        if tail.is_empty() {
            return Ok((ScanState::ScanningText, false));
        }

        let grammar = self.grammar;
        let openers = &self.openers;
        let search = openers.find_with(tail, |pos, marker| {
            opener_boundary(tail, pos + openers.marker(marker).len(), grammar)
        });

        match search {
            MarkerSearch::Found { pos, marker } => {
                self.sink.text(&tail[..pos])?;
                self.cursor += pos;
                let header = match self.grammar {
                    ParserKind::Json => {
                        let opener = self.openers.marker(marker);
                        self.cursor += opener.len();
                        Header::Json(json::JsonHeader::new(opener))
                    }
                    ParserKind::Sentinel => Header::Sentinel(sentinel::HeaderScanner::default()),
                    _ => Header::Markup { marker },
                };
                Ok((ScanState::InsideHeader(header), true))
            }
            MarkerSearch::Partial(pos) => {
                self.sink.text(&tail[..pos])?;
                self.cursor += pos;
                Ok((ScanState::MatchingOpenMarker, pos > 0))
            }
            MarkerSearch::NotFound => {
                self.sink.text(tail)?;
                self.cursor = self.buffer.len();
                Ok((ScanState::ScanningText, true))
            }
        }
    }

    fn raw_body(
        &mut self,
        mut segment: OpenSegment,
        close: &'static str,
        resume: bool,
    ) -> Result<(ScanState, bool)> {
        let tail = &self.buffer[self.cursor..];
        match find_token(tail, close) {
            MarkerSearch::Found { pos, .. } => {
                segment.append(&mut self.sink, &tail[..pos])?;
                self.cursor += pos + close.len();
                if resume {
                    segment.append(&mut self.sink, close)?;
                    return Ok((ScanState::InsideBody(segment), true));
                }
                self.finish_segment(segment)?;
                Ok((ScanState::ScanningText, true))
            }
            MarkerSearch::Partial(pos) => {
                segment.append(&mut self.sink, &tail[..pos])?;
                self.cursor += pos;
                let next = ScanState::InsideRaw {
                    segment,
                    close,
                    resume,
                };
                Ok((next, pos > 0))
            }
            MarkerSearch::NotFound => {
                let progressed = !tail.is_empty();
                segment.append(&mut self.sink, tail)?;
                self.cursor = self.buffer.len();
                let next = ScanState::InsideRaw {
                    segment,
                    close,
                    resume,
                };
                Ok((next, progressed))
            }
        }
    }

    /// Release the first byte of an opener that turned out not to be one.
    fn release_opener_byte(&mut self) -> Result<(ScanState, bool)> {
        let tail = &self.buffer[self.cursor..];
        let first = tail.chars().next().map_or(0, char::len_utf8);
        self.sink.text(&tail[..first])?;
        self.cursor += first;
        Ok((ScanState::ScanningText, true))
    }

    /// Emit the invocation for a closing segment, then its `End`.
    fn finish_segment(&mut self, segment: OpenSegment) -> Result<()> {
        let OpenSegment {
            id,
            segment_type,
            tool_name,
            body,
            form,
        } = segment;

        let (arguments, raw_arguments) = match form {
            SegmentForm::XmlTool => (parse_xml_arguments(&body), None),
            SegmentForm::XmlFile { path } => (xml::file_arguments(path, body), None),
            SegmentForm::XmlBash => (xml::bash_arguments(&body), None),
            SegmentForm::Sentinel { arguments } => {
                if segment_type == SegmentType::Text {
                    return self.sink.emitter.end(&id);
                }
                (sentinel::fill_arguments(segment_type, arguments, &body), None)
            }
            SegmentForm::Json(_) => json::call_arguments(&body),
        };

        let mut invocation = ToolInvocation::new(id.clone(), tool_name, arguments);
        invocation.raw_arguments = raw_arguments;
        self.sink.emitter.invocation(invocation)?;
        self.sink.emitter.end(&id)
    }

    fn compact(&mut self) {
        if self.cursor > 0 {
            self.buffer.drain(..self.cursor);
            self.cursor = 0;
        }
    }
}

/// Whether the byte after an opener marker makes it a real opener.
fn opener_boundary(tail: &str, end: usize, grammar: ParserKind) -> Accept {
    match tail.get(end..).and_then(|rest| rest.chars().next()) {
        None => Accept::NeedMore,
        Some(c) if c.is_whitespace() => Accept::Yes,
        Some('>' | '/') if grammar == ParserKind::Xml => Accept::Yes,
        Some('{') if grammar != ParserKind::Xml => Accept::Yes,
        Some(_) => Accept::No,
    }
}

impl StreamingResponseHandler for ParsingStreamingResponseHandler {
    fn name(&self) -> &'static str {
        match self.grammar {
            ParserKind::Xml => "parsing:xml",
            ParserKind::Json => "parsing:json",
            ParserKind::Sentinel => "parsing:sentinel",
            ParserKind::ApiToolCall => "parsing",
        }
    }

    fn set_listener(&mut self, listener: Box<dyn StreamListener>) {
        self.sink.emitter.set_listener(listener);
    }

    fn feed(&mut self, chunk: &ResponseChunk) -> Result<Vec<SegmentEvent>> {
        self.sink.emitter.ensure_feedable(self.name())?;
        if !chunk.tool_calls().is_empty() {
            trace!(
                fragments = chunk.tool_calls().len(),
                "ignoring native tool-call fragments in embedded-grammar mode"
            );
        }
        self.buffer.push_str(chunk.content());
        self.pump()?;
        self.compact();
        Ok(self.sink.emitter.take_batch())
    }

    fn finalize(&mut self) -> Result<Vec<ToolInvocation>> {
        if self.sink.emitter.is_finalized() {
            return Ok(self.sink.emitter.invocations().to_vec());
        }
        self.pump()?;

        match std::mem::replace(&mut self.state, ScanState::ScanningText) {
            ScanState::ScanningText | ScanState::MatchingOpenMarker => {
                self.sink.text(&self.buffer[self.cursor..])?;
            }
            ScanState::InsideHeader(Header::Markup { .. } | Header::Sentinel(_)) => {
                debug!("unterminated opening marker released as text");
                self.sink.text(&self.buffer[self.cursor..])?;
            }
            ScanState::InsideHeader(Header::Json(header)) => {
                debug!("unterminated json block released as text");
                self.sink.text(header.fence())?;
                self.sink.text(header.object())?;
                self.sink.text(&self.buffer[self.cursor..])?;
            }
            ScanState::InsideBody(mut segment) | ScanState::InsideRaw { mut segment, .. } => {
                debug!(segment_id = %segment.id, "force-closing unterminated segment");
                segment.append(&mut self.sink, &self.buffer[self.cursor..])?;
                self.finish_segment(segment)?;
            }
        }
        self.cursor = self.buffer.len();
        self.compact();
        self.fence_pending = false;

        self.sink.close_text()?;
        self.sink.pending_ws.clear();
        self.sink.emitter.end_all()?;
        self.sink.emitter.take_batch();
        self.sink.emitter.mark_finalized();
        debug!(
            parser = %self.grammar,
            invocations = self.sink.emitter.invocations().len(),
            "response finalized"
        );
        Ok(self.sink.emitter.invocations().to_vec())
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
        self.state = ScanState::ScanningText;
        self.fence_pending = false;
        self.sink.emitter.reset();
        self.sink.text_segment = None;
        self.sink.pending_ws.clear();
    }

    fn tool_invocations(&self) -> &[ToolInvocation] {
        self.sink.emitter.invocations()
    }

    fn events(&self) -> &[SegmentEvent] {
        self.sink.emitter.history()
    }

    fn is_finalized(&self) -> bool {
        self.sink.emitter.is_finalized()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
