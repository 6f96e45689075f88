//! One-shot parser for complete `<tool>` documents.
//!
//! This is the non-streaming path: given the full text of a response (or of
//! one tool body) it builds a small node tree and converts it into
//! [`ToolInvocation`]s.  The streaming xml grammar calls
//! [`parse_xml_arguments`] when a `<tool>` segment closes, so both paths
//! agree on argument shapes:
//!
//! | Markup | Argument value |
//! |--------|----------------|
//! | `<arg name="k">text</arg>` or `<k>text</k>` | `"text"` |
//! | `<k><item>a</item><item>b</item></k>` | `["a", "b"]` |
//! | `<k><arg name="x">1</arg></k>` or `<k><x>1</x></k>` | `{"x": "1"}` |
//! | `<arg name="k"><b>html</b></arg>` | `"<b>html</b>"` |
//! | `<k><![CDATA[raw]]></k>` | `"raw"`, byte for byte |
//!
//! Model output is not well-formed XML.  A `<` only starts markup when it is
//! followed by `/`, `!`, or a tag-name start character and the tag parses;
//! anything else (`n <= 0`, `a < b`) is literal text.  Unclosed elements
//! are closed at end of input and stray close tags are kept as text.

use std::borrow::Cow;
use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::warn;

use segstream_core::{ToolInvocation, new_segment_id};

/// One node of a parsed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    /// Character data with entities decoded.
    Text(String),
    /// The verbatim contents of a `<![CDATA[...]]>` section.
    CData(String),
    Element(XmlElement),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    /// Attributes in source order, values entity-decoded.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
    /// The raw source text between the start and end tags.
    pub inner: String,
}

impl XmlElement {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Child elements, skipping text.
    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(XmlNode::as_element)
    }
}

impl XmlNode {
    pub fn as_element(&self) -> Option<&XmlElement> {
        match self {
            Self::Element(element) => Some(element),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Parse a complete document into nodes.
pub fn parse_document(text: &str) -> Vec<XmlNode> {
    let mut parser = Parser { src: text, pos: 0 };
    parser.parse_nodes(&mut Vec::new()).nodes
}

/// Every named `<tool>` element in document order.
///
/// `<tool>` elements nested inside other markup are found too; a `<tool>`
/// without a `name` attribute is skipped.  An `id` attribute, when present,
/// becomes the invocation id.
pub fn parse_tool_invocations(text: &str) -> Vec<ToolInvocation> {
    let mut invocations = Vec::new();
    collect_tools(&parse_document(text), &mut invocations);
    invocations
}

/// The first `<tool>` of a document, or [`ToolInvocation::invalid`] when
/// there is none.
pub fn parse_tool_invocation(text: &str) -> ToolInvocation {
    parse_tool_invocations(text)
        .into_iter()
        .next()
        .unwrap_or_else(ToolInvocation::invalid)
}

/// Convert the body of a `<tool>` element into its argument map.
///
/// A body without child elements is read as a JSON object when it holds
/// one, so `<tool name="x">{"a": 1}</tool>` also works.
pub fn parse_xml_arguments(body: &str) -> Map<String, Value> {
    let nodes = parse_document(body);
    let children: Vec<&XmlElement> = nodes.iter().filter_map(XmlNode::as_element).collect();
    if children.is_empty() {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&text_value(&nodes)) {
            return map;
        }
        return Map::new();
    }
    collect_arguments(&children)
}

fn collect_tools(nodes: &[XmlNode], out: &mut Vec<ToolInvocation>) {
    for element in nodes.iter().filter_map(XmlNode::as_element) {
        if element.name != "tool" {
            collect_tools(&element.children, out);
            continue;
        }
        let name = element.attribute("name").map(str::trim).unwrap_or_default();
        if name.is_empty() {
            warn!("<tool> element without a name attribute skipped");
            continue;
        }
        let id = element
            .attribute("id")
            .filter(|id| !id.is_empty())
            .map_or_else(|| new_segment_id("call"), str::to_owned);
        out.push(ToolInvocation::new(id, name, parse_xml_arguments(&element.inner)));
    }
}

// ---------------------------------------------------------------------------
// Argument conversion
// ---------------------------------------------------------------------------

fn is_arg_tag(name: &str) -> bool {
    matches!(name, "arg" | "param" | "parameter")
}

fn collect_arguments(children: &[&XmlElement]) -> Map<String, Value> {
    let mut arguments = Map::new();
    let mut repeated = HashSet::new();
    for child in children {
        let (key, value) = if is_arg_tag(&child.name) {
            let key = child.attribute("name").unwrap_or(&child.name);
            (key.to_owned(), element_value(child, false))
        } else {
            (child.name.clone(), element_value(child, true))
        };

        match arguments.get_mut(&key) {
            Some(existing) => {
                // A repeated key collects its values into an array.
                if repeated.insert(key) {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                } else if let Value::Array(items) = existing {
                    items.push(value);
                }
            }
            None => {
                arguments.insert(key, value);
            }
        }
    }
    arguments
}

/// `lenient` elements turn any child markup into an object; strict ones
/// (`<arg>`) only do so for `<item>` lists and nested args, and otherwise
/// keep their markup as a string.
fn element_value(element: &XmlElement, lenient: bool) -> Value {
    let children: Vec<&XmlElement> = element.elements().collect();
    if children.is_empty() {
        return Value::String(text_value(&element.children));
    }
    if children.iter().all(|c| c.name == "item") {
        return Value::Array(children.iter().map(|c| element_value(c, true)).collect());
    }
    let nested_args = children
        .iter()
        .all(|c| is_arg_tag(&c.name) && c.attribute("name").is_some());
    if lenient || nested_args {
        return Value::Object(collect_arguments(&children));
    }
    Value::String(element.inner.clone())
}

/// Concatenated character data.  Text around CDATA sections is dropped when
/// it is only whitespace, and CDATA content is never trimmed.
fn text_value(nodes: &[XmlNode]) -> String {
    let has_cdata = nodes.iter().any(|n| matches!(n, XmlNode::CData(_)));
    let mut out = String::new();
    for node in nodes {
        match node {
            XmlNode::Text(text) if !has_cdata || !text.trim().is_empty() => out.push_str(text),
            XmlNode::CData(raw) => out.push_str(raw),
            _ => {}
        }
    }
    if has_cdata {
        out
    } else {
        trim_block(&out).to_owned()
    }
}

/// Single-line values are trimmed.  Multi-line values lose a whitespace-only
/// first and last line but keep their indentation.
fn trim_block(text: &str) -> &str {
    if !text.contains('\n') {
        return text.trim();
    }
    let mut block = text;
    if let Some(nl) = block.find('\n') {
        if block[..nl].trim().is_empty() {
            block = &block[nl + 1..];
        }
    }
    if let Some(nl) = block.rfind('\n') {
        if block[nl + 1..].trim().is_empty() {
            block = &block[..nl];
        }
    }
    block
}

// ---------------------------------------------------------------------------
// Tokenizing
// ---------------------------------------------------------------------------

/// A parsed start tag such as `<tool name="x">` or `<file path="a"/>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StartTag {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub self_closing: bool,
    /// Bytes consumed, including the closing `>`.
    pub len: usize,
}

impl StartTag {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')
}

/// Length of the tag name at the start of `s`, if one is there.
fn name_len(s: &str) -> Option<usize> {
    let mut chars = s.char_indices();
    let (_, first) = chars.next()?;
    if !is_name_start(first) {
        return None;
    }
    Some(
        chars
            .find(|&(_, c)| !is_name_char(c))
            .map_or(s.len(), |(i, _)| i),
    )
}

/// Progress of a start tag that may still be arriving.
#[derive(Debug)]
pub(crate) enum TagScan {
    Complete(StartTag),
    /// Everything so far is a valid prefix of a start tag.
    Incomplete,
    /// The text can no longer become a start tag.
    Invalid,
}

/// Parse a start tag at the beginning of `s`.  Only `key="value"` and
/// `key='value'` attributes are accepted; anything else is not a tag.
pub(crate) fn parse_start_tag(s: &str) -> Option<StartTag> {
    match scan_start_tag(s) {
        TagScan::Complete(tag) => Some(tag),
        TagScan::Incomplete | TagScan::Invalid => None,
    }
}

/// Like [`parse_start_tag`], but tells a tag cut off by the end of `s`
/// apart from text that is not a tag at all.
pub(crate) fn scan_start_tag(s: &str) -> TagScan {
    let Some(rest) = s.strip_prefix('<') else {
        return if s.is_empty() { TagScan::Incomplete } else { TagScan::Invalid };
    };
    let name_end = match name_len(rest) {
        Some(n) if n == rest.len() => return TagScan::Incomplete,
        Some(n) => n,
        None if rest.is_empty() => return TagScan::Incomplete,
        None => return TagScan::Invalid,
    };
    let name = rest[..name_end].to_owned();
    let mut pos = 1 + name_end;
    let mut attributes = Vec::new();

    loop {
        let after_ws = s[pos..].trim_start();
        let saw_ws = after_ws.len() < s.len() - pos;
        pos = s.len() - after_ws.len();

        if after_ws.is_empty() || after_ws == "/" {
            return TagScan::Incomplete;
        }
        if after_ws.starts_with('>') {
            return TagScan::Complete(StartTag {
                name,
                attributes,
                self_closing: false,
                len: pos + 1,
            });
        }
        if after_ws.starts_with("/>") {
            return TagScan::Complete(StartTag {
                name,
                attributes,
                self_closing: true,
                len: pos + 2,
            });
        }
        if !saw_ws {
            return TagScan::Invalid;
        }

        let key_len = match name_len(after_ws) {
            Some(n) if n == after_ws.len() => return TagScan::Incomplete,
            Some(n) => n,
            None => return TagScan::Invalid,
        };
        let key = after_ws[..key_len].to_owned();
        let after_key = after_ws[key_len..].trim_start();
        if after_key.is_empty() {
            return TagScan::Incomplete;
        }
        let Some(after_eq) = after_key.strip_prefix('=') else {
            return TagScan::Invalid;
        };
        let rest = after_eq.trim_start();
        let Some(quote) = rest.chars().next() else {
            return TagScan::Incomplete;
        };
        if quote != '"' && quote != '\'' {
            return TagScan::Invalid;
        }
        let Some(value_len) = rest[1..].find(quote) else {
            return TagScan::Incomplete;
        };
        let value = unescape_entities(&rest[1..1 + value_len]).into_owned();
        pos = s.len() - rest.len() + 1 + value_len + 1;
        attributes.push((key, value));
    }
}

/// Parse an end tag such as `</tool >` at the beginning of `s`, returning the
/// name and the bytes consumed.
fn parse_end_tag(s: &str) -> Option<(String, usize)> {
    let rest = s.strip_prefix("</")?;
    let name_end = name_len(rest)?;
    let after = rest[name_end..].trim_start();
    after.strip_prefix('>')?;
    Some((rest[..name_end].to_owned(), s.len() - after.len() + 1))
}

/// Decode the predefined XML entities and numeric character references.
/// Unknown or malformed references are kept literally.
pub(crate) fn unescape_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let decoded = after
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| decode_entity(&after[..semi]).map(|c| (c, semi)));
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let number = name.strip_prefix('#')?;
            let code = match number.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => number.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

// ---------------------------------------------------------------------------
// Tree building
// ---------------------------------------------------------------------------

struct Parsed {
    nodes: Vec<XmlNode>,
    /// Where the enclosing element's content ends in the source.
    content_end: usize,
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl Parser<'_> {
    /// Parse nodes until the close tag of the innermost `open` element (or of
    /// any ancestor, which closes this element implicitly) or end of input.
    fn parse_nodes(&mut self, open: &mut Vec<String>) -> Parsed {
        let mut nodes = Vec::new();
        let mut text = String::new();

        loop {
            let rest = &self.src[self.pos..];
            let Some(lt) = rest.find('<') else {
                text.push_str(&unescape_entities(rest));
                self.pos = self.src.len();
                flush_text(&mut nodes, &mut text);
                return Parsed {
                    nodes,
                    content_end: self.src.len(),
                };
            };
            text.push_str(&unescape_entities(&rest[..lt]));
            self.pos += lt;
            let rest = &self.src[self.pos..];

            if let Some(after) = rest.strip_prefix("<![CDATA[") {
                flush_text(&mut nodes, &mut text);
                let (raw, consumed) = match after.find("]]>") {
                    Some(end) => (&after[..end], rest.len() - after.len() + end + 3),
                    None => (after, rest.len()),
                };
                nodes.push(XmlNode::CData(raw.to_owned()));
                self.pos += consumed;
                continue;
            }

            if let Some(after) = rest.strip_prefix("<!--") {
                self.pos += after
                    .find("-->")
                    .map_or(rest.len(), |end| rest.len() - after.len() + end + 3);
                continue;
            }

            if rest.starts_with("</") {
                if let Some((name, len)) = parse_end_tag(rest) {
                    if open.last() == Some(&name) {
                        let content_end = self.pos;
                        self.pos += len;
                        flush_text(&mut nodes, &mut text);
                        return Parsed { nodes, content_end };
                    }
                    if open.contains(&name) {
                        flush_text(&mut nodes, &mut text);
                        return Parsed {
                            nodes,
                            content_end: self.pos,
                        };
                    }
                }
                text.push('<');
                self.pos += 1;
                continue;
            }

            if let Some(tag) = parse_start_tag(rest) {
                flush_text(&mut nodes, &mut text);
                self.pos += tag.len;
                let mut element = XmlElement {
                    name: tag.name,
                    attributes: tag.attributes,
                    ..XmlElement::default()
                };
                if !tag.self_closing {
                    let content_start = self.pos;
                    open.push(element.name.clone());
                    let parsed = self.parse_nodes(open);
                    open.pop();
                    element.children = parsed.nodes;
                    element.inner = self.src[content_start..parsed.content_end].to_owned();
                }
                nodes.push(XmlNode::Element(element));
                continue;
            }

            text.push('<');
            self.pos += 1;
        }
    }
}

fn flush_text(nodes: &mut Vec<XmlNode>, text: &mut String) {
    if !text.is_empty() {
        nodes.push(XmlNode::Text(std::mem::take(text)));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
