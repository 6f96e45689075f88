//! Incremental extraction of string fields from a streamed JSON object.
//!
//! Providers stream tool arguments as arbitrary byte splits of one JSON
//! object, e.g. `{"path": "a.rs", "con` + `tent": "fn main() {\` + `n}"}`.
//! [`JsonStringFieldExtractor`] scans those fragments once, character by
//! character, and exposes the requested top-level string fields:
//!
//! - **stream** fields are reported as unescaped deltas as soon as their
//!   bytes arrive (file content, patch text);
//! - **final** fields are reported once, when their closing quote arrives
//!   (paths, names).
//!
//! A field may be both.  Escape sequences are decoded before they reach a
//! field buffer; a backslash (or a partial `\uXXXX`) at the very end of a
//! fragment is remembered and completed by the next fragment.
//!
//! Only string values are captured.  Strings nested inside objects or arrays
//! are skipped, as are fields that were not requested.

use std::collections::{HashMap, HashSet};

use crate::types::ExtractionResult;

const REPLACEMENT: char = '\u{FFFD}';

/// Where the scanner is relative to JSON string literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Between tokens: structural characters, numbers, whitespace.
    OutsideString,
    /// Inside an object key at the top level.
    InKey,
    /// Inside a string value (captured or skipped).
    InValue,
}

/// Progress through a backslash escape.  Survives across `feed()` calls.
#[derive(Debug, Clone, PartialEq, Eq)]
enum EscapeState {
    None,
    /// The previous character was an unescaped backslash.
    Pending,
    /// Collecting the hex digits of `\uXXXX`.
    Unicode(String),
}

/// Stateful scanner extracting named string fields from a streamed, flat
/// JSON object.
#[derive(Debug, Clone)]
pub struct JsonStringFieldExtractor {
    stream_fields: HashSet<String>,
    final_fields: HashSet<String>,

    state: ScanState,
    escape: EscapeState,
    /// Open `{`/`[` nesting outside strings; top-level fields live at 1.
    depth: usize,
    /// Whether the next top-level string is a key (after `{` or `,`).
    expect_key: bool,
    key: String,
    /// The most recent complete top-level key.
    last_key: Option<String>,
    /// The requested field the current value belongs to, if any.
    capture: Option<String>,
    /// High half of a surrogate pair waiting for its low half.
    high_surrogate: Option<u16>,

    values: HashMap<String, String>,
    completed: HashSet<String>,
}

impl JsonStringFieldExtractor {
    /// Create an extractor for the given stream and final fields.
    pub fn new<S, F>(stream_fields: S, final_fields: F) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        Self {
            stream_fields: stream_fields.into_iter().map(Into::into).collect(),
            final_fields: final_fields.into_iter().map(Into::into).collect(),
            state: ScanState::OutsideString,
            escape: EscapeState::None,
            depth: 0,
            expect_key: false,
            key: String::new(),
            last_key: None,
            capture: None,
            high_surrogate: None,
            values: HashMap::new(),
            completed: HashSet::new(),
        }
    }

    /// Scan the next fragment of raw JSON text.
    pub fn feed(&mut self, fragment: &str) -> ExtractionResult {
        let mut result = ExtractionResult::default();
        for c in fragment.chars() {
            self.scan_char(c, &mut result);
        }
        result
    }

    /// Everything captured so far for `field` (complete or not).
    pub fn value(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }

    /// Whether the closing quote of `field` has been seen.
    pub fn is_complete(&self, field: &str) -> bool {
        self.completed.contains(field)
    }

    /// Forget all scanned input, keeping the field configuration.
    pub fn reset(&mut self) {
        self.state = ScanState::OutsideString;
        self.escape = EscapeState::None;
        self.depth = 0;
        self.expect_key = false;
        self.key.clear();
        self.last_key = None;
        self.capture = None;
        self.high_surrogate = None;
        self.values.clear();
        self.completed.clear();
    }

    fn scan_char(&mut self, c: char, result: &mut ExtractionResult) {
        match std::mem::replace(&mut self.escape, EscapeState::None) {
            EscapeState::Pending => {
                self.decode_escape(c, result);
                return;
            }
            EscapeState::Unicode(mut digits) => {
                if c.is_ascii_hexdigit() {
                    digits.push(c);
                    if digits.len() == 4 {
                        // Four ASCII hex digits always parse.
                        let unit = u16::from_str_radix(&digits, 16).unwrap_or(0xFFFD);
                        self.push_utf16(unit, result);
                    } else {
                        self.escape = EscapeState::Unicode(digits);
                    }
                    return;
                }
                // Malformed `\u`: substitute and rescan this character.
                self.push_char(REPLACEMENT, result);
            }
            EscapeState::None => {}
        }

        match self.state {
            ScanState::OutsideString => self.scan_structural(c),
            ScanState::InKey | ScanState::InValue => match c {
                '\\' => self.escape = EscapeState::Pending,
                '"' => self.close_string(result),
                _ => self.push_char(c, result),
            },
        }
    }

    fn scan_structural(&mut self, c: char) {
        match c {
            '"' => {
                if self.depth == 1 && self.expect_key {
                    self.state = ScanState::InKey;
                    self.key.clear();
                } else {
                    self.state = ScanState::InValue;
                    self.capture = if self.depth == 1 {
                        self.last_key
                            .as_ref()
                            .filter(|key| self.is_requested(key))
                            .cloned()
                    } else {
                        None
                    };
                    if let Some(field) = &self.capture {
                        self.values.insert(field.clone(), String::new());
                        self.completed.remove(field);
                    }
                }
            }
            '{' | '[' => {
                self.depth += 1;
                if self.depth == 1 {
                    self.expect_key = c == '{';
                }
            }
            '}' | ']' => self.depth = self.depth.saturating_sub(1),
            ':' if self.depth == 1 => self.expect_key = false,
            ',' if self.depth == 1 => {
                self.expect_key = true;
                self.last_key = None;
            }
            _ => {}
        }
    }

    fn decode_escape(&mut self, c: char, result: &mut ExtractionResult) {
        let decoded = match c {
            '"' => '"',
            '\\' => '\\',
            '/' => '/',
            'b' => '\u{0008}',
            'f' => '\u{000C}',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'u' => {
                self.escape = EscapeState::Unicode(String::with_capacity(4));
                return;
            }
            // Lenient: keep the escaped character itself.
            other => other,
        };
        self.push_char(decoded, result);
    }

    fn push_utf16(&mut self, unit: u16, result: &mut ExtractionResult) {
        match unit {
            0xD800..=0xDBFF => {
                self.flush_surrogate(result);
                self.high_surrogate = Some(unit);
            }
            0xDC00..=0xDFFF => match self.high_surrogate.take() {
                Some(high) => {
                    let code = 0x10000 + ((u32::from(high) - 0xD800) << 10) + (u32::from(unit) - 0xDC00);
                    self.append(char::from_u32(code).unwrap_or(REPLACEMENT), result);
                }
                None => self.append(REPLACEMENT, result),
            },
            other => {
                self.flush_surrogate(result);
                self.append(char::from_u32(u32::from(other)).unwrap_or(REPLACEMENT), result);
            }
        }
    }

    fn push_char(&mut self, c: char, result: &mut ExtractionResult) {
        self.flush_surrogate(result);
        self.append(c, result);
    }

    /// A high surrogate not followed by a low one decodes to U+FFFD.
    fn flush_surrogate(&mut self, result: &mut ExtractionResult) {
        if self.high_surrogate.take().is_some() {
            self.append(REPLACEMENT, result);
        }
    }

    fn append(&mut self, c: char, result: &mut ExtractionResult) {
        match self.state {
            ScanState::InKey => self.key.push(c),
            ScanState::InValue => {
                let Some(field) = &self.capture else {
                    return;
                };
                if self.stream_fields.contains(field) {
                    result.deltas.entry(field.clone()).or_default().push(c);
                }
                self.values.entry(field.clone()).or_default().push(c);
            }
            ScanState::OutsideString => {}
        }
    }

    fn close_string(&mut self, result: &mut ExtractionResult) {
        self.flush_surrogate(result);
        match self.state {
            ScanState::InKey => {
                self.last_key = Some(std::mem::take(&mut self.key));
            }
            ScanState::InValue => {
                if let Some(field) = self.capture.take() {
                    if self.final_fields.contains(&field) {
                        let value = self.values.get(&field).cloned().unwrap_or_default();
                        result.completed.insert(field.clone(), value);
                    }
                    self.completed.insert(field);
                }
            }
            ScanState::OutsideString => {}
        }
        self.state = ScanState::OutsideString;
    }

    fn is_requested(&self, key: &str) -> bool {
        self.stream_fields.contains(key) || self.final_fields.contains(key)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
