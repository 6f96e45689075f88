//! Low-level scanning primitives for the embedded grammars.
//!
//! Everything here is stateless over the unconsumed tail of the handler's
//! buffer except [`JsonObjectScanner`], which is fed incrementally so a large
//! JSON body is scanned once.

use aho_corasick::{AhoCorasick, MatchKind};

use segstream_core::{Result, StreamError};

/// Verdict of a grammar on a literal marker match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Accept {
    Yes,
    /// The match is ordinary text (e.g. `<tools` for the `<tool` marker).
    No,
    /// The bytes after the match have not arrived yet.
    NeedMore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MarkerSearch {
    Found { pos: usize, marker: usize },
    /// A marker may start at `pos`; everything before it is safe to release.
    Partial(usize),
    NotFound,
}

/// A fixed set of literal markers searched with one automaton.
#[derive(Debug, Clone)]
pub(crate) struct MarkerSet {
    automaton: AhoCorasick,
    markers: Vec<&'static str>,
}

impl MarkerSet {
    pub(crate) fn new(markers: &[&'static str]) -> Result<Self> {
        let automaton = AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostFirst)
            .build(markers)
            .map_err(|e| StreamError::Internal(format!("failed to build marker automaton: {e}")))?;
        Ok(Self {
            automaton,
            markers: markers.to_vec(),
        })
    }

    pub(crate) fn marker(&self, index: usize) -> &'static str {
        self.markers.get(index).copied().unwrap_or_default()
    }

    pub(crate) fn find(&self, haystack: &str) -> MarkerSearch {
        self.find_with(haystack, |_, _| Accept::Yes)
    }

    /// Find the first match that `accept(pos, marker)` takes.  When no match
    /// is taken, a proper prefix of a marker at the very end of `haystack` is
    /// reported as [`MarkerSearch::Partial`].
    pub(crate) fn find_with<F>(&self, haystack: &str, mut accept: F) -> MarkerSearch
    where
        F: FnMut(usize, usize) -> Accept,
    {
        for m in self.automaton.find_iter(haystack) {
            let marker = m.pattern().as_usize();
            match accept(m.start(), marker) {
                Accept::Yes => return MarkerSearch::Found { pos: m.start(), marker },
                Accept::NeedMore => return MarkerSearch::Partial(m.start()),
                Accept::No => {}
            }
        }
        match partial_suffix(haystack, &self.markers) {
            Some(pos) => MarkerSearch::Partial(pos),
            None => MarkerSearch::NotFound,
        }
    }
}

/// Search for one literal close token, reporting a partial match at the end.
pub(crate) fn find_token(haystack: &str, token: &'static str) -> MarkerSearch {
    if let Some(pos) = haystack.find(token) {
        return MarkerSearch::Found { pos, marker: 0 };
    }
    match partial_suffix(haystack, &[token]) {
        Some(pos) => MarkerSearch::Partial(pos),
        None => MarkerSearch::NotFound,
    }
}

/// Earliest position where the rest of `haystack` is a proper prefix of one
/// of `tokens`.
pub(crate) fn partial_suffix(haystack: &str, tokens: &[&str]) -> Option<usize> {
    let longest = tokens.iter().map(|t| t.len()).max().unwrap_or(0);
    let bytes = haystack.as_bytes();
    let first = bytes.len().saturating_sub(longest.saturating_sub(1));
    (first..bytes.len()).find(|&start| {
        let tail = &bytes[start..];
        haystack.is_char_boundary(start)
            && tokens
                .iter()
                .any(|t| t.len() > tail.len() && t.as_bytes().starts_with(tail))
    })
}

// ---------------------------------------------------------------------------
// JSON object boundaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ObjectScan {
    /// The object closed; the value is the number of bytes of the last piece
    /// that belong to it.
    Complete(usize),
    Incomplete,
    /// The first non-whitespace byte was not `{`.
    Invalid,
}

/// Finds where a streamed JSON object ends by tracking nesting depth and
/// string state.  It does not validate the JSON.
#[derive(Debug, Clone, Default)]
pub(crate) struct JsonObjectScanner {
    opened: bool,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl JsonObjectScanner {
    pub(crate) fn feed(&mut self, piece: &str) -> ObjectScan {
        for (i, b) in piece.bytes().enumerate() {
            if !self.opened {
                if b.is_ascii_whitespace() {
                    continue;
                }
                if b != b'{' {
                    return ObjectScan::Invalid;
                }
                self.opened = true;
                self.depth = 1;
                continue;
            }
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
                continue;
            }
            match b {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return ObjectScan::Complete(i + 1);
                    }
                }
                _ => {}
            }
        }
        ObjectScan::Incomplete
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_first_accepted_marker() {
        let set = MarkerSet::new(&["<tool", "<file"]).unwrap();
        let found = set.find_with("a <tools> b <file path", |pos, _| {
            if "a <tools> b <file path".as_bytes()[pos + 5] == b's' {
                Accept::No
            } else {
                Accept::Yes
            }
        });
        assert_eq!(found, MarkerSearch::Found { pos: 12, marker: 1 });
    }

    #[test]
    fn reports_partial_marker_at_end() {
        let set = MarkerSet::new(&["<tool", "<file"]).unwrap();
        assert_eq!(set.find("hello <to"), MarkerSearch::Partial(6));
        assert_eq!(set.find("hello <"), MarkerSearch::Partial(6));
        assert_eq!(set.find("hello <x"), MarkerSearch::NotFound);
        assert_eq!(set.find("n <= 0"), MarkerSearch::NotFound);
    }

    #[test]
    fn need_more_holds_from_match() {
        let set = MarkerSet::new(&["<tool"]).unwrap();
        assert_eq!(set.find_with("x <tool", |_, _| Accept::NeedMore), MarkerSearch::Partial(2));
    }

    #[test]
    fn token_search() {
        assert_eq!(find_token("abc]]>d", "]]>"), MarkerSearch::Found { pos: 3, marker: 0 });
        assert_eq!(find_token("abc]]", "]]>"), MarkerSearch::Partial(3));
        assert_eq!(find_token("abc", "]]>"), MarkerSearch::NotFound);
    }

    #[test]
    fn partial_suffix_respects_char_boundaries() {
        assert_eq!(partial_suffix("café", &["é!"]), Some(3));
        assert_eq!(partial_suffix("", &["<tool"]), None);
    }

    #[test]
    fn object_scanner_across_pieces() {
        let mut scanner = JsonObjectScanner::default();
        assert_eq!(scanner.feed(r#" {"a": "}\""#), ObjectScan::Incomplete);
        assert_eq!(scanner.feed(r#"", "b": [{}]"#), ObjectScan::Incomplete);
        assert_eq!(scanner.feed("} tail"), ObjectScan::Complete(1));

        let mut scanner = JsonObjectScanner::default();
        assert_eq!(scanner.feed("  [1]"), ObjectScan::Invalid);
    }
}
