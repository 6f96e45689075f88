//! Live file-content extraction from streamed `write_file` / `patch_file`
//! arguments.
//!
//! A [`FileContentStreamer`] wraps one [`JsonStringFieldExtractor`] and pairs
//! the streamed body (`content` or `patch`) with its companion `path`.  The
//! two keys may arrive in either order.  Body text that arrives before the
//! path is held back and released, in full, by the first update that knows
//! the path, so a consumer can open its segment with the path already set.

use crate::json_fields::JsonStringFieldExtractor;

/// Which file-mutating argument shape is being streamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileStreamKind {
    /// `{"path": ..., "content": ...}`
    Write,
    /// `{"path": ..., "patch": ...}`
    Patch,
}

impl FileStreamKind {
    /// The argument key holding the streamed body.
    pub fn body_field(self) -> &'static str {
        match self {
            Self::Write => "content",
            Self::Patch => "patch",
        }
    }
}

/// Result of one [`FileContentStreamer::feed`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileStreamUpdate {
    /// Body text to render now.  Empty while the path is unknown.
    pub content_delta: String,
    /// The file path, once known.
    pub path: Option<String>,
    /// The whole body, once its closing quote has arrived.
    pub content_complete: Option<String>,
}

/// Tracks a streamed file body together with its path.
#[derive(Debug, Clone)]
pub struct FileContentStreamer {
    kind: FileStreamKind,
    extractor: JsonStringFieldExtractor,
    path: Option<String>,
    /// Body text received while the path was still unknown.
    held: String,
    content: Option<String>,
}

impl FileContentStreamer {
    /// Streamer for `write_file`-shaped arguments.
    pub fn write() -> Self {
        Self::new(FileStreamKind::Write)
    }

    /// Streamer for `patch_file`-shaped arguments.
    pub fn patch() -> Self {
        Self::new(FileStreamKind::Patch)
    }

    pub fn new(kind: FileStreamKind) -> Self {
        let body = kind.body_field();
        Self {
            kind,
            extractor: JsonStringFieldExtractor::new([body], ["path", body]),
            path: None,
            held: String::new(),
            content: None,
        }
    }

    pub fn kind(&self) -> FileStreamKind {
        self.kind
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// The complete body, once its closing quote has been seen.
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    /// Scan the next fragment of the argument JSON.
    pub fn feed(&mut self, fragment: &str) -> FileStreamUpdate {
        let body = self.kind.body_field();
        let mut result = self.extractor.feed(fragment);

        let path_was_known = self.path.is_some();
        if let Some(path) = result.completed.remove("path") {
            self.path = Some(path);
        }

        let delta = result.deltas.remove(body).unwrap_or_default();
        let content_delta = match (path_was_known, self.path.is_some()) {
            (_, false) => {
                self.held.push_str(&delta);
                String::new()
            }
            (false, true) => {
                let mut replay = std::mem::take(&mut self.held);
                replay.push_str(&delta);
                if !replay.is_empty() {
                    tracing::trace!(bytes = replay.len(), "releasing body held until path");
                }
                replay
            }
            (true, true) => delta,
        };

        if let Some(content) = result.completed.remove(body) {
            self.content = Some(content);
        }

        FileStreamUpdate {
            content_delta,
            path: self.path.clone(),
            content_complete: self.content.clone(),
        }
    }

    /// Forget all scanned input.
    pub fn reset(&mut self) {
        self.extractor.reset();
        self.path = None;
        self.held.clear();
        self.content = None;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
