//! Stream error types.
//!
//! Every public API in the segstream crates surfaces failures through
//! [`StreamError`].  Malformed model output is never an error: handlers
//! recover from it and log.  The variants below cover misuse of the handler
//! lifecycle, listener failures, and configuration problems.

/// Unified error type for segmentation and tool-call extraction.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    // -- Lifecycle errors ----------------------------------------------------
    /// `feed()` was called on a handler that has already been finalized.
    /// Call `reset()` before reusing the handler.
    #[error("handler `{handler}` is already finalized; reset it before feeding again")]
    AlreadyFinalized { handler: &'static str },

    // -- Selection errors ----------------------------------------------------
    /// A parser name did not resolve to any known grammar.
    #[error("unknown parser: {name}")]
    UnknownParser { name: String },

    // -- Listener errors -----------------------------------------------------
    /// A segment or invocation listener rejected an event.  The failing
    /// `feed()`/`finalize()` call is aborted.
    #[error("listener failed: {reason}")]
    Listener { reason: String },

    // -- Configuration errors ------------------------------------------------
    /// Configuration validation or loading failed.
    #[error("config error: {reason}")]
    Config { reason: String },

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading a configuration file or recorded response failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal stream error: {0}")]
    Internal(String),
}

impl StreamError {
    /// Build a [`StreamError::Listener`] from anything printable.
    pub fn listener(reason: impl std::fmt::Display) -> Self {
        Self::Listener {
            reason: reason.to_string(),
        }
    }
}

/// Convenience alias used throughout the segstream crates.
pub type Result<T> = std::result::Result<T, StreamError>;
