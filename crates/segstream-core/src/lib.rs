//! Core types for segstream.
//!
//! This crate holds the pieces of the streaming segmentation engine that do
//! not depend on a particular wire grammar:
//!
//! - **[`types`]** -- segment events, tool invocations, extraction results.
//! - **[`chunk`]** -- the [`ResponseChunk`] sum type delivered by provider
//!   clients.
//! - **[`json_fields`]** -- [`JsonStringFieldExtractor`], an incremental
//!   scanner for string fields of a streamed JSON object.
//! - **[`file_streamer`]** -- [`FileContentStreamer`], live file bodies paired
//!   with their path.
//! - **[`error`]** -- the shared [`StreamError`] type.
//!
//! Everything here is synchronous and allocation-light; handlers in
//! `segstream-handlers` compose these pieces.

pub mod chunk;
pub mod error;
pub mod file_streamer;
pub mod json_fields;
pub mod types;

// Re-export the most commonly used types at the crate root for convenience.
pub use chunk::{ResponseChunk, ToolCallDelta};
pub use error::{Result, StreamError};
pub use file_streamer::{FileContentStreamer, FileStreamKind, FileStreamUpdate};
pub use json_fields::JsonStringFieldExtractor;
pub use types::{
    ExtractionResult, SegmentEvent, SegmentEventType, SegmentType, ToolInvocation, new_segment_id,
};
