//! Streaming response handlers for segstream.
//!
//! A handler consumes the chunks of one streamed LLM response and turns them
//! into ordered [`SegmentEvent`](segstream_core::SegmentEvent)s plus a list
//! of [`ToolInvocation`](segstream_core::ToolInvocation)s:
//!
//! - **[`PassThroughStreamingResponseHandler`]** -- agents without tools; all
//!   text is one segment.
//! - **[`ParsingStreamingResponseHandler`]** -- tool calls embedded in the
//!   text with the `xml`, `json` or `sentinel` grammar.
//! - **[`ApiToolCallStreamingResponseHandler`]** -- provider-native
//!   structured tool-call deltas.
//!
//! [`StreamingResponseHandlerFactory`] picks one from a [`StreamConfig`] and
//! the provider name.  Consumers observe events either through the vectors
//! returned by `feed()` or through a [`StreamListener`].
//!
//! ```rust
//! use segstream_handlers::{HandlerOptions, StreamingResponseHandlerFactory};
//!
//! let options = HandlerOptions::default().with_provider("anthropic");
//! let mut handler = StreamingResponseHandlerFactory::create(&options)?;
//! handler.feed_text("Listing.<bash>ls</bash>")?;
//! let invocations = handler.finalize()?;
//! assert_eq!(invocations[0].name, "run_bash");
//! # Ok::<(), segstream_core::StreamError>(())
//! ```

pub mod api_tool_call;
pub mod config;
pub mod drive;
mod emitter;
pub mod factory;
pub mod handler;
pub mod listener;
pub mod parsing;
pub mod passthrough;
pub mod xml_document;

pub use api_tool_call::ApiToolCallStreamingResponseHandler;
pub use config::{PARSER_ENV_VAR, ParserKind, ParsingConfig, StreamConfig, ToolClassification};
pub use drive::drive;
pub use factory::{HandlerOptions, StreamingResponseHandlerFactory};
pub use handler::StreamingResponseHandler;
pub use listener::{CallbackListener, StreamListener};
pub use parsing::ParsingStreamingResponseHandler;
pub use passthrough::PassThroughStreamingResponseHandler;
pub use xml_document::{parse_tool_invocation, parse_tool_invocations, parse_xml_arguments};
