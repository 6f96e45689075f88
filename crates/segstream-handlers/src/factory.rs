//! Handler selection.
//!
//! The factory holds no state: every call to
//! [`StreamingResponseHandlerFactory::create`] inspects the options and
//! builds a fresh handler.
//!
//! | has tools | resolved parser        | handler                                |
//! |-----------|------------------------|----------------------------------------|
//! | no        | (ignored)              | [`PassThroughStreamingResponseHandler`] |
//! | yes       | `api_tool_call`        | [`ApiToolCallStreamingResponseHandler`] |
//! | yes       | `xml`/`json`/`sentinel` | [`ParsingStreamingResponseHandler`]     |

use tracing::debug;

use segstream_core::Result;

use crate::api_tool_call::ApiToolCallStreamingResponseHandler;
use crate::config::{ParserKind, StreamConfig};
use crate::handler::StreamingResponseHandler;
use crate::parsing::ParsingStreamingResponseHandler;
use crate::passthrough::PassThroughStreamingResponseHandler;

/// Everything the factory needs to pick a handler for one response.
#[derive(Debug, Clone)]
pub struct HandlerOptions {
    /// Whether the agent has any tools.  Without tools no grammar is scanned.
    pub has_tools: bool,
    /// Provider name, e.g. `"anthropic"` or `"openai"`.
    pub provider: Option<String>,
    /// Explicit parser name, taking precedence over the provider table.
    pub parser_override: Option<String>,
    pub config: StreamConfig,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            has_tools: true,
            provider: None,
            parser_override: None,
            config: StreamConfig::default(),
        }
    }
}

impl HandlerOptions {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn with_tools(mut self, has_tools: bool) -> Self {
        self.has_tools = has_tools;
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_parser(mut self, parser: impl Into<String>) -> Self {
        self.parser_override = Some(parser.into());
        self
    }
}

/// Builds the handler matching a provider and parser configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamingResponseHandlerFactory;

impl StreamingResponseHandlerFactory {
    /// Create a handler.  Fails with
    /// [`segstream_core::StreamError::UnknownParser`] when the resolved
    /// parser name is not recognized.
    pub fn create(options: &HandlerOptions) -> Result<Box<dyn StreamingResponseHandler>> {
        if !options.has_tools {
            debug!("no tools; using pass-through handler");
            return Ok(Box::new(PassThroughStreamingResponseHandler::new()));
        }

        let kind = options
            .config
            .resolve_parser(options.provider.as_deref(), options.parser_override.as_deref())?;
        debug!(
            provider = options.provider.as_deref().unwrap_or("-"),
            parser = %kind,
            "streaming handler selected"
        );

        let handler: Box<dyn StreamingResponseHandler> = match kind {
            ParserKind::ApiToolCall => {
                Box::new(ApiToolCallStreamingResponseHandler::new(&options.config))
            }
            grammar => Box::new(ParsingStreamingResponseHandler::new(grammar, &options.config)?),
        };
        Ok(handler)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
