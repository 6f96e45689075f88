//! Response chunks as delivered by provider clients.
//!
//! A chunk is one delivery unit of a streamed response.  Text-only providers
//! deliver [`ResponseChunk::Text`]; providers with native tool calling
//! interleave narrative text with [`ToolCallDelta`] fragments.
//!
//! On the wire (recorded responses, JSON lines) both variants share one
//! shape:
//!
//! ```text
//! {"content": "Hello"}
//! {"content": "", "tool_calls": [{"index": 0, "call_id": "call_1",
//!                                 "name": "write_file",
//!                                 "arguments_delta": "{\"path\":"}]}
//! ```

use serde::{Deserialize, Serialize};

/// One field-by-field fragment of a provider-native tool call.
///
/// Every field except `index` is optional: the id and name usually arrive
/// with the first fragment of a call and the arguments follow as arbitrary
/// byte splits of a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Correlates fragments of the same call.
    #[serde(default)]
    pub index: usize,

    #[serde(default, alias = "id", skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, alias = "arguments", skip_serializing_if = "Option::is_none")]
    pub arguments_delta: Option<String>,
}

impl ToolCallDelta {
    /// A fragment that opens a call.
    pub fn begin(index: usize, call_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            index,
            call_id: Some(call_id.into()),
            name: Some(name.into()),
            arguments_delta: None,
        }
    }

    /// A fragment that only carries argument text.
    pub fn arguments(index: usize, delta: impl Into<String>) -> Self {
        Self {
            index,
            call_id: None,
            name: None,
            arguments_delta: Some(delta.into()),
        }
    }
}

/// One delivery unit of a streamed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireChunk", into = "WireChunk")]
pub enum ResponseChunk {
    /// Plain text, possibly containing embedded tool-call markup.
    Text(String),

    /// Narrative text plus native tool-call fragments.
    ToolCalls {
        content: String,
        tool_calls: Vec<ToolCallDelta>,
    },
}

impl ResponseChunk {
    /// The narrative text carried by this chunk.
    pub fn content(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::ToolCalls { content, .. } => content,
        }
    }

    /// The tool-call fragments carried by this chunk (empty for text).
    pub fn tool_calls(&self) -> &[ToolCallDelta] {
        match self {
            Self::Text(_) => &[],
            Self::ToolCalls { tool_calls, .. } => tool_calls,
        }
    }
}

impl From<&str> for ResponseChunk {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for ResponseChunk {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<ToolCallDelta> for ResponseChunk {
    fn from(delta: ToolCallDelta) -> Self {
        Self::ToolCalls {
            content: String::new(),
            tool_calls: vec![delta],
        }
    }
}

/// The loosely-typed wire shape shared by both chunk variants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WireChunk {
    #[serde(default)]
    content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

impl From<WireChunk> for ResponseChunk {
    fn from(wire: WireChunk) -> Self {
        let content = wire.content.unwrap_or_default();
        match wire.tool_calls {
            Some(tool_calls) => Self::ToolCalls {
                content,
                tool_calls,
            },
            None => Self::Text(content),
        }
    }
}

impl From<ResponseChunk> for WireChunk {
    fn from(chunk: ResponseChunk) -> Self {
        match chunk {
            ResponseChunk::Text(text) => Self {
                content: Some(text),
                tool_calls: None,
            },
            ResponseChunk::ToolCalls {
                content,
                tool_calls,
            } => Self {
                content: Some(content),
                tool_calls: Some(tool_calls),
            },
        }
    }
}
