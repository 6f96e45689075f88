//! Handler configuration.
//!
//! [`StreamConfig`] controls how the factory picks a handler and how the
//! handlers classify tools.  Every field has a default, so an empty TOML
//! file (or no file at all) yields a working configuration:
//!
//! ```toml
//! default_parser = "json"
//!
//! [providers]
//! anthropic = "xml"
//! openai = "api_tool_call"
//!
//! [tools]
//! write_file = ["write_file", "create_file"]
//!
//! [parsing]
//! max_header_bytes = 4096
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use segstream_core::{FileStreamKind, Result, SegmentType, StreamError};

/// Environment variable that overrides the parser selection.
pub const PARSER_ENV_VAR: &str = "SEGSTREAM_PARSER";

// ---------------------------------------------------------------------------
// Parser kinds
// ---------------------------------------------------------------------------

/// Every grammar or mode a handler can be built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    Xml,
    Json,
    Sentinel,
    /// Provider-native structured tool-call deltas.
    ApiToolCall,
}

impl ParserKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Xml => "xml",
            Self::Json => "json",
            Self::Sentinel => "sentinel",
            Self::ApiToolCall => "api_tool_call",
        }
    }
}

impl fmt::Display for ParserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParserKind {
    type Err = StreamError;

    fn from_str(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "xml" => Ok(Self::Xml),
            "json" => Ok(Self::Json),
            "sentinel" => Ok(Self::Sentinel),
            "api_tool_call" | "native" => Ok(Self::ApiToolCall),
            _ => Err(StreamError::UnknownParser {
                name: name.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tool classification
// ---------------------------------------------------------------------------

/// Tool names that get a dedicated segment type instead of `ToolCall`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolClassification {
    pub write_file: Vec<String>,
    pub patch_file: Vec<String>,
    pub bash: Vec<String>,
}

impl Default for ToolClassification {
    fn default() -> Self {
        Self {
            write_file: vec!["write_file".into(), "create_file".into()],
            patch_file: vec!["patch_file".into(), "apply_patch".into()],
            bash: vec!["run_bash".into(), "bash".into(), "execute_command".into()],
        }
    }
}

impl ToolClassification {
    /// The segment type a tool with this name renders as.
    pub fn segment_type(&self, tool_name: &str) -> SegmentType {
        let listed = |names: &[String]| names.iter().any(|n| n == tool_name);
        if listed(&self.write_file) {
            SegmentType::WriteFile
        } else if listed(&self.patch_file) {
            SegmentType::PatchFile
        } else if listed(&self.bash) {
            SegmentType::Bash
        } else {
            SegmentType::ToolCall
        }
    }

    /// The file-body shape streamed by this tool, if it mutates a file.
    pub fn file_kind(&self, tool_name: &str) -> Option<FileStreamKind> {
        match self.segment_type(tool_name) {
            SegmentType::WriteFile => Some(FileStreamKind::Write),
            SegmentType::PatchFile => Some(FileStreamKind::Patch),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Embedded grammar settings
// ---------------------------------------------------------------------------

/// Limits and names used by the embedded-grammar handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsingConfig {
    /// An opening tag or sentinel header longer than this without
    /// terminating is released as plain text.
    pub max_header_bytes: usize,
    /// Invocation name produced by the `<file path="...">` shorthand.
    pub file_tool_name: String,
    /// Invocation name produced by the `<bash>` shorthand.
    pub bash_tool_name: String,
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: 4096,
            file_tool_name: "write_file".into(),
            bash_tool_name: "run_bash".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// StreamConfig
// ---------------------------------------------------------------------------

/// Top-level configuration for handler selection and parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Forces one parser for every provider when set.
    pub parser: Option<String>,
    /// Parser for providers missing from [`providers`](Self::providers).
    pub default_parser: String,
    /// Provider name (lowercase) to parser name.
    pub providers: BTreeMap<String, String>,
    pub tools: ToolClassification,
    pub parsing: ParsingConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        let providers = [("anthropic", "xml"), ("claude", "xml")]
            .into_iter()
            .map(|(p, n)| (p.to_owned(), n.to_owned()))
            .collect();
        Self {
            parser: None,
            default_parser: ParserKind::Json.as_str().to_owned(),
            providers,
            tools: ToolClassification::default(),
            parsing: ParsingConfig::default(),
        }
    }
}

impl StreamConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| StreamError::Config {
            reason: format!("failed to parse TOML config: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), "stream configuration loaded");
        Ok(config)
    }

    /// Apply overrides from `(key, value)` pairs, typically the process
    /// environment.  Only [`PARSER_ENV_VAR`] is recognized.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            if key.as_ref() != PARSER_ENV_VAR {
                continue;
            }
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            ParserKind::from_str(value)?;
            debug!(parser = value, "parser overridden from environment");
            self.parser = Some(value.to_owned());
        }
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(std::env::vars())
    }

    /// Resolve the parser for a provider: explicit override, then the
    /// provider table, then the default.
    pub fn resolve_parser(&self, provider: Option<&str>, parser_override: Option<&str>) -> Result<ParserKind> {
        if let Some(name) = parser_override.or(self.parser.as_deref()) {
            return name.parse();
        }
        let from_table = provider
            .map(|p| p.trim().to_ascii_lowercase())
            .and_then(|p| self.providers.get(&p));
        match from_table {
            Some(name) => name.parse(),
            None => self.default_parser.parse(),
        }
    }

    /// Check that every parser name in the configuration resolves.
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.parser {
            name.parse::<ParserKind>()?;
        }
        self.default_parser.parse::<ParserKind>()?;
        for name in self.providers.values() {
            name.parse::<ParserKind>()?;
        }
        if self.parsing.max_header_bytes == 0 {
            return Err(StreamError::Config {
                reason: "parsing.max_header_bytes must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
