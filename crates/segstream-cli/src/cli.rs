//! CLI argument definitions for segstream.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// segstream -- streaming segmentation and tool-call extraction.
#[derive(Parser)]
#[command(
    name = "segstream",
    version,
    about = "Replay recorded LLM responses through streaming segment handlers",
    long_about = "Feeds a recorded model response through the same handlers an agent uses \
                  while streaming, printing every segment event and tool invocation as \
                  JSON lines on stdout.  Logs go to stderr."
)]
pub struct Cli {
    /// Emit logs as JSON instead of the compact text format.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Stream a recorded response through a handler.
    Replay(ReplayArgs),

    /// Parse every `<tool>` element of a complete XML document.
    Parse {
        /// Document to parse.
        input: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ReplayArgs {
    /// Recorded response: `.jsonl` with one chunk object per line, or raw
    /// text.
    pub input: PathBuf,

    /// Parser name (`xml`, `json`, `sentinel`, `api_tool_call`).  Overrides
    /// the provider table.
    #[arg(long, short)]
    pub parser: Option<String>,

    /// Provider name used to look up the default parser.
    #[arg(long)]
    pub provider: Option<String>,

    /// Treat the agent as having no tools (pass-through mode).
    #[arg(long)]
    pub no_tools: bool,

    /// Characters per chunk when cutting a raw text input.
    #[arg(long, default_value_t = 16)]
    pub chunk_size: usize,

    /// TOML configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}
