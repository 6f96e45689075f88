//! The `parse` subcommand: one-shot extraction from a complete document.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use segstream_core::ToolInvocation;
use segstream_handlers::parse_tool_invocations;

/// Parse every `<tool>` in `path` and print the invocations as a JSON array.
pub fn run<W: Write>(path: &Path, mut out: W) -> Result<Vec<ToolInvocation>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let invocations = parse_tool_invocations(&text);
    info!(path = %path.display(), invocations = invocations.len(), "document parsed");

    serde_json::to_writer_pretty(&mut out, &invocations).context("failed to write output")?;
    writeln!(out)?;
    Ok(invocations)
}
