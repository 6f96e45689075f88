//! The `replay` subcommand: feed a recorded response through a handler and
//! print what a streaming consumer would see.

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow, ensure};
use futures::stream;
use serde_json::json;
use tracing::{debug, info};

use segstream_core::{ResponseChunk, SegmentEvent, StreamError, ToolInvocation};
use segstream_handlers::{
    HandlerOptions, StreamConfig, StreamListener, StreamingResponseHandlerFactory, drive,
};

use crate::cli::ReplayArgs;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Load a recorded response.  `.jsonl` files hold one chunk object per
/// line; anything else is raw text cut into `chunk_size`-character chunks.
pub fn load_chunks(path: &Path, chunk_size: usize) -> Result<Vec<ResponseChunk>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let is_jsonl = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl"));
    let chunks = if is_jsonl {
        parse_jsonl(&text).with_context(|| format!("invalid chunk file {}", path.display()))?
    } else {
        ensure!(chunk_size > 0, "--chunk-size must be at least 1");
        split_text(&text, chunk_size)
    };
    debug!(chunks = chunks.len(), jsonl = is_jsonl, "recorded response loaded");
    Ok(chunks)
}

fn parse_jsonl(text: &str) -> Result<Vec<ResponseChunk>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("line {}: not a chunk object", n + 1))
        })
        .collect()
}

/// Cut `text` into chunks of at most `chunk_size` characters.
pub fn split_text(text: &str, chunk_size: usize) -> Vec<ResponseChunk> {
    let mut chunks = Vec::new();
    let mut start = 0;
    for (count, (i, _)) in text.char_indices().enumerate() {
        if count > 0 && count % chunk_size == 0 {
            chunks.push(ResponseChunk::from(&text[start..i]));
            start = i;
        }
    }
    if start < text.len() {
        chunks.push(ResponseChunk::from(&text[start..]));
    }
    chunks
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Writes every segment event as one JSON line as soon as it is emitted.
struct JsonLinesListener<W> {
    out: Arc<Mutex<W>>,
}

impl<W: Write + Send> StreamListener for JsonLinesListener<W> {
    fn on_segment_event(&mut self, event: &SegmentEvent) -> segstream_core::Result<()> {
        let line = serde_json::to_string(event)?;
        let mut out = self
            .out
            .lock()
            .map_err(|_| StreamError::listener("output lock poisoned"))?;
        writeln!(out, "{line}")?;
        Ok(())
    }
}

fn load_config(path: Option<&Path>) -> Result<StreamConfig> {
    let mut config = match path {
        Some(path) => StreamConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => StreamConfig::default(),
    };
    config
        .apply_env()
        .context("invalid parser override in environment")?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

/// Replay `args.input`, writing event lines and then one
/// `{"invocation": ...}` line per finalized invocation to `out`.
pub async fn run<W>(args: &ReplayArgs, out: W) -> Result<Vec<ToolInvocation>>
where
    W: Write + Send + 'static,
{
    let config = load_config(args.config.as_deref())?;
    let options = HandlerOptions {
        has_tools: !args.no_tools,
        provider: args.provider.clone(),
        parser_override: args.parser.clone(),
        config,
    };
    let mut handler =
        StreamingResponseHandlerFactory::create(&options).context("failed to select a handler")?;
    let chunks = load_chunks(&args.input, args.chunk_size)?;
    info!(
        handler = handler.name(),
        input = %args.input.display(),
        chunks = chunks.len(),
        "replaying response"
    );

    let out = Arc::new(Mutex::new(out));
    handler.set_listener(Box::new(JsonLinesListener {
        out: Arc::clone(&out),
    }));
    let invocations = drive(handler.as_mut(), stream::iter(chunks))
        .await
        .context("replay aborted")?;

    let mut out = out.lock().map_err(|_| anyhow!("output lock poisoned"))?;
    for invocation in &invocations {
        writeln!(out, "{}", json!({ "invocation": invocation }))?;
    }
    out.flush()?;

    info!(
        events = handler.events().len(),
        invocations = invocations.len(),
        "replay finished"
    );
    Ok(invocations)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
