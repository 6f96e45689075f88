//! CLI entry point for segstream.
//!
//! This binary provides the `segstream` command: `replay` streams a recorded
//! response through the handler an agent would use, and `parse` runs the
//! one-shot XML extractor over a complete document.  Results go to stdout
//! as JSON; logs go to stderr.

mod cli;
mod parse;
mod replay;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing("info", cli.log_json);

    match cli.command {
        Commands::Replay(args) => {
            replay::run(&args, std::io::stdout()).await?;
        }
        Commands::Parse { input } => {
            parse::run(&input, std::io::stdout().lock())?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing(default_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}
