//! Drive a handler from an async chunk stream.

use futures::{Stream, StreamExt};
use tracing::debug;

use segstream_core::{ResponseChunk, Result, ToolInvocation};

use crate::handler::StreamingResponseHandler;

/// Feed every chunk of `stream` into `handler`, then finalize it.
///
/// The handler stays synchronous; this only awaits the next chunk between
/// `feed()` calls.  The first error (a listener failure, or a handler that
/// was already finalized) stops the drive and is returned.
pub async fn drive<S>(
    handler: &mut dyn StreamingResponseHandler,
    mut stream: S,
) -> Result<Vec<ToolInvocation>>
where
    S: Stream<Item = ResponseChunk> + Unpin,
{
    let mut chunks = 0usize;
    while let Some(chunk) = stream.next().await {
        handler.feed(&chunk)?;
        chunks += 1;
    }
    let invocations = handler.finalize()?;
    debug!(
        handler = handler.name(),
        chunks,
        invocations = invocations.len(),
        "stream drained"
    );
    Ok(invocations)
}
