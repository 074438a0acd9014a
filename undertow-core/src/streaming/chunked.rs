//! Chunked byte streams over a `RangeReader`.

use std::ops::Range;
use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, stream};
use tokio_util::sync::DropGuard;
use tracing::debug;

use super::{PlaybackThrottle, RangeReader, ReaderError};

/// Boxed stream of file chunks, ready to become a response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ReaderError>> + Send>>;

struct ChunkState {
    reader: RangeReader,
    next: u64,
    end: u64,
    chunk_size: usize,
    throttle: Option<PlaybackThrottle>,
    // Cancels the reader's token once the consumer drops the stream
    _guard: DropGuard,
}

/// Streams `range` of the reader's file in chunks of at most `chunk_size`.
///
/// Chunks are produced in file order and sum exactly to the clipped range
/// length; the first error ends the stream. Dropping the stream cancels the
/// reader's token, aborting any fetch still in flight for it.
pub fn stream_range(
    reader: RangeReader,
    range: Range<u64>,
    chunk_size: usize,
    throttle: Option<PlaybackThrottle>,
) -> ByteStream {
    let end = range.end.min(reader.size());
    let guard = reader.token().clone().drop_guard();
    let state = ChunkState {
        reader,
        next: range.start,
        end,
        chunk_size: chunk_size.max(1),
        throttle,
        _guard: guard,
    };

    Box::pin(stream::try_unfold(state, |mut state| async move {
        if state.next >= state.end {
            debug!(
                "Finished streaming {} up to {}",
                state.reader.file().path,
                state.end
            );
            return Ok(None);
        }

        let length = (state.chunk_size as u64).min(state.end - state.next) as usize;
        let chunk = state.reader.read_chunk(state.next, length).await?;
        state.next += chunk.len() as u64;

        if let Some(throttle) = state.throttle.as_mut() {
            throttle.pace(chunk.len()).await;
        }

        Ok(Some((chunk, state)))
    }))
}
