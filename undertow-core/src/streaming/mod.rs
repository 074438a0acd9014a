//! Seekable reading over remote files.
//!
//! `RangeReader` presents one file as a random-access byte source, trying
//! local storage first and the puller second. `stream_range` turns a reader
//! into a paced stream of chunks suitable for an HTTP response body.

pub mod chunked;
pub mod range_reader;
pub mod throttle;

#[cfg(test)]
mod test_support;

pub use chunked::{ByteStream, stream_range};
pub use range_reader::{ProgressCallback, RangeReader, ReadProgress};
pub use throttle::PlaybackThrottle;

use crate::pull::PullError;

/// Errors from reading or seeking a `RangeReader`.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// Seek target lies before the first byte; the cursor was reset to 0
    #[error("Seek to {requested} is before the start of the file")]
    SeekBeforeStart {
        /// Absolute target the seek computed
        requested: i128,
    },

    /// Seek target lies past the last byte; the cursor was moved to the end
    #[error("Seek to {requested} is past the end of a {size} byte file")]
    EndOfStream {
        /// Absolute target the seek computed
        requested: i128,
        /// File size the cursor was clamped to
        size: u64,
    },

    /// Fewer bytes arrived than the file descriptor promised
    #[error("Read at {offset} returned {actual} of {expected} bytes")]
    Truncated {
        /// Offset of the short read
        offset: u64,
        /// Bytes the descriptor says exist there
        expected: usize,
        /// Bytes actually produced
        actual: usize,
    },

    /// Fetching bytes from peers failed
    #[error("Pull failed: {0}")]
    Pull(#[from] PullError),
}

impl ReaderError {
    /// Whether the read stopped because the caller cancelled it.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ReaderError::Pull(error) if error.is_cancelled())
    }
}
