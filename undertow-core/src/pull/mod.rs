//! Peer-ranked block retrieval.
//!
//! A `Puller` is one retrieval operation: it owns the peer experience gathered
//! while fetching blocks of one file and shares the process-wide block cache
//! with every other operation. `ParallelDownloader` drives a puller over a
//! whole file with a few concurrent workers.

pub mod downloader;
pub mod experience;
pub mod puller;
pub mod ranking;
pub mod verify;

pub use downloader::ParallelDownloader;
pub use experience::PeerExperience;
pub use puller::Puller;
pub use ranking::{Tier, compare_latency, sort_by_latency};
pub use verify::{BlockVerifier, Sha256Verifier};

use crate::index::IndexError;

/// Errors surfaced by retrieval operations.
///
/// Peer-level failures never appear here while alternatives remain; they are
/// absorbed into peer experience and retried.
#[derive(Debug, thiserror::Error)]
pub enum PullError {
    /// The index lists no peer at all for this block
    #[error("No peer available for block {block_index} of {path}")]
    NoPeerAvailable {
        /// Folder-relative file path
        path: String,
        /// Block that has no holder
        block_index: usize,
    },

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Block index beyond the end of the file descriptor
    #[error("Block {block_index} out of range: file has {block_count} blocks")]
    BlockOutOfRange {
        /// Requested block
        block_index: usize,
        /// Blocks in the descriptor
        block_count: usize,
    },

    /// Index lookup failed
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// Writing fetched bytes to the destination failed
    #[error("Write failed: {0}")]
    Write(#[source] std::io::Error),

    /// A download worker stopped without reporting a result
    #[error("Download worker failed: {reason}")]
    Worker {
        /// Description of the failure
        reason: String,
    },
}

impl PullError {
    /// Whether the error was caused by the caller giving up.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PullError::Cancelled)
    }
}
