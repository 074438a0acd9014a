//! Undertow Core - On-demand block retrieval for synchronized folders
//!
//! This crate fetches exactly the byte ranges a caller needs from whichever
//! peers currently hold the blocks of a file: candidate ranking with per-operation
//! peer experience, retry with back-off, a process-wide block cache, a seekable
//! range reader and a whole-file parallel downloader.

pub mod cache;
pub mod config;
pub mod index;
pub mod pull;
pub mod storage;
pub mod streaming;
pub mod tracing_setup;
pub mod transport;

// Re-export main types for convenient access
pub use cache::{BlockCache, CacheStatistics};
pub use config::UndertowConfig;
pub use index::{
    BlockHash, BlockInfo, FileDescriptor, FolderId, IndexError, IndexService, PeerCandidate, PeerId,
};
pub use pull::{ParallelDownloader, PeerExperience, PullError, Puller};
pub use storage::{LocalStorage, StorageError};
pub use streaming::{RangeReader, ReaderError};
pub use transport::{BlockRequest, PeerTransport, TransportError};

/// Core errors that can bubble up from any Undertow subsystem.
#[derive(Debug, thiserror::Error)]
pub enum UndertowError {
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Pull error: {0}")]
    Pull(#[from] PullError),

    #[error("Reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UndertowError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            UndertowError::Index(IndexError::FileNotFound { folder, path }) => {
                format!("File {path} not found in folder {folder}")
            }
            UndertowError::Index(_) => "Index lookup failed".to_string(),
            UndertowError::Pull(e) | UndertowError::Reader(ReaderError::Pull(e)) => match e {
                PullError::NoPeerAvailable { .. } => {
                    "No connected device currently has this file".to_string()
                }
                PullError::Cancelled => "Transfer cancelled".to_string(),
                _ => "Transfer error occurred".to_string(),
            },
            UndertowError::Reader(_) => "Read error occurred".to_string(),
            UndertowError::Storage(_) => "Local storage error occurred".to_string(),
            UndertowError::Configuration { .. } => "Configuration error occurred".to_string(),
            UndertowError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            UndertowError::Configuration { .. }
                | UndertowError::Index(IndexError::FileNotFound { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, UndertowError>;
