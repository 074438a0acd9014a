//! Local storage boundary for files already present on disk.
//!
//! Defines the exact-range read the range reader tries before touching the
//! network, with a folder-root filesystem implementation.

pub mod folder_storage;

use async_trait::async_trait;
use bytes::Bytes;
pub use folder_storage::FolderStorage;

use crate::index::FolderId;

/// Reads byte ranges of files that are fully present locally.
#[async_trait]
pub trait LocalStorage: Send + Sync {
    /// Reads exactly `length` bytes at `offset`.
    ///
    /// Returns `Ok(None)` when the bytes are not available locally (file
    /// missing, shorter than the range, or not selected for sync).
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - If the file exists but reading it failed
    async fn read_local(
        &self,
        folder: &FolderId,
        path: &str,
        offset: u64,
        length: usize,
    ) -> Result<Option<Bytes>, StorageError>;
}

/// Errors that occur while reading local files.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Path escapes the folder root
    #[error("Path {path} is outside folder {folder}")]
    PathOutsideFolder {
        /// Folder that was addressed
        folder: FolderId,
        /// Offending path
        path: String,
    },

    /// Standard I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
