//! Filesystem-backed local storage rooted at per-folder directories.

use std::collections::HashMap;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::{LocalStorage, StorageError};
use crate::index::FolderId;

/// Serves local reads from a directory per synchronized folder.
#[derive(Debug, Clone, Default)]
pub struct FolderStorage {
    roots: HashMap<FolderId, PathBuf>,
}

impl FolderStorage {
    /// Creates storage with no folders registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the on-disk root of `folder`.
    pub fn with_folder(mut self, folder: FolderId, root: impl Into<PathBuf>) -> Self {
        self.roots.insert(folder, root.into());
        self
    }

    fn resolve(&self, folder: &FolderId, path: &str) -> Result<Option<PathBuf>, StorageError> {
        let Some(root) = self.roots.get(folder) else {
            return Ok(None);
        };

        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(StorageError::PathOutsideFolder {
                folder: folder.clone(),
                path: path.to_string(),
            });
        }

        Ok(Some(root.join(relative)))
    }
}

#[async_trait]
impl LocalStorage for FolderStorage {
    async fn read_local(
        &self,
        folder: &FolderId,
        path: &str,
        offset: u64,
        length: usize,
    ) -> Result<Option<Bytes>, StorageError> {
        let Some(full_path) = self.resolve(folder, path)? else {
            return Ok(None);
        };

        let mut file = match File::open(&full_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let file_len = file.metadata().await?.len();
        if offset.saturating_add(length as u64) > file_len {
            return Ok(None);
        }

        file.seek(SeekFrom::Start(offset)).await?;
        let mut buffer = BytesMut::zeroed(length);
        match file.read_exact(&mut buffer).await {
            Ok(_) => Ok(Some(buffer.freeze())),
            // File shrank between metadata and read
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_with_file(contents: &[u8]) -> (tempfile::TempDir, FolderStorage) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("clip.mp4"), contents).unwrap();
        let storage = FolderStorage::new().with_folder(FolderId::new("videos"), dir.path());
        (dir, storage)
    }

    #[tokio::test]
    async fn test_reads_exact_range() {
        let (_dir, storage) = storage_with_file(b"0123456789");
        let bytes = storage
            .read_local(&FolderId::new("videos"), "clip.mp4", 3, 4)
            .await
            .unwrap();
        assert_eq!(bytes.as_deref(), Some(&b"3456"[..]));
    }

    #[tokio::test]
    async fn test_short_file_is_not_available() {
        let (_dir, storage) = storage_with_file(b"0123");
        let bytes = storage
            .read_local(&FolderId::new("videos"), "clip.mp4", 2, 10)
            .await
            .unwrap();
        assert!(bytes.is_none());
    }

    #[tokio::test]
    async fn test_missing_file_and_folder_are_not_available() {
        let (_dir, storage) = storage_with_file(b"0123");
        let missing_file = storage
            .read_local(&FolderId::new("videos"), "other.mp4", 0, 1)
            .await
            .unwrap();
        let missing_folder = storage
            .read_local(&FolderId::new("music"), "clip.mp4", 0, 1)
            .await
            .unwrap();
        assert!(missing_file.is_none());
        assert!(missing_folder.is_none());
    }

    #[tokio::test]
    async fn test_rejects_parent_traversal() {
        let (_dir, storage) = storage_with_file(b"0123");
        let result = storage
            .read_local(&FolderId::new("videos"), "../etc/passwd", 0, 1)
            .await;
        assert!(matches!(
            result,
            Err(StorageError::PathOutsideFolder { .. })
        ));
    }
}
