//! Seekable stream adapter over one remote file.

use std::io::SeekFrom;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ReaderError;
use crate::index::FileDescriptor;
use crate::pull::Puller;
use crate::storage::LocalStorage;

/// Progress of one read: bytes copied so far against bytes requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadProgress {
    pub delivered: usize,
    pub requested: usize,
}

/// Callback invoked after every block copied into a read buffer.
pub type ProgressCallback = Arc<dyn Fn(ReadProgress) + Send + Sync>;

/// Random-access reader over a `FileDescriptor`.
///
/// Every read first asks local storage for the exact bytes and falls back to
/// the puller when they are not fully present. The cursor belongs to this
/// reader alone; share the puller, not the reader, between requests.
pub struct RangeReader {
    puller: Arc<Puller>,
    local: Arc<dyn LocalStorage>,
    file: Arc<FileDescriptor>,
    position: u64,
    token: CancellationToken,
    progress: Option<ProgressCallback>,
}

impl RangeReader {
    /// Creates a reader positioned at the start of `file`.
    pub fn new(
        puller: Arc<Puller>,
        local: Arc<dyn LocalStorage>,
        file: Arc<FileDescriptor>,
        token: CancellationToken,
    ) -> Self {
        Self {
            puller,
            local,
            file,
            position: 0,
            token,
            progress: None,
        }
    }

    /// Installs a progress callback.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn file(&self) -> &FileDescriptor {
        &self.file
    }

    pub fn size(&self) -> u64 {
        self.file.size
    }

    /// Current cursor position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Token that cancels every fetch issued by this reader.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Reads up to `buf.len()` bytes at `offset` without moving the cursor.
    ///
    /// Returns 0 at or past the end of the file. Otherwise returns the number
    /// of bytes available in `[offset, offset + buf.len())`, clipped to the
    /// file size.
    ///
    /// # Errors
    ///
    /// - `ReaderError::Pull` - If fetching from peers failed or was cancelled
    pub async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, ReaderError> {
        if offset >= self.file.size || buf.is_empty() {
            return Ok(0);
        }

        let length = (buf.len() as u64).min(self.file.size - offset) as usize;
        let buf = &mut buf[..length];

        match self
            .local
            .read_local(&self.file.folder, &self.file.path, offset, length)
            .await
        {
            Ok(Some(data)) if data.len() == length => {
                debug!(
                    "Served {} bytes of {} at {} from local storage",
                    length, self.file.path, offset
                );
                buf.copy_from_slice(&data);
                self.report(length, length);
                return Ok(length);
            }
            Ok(_) => {}
            Err(error) => {
                warn!(
                    "Local read of {} failed, fetching from peers: {}",
                    self.file.path, error
                );
            }
        }

        let written = self
            .puller
            .fetch_range_with_progress(&self.file, offset, buf, &self.token, |delivered| {
                self.report(delivered, length)
            })
            .await?;

        Ok(written)
    }

    /// Reads at the cursor and advances it by the bytes produced.
    ///
    /// # Errors
    ///
    /// Same as `read_at`; the cursor does not move on error.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ReaderError> {
        let read = self.read_at(self.position, buf).await?;
        self.position += read as u64;
        Ok(read)
    }

    /// Reads exactly `length` bytes at `offset` into a fresh buffer.
    ///
    /// `length` is clipped to the end of the file first.
    ///
    /// # Errors
    ///
    /// - `ReaderError::Truncated` - If fewer bytes arrived than the file holds there
    /// - `ReaderError::Pull` - If fetching from peers failed or was cancelled
    pub async fn read_chunk(&self, offset: u64, length: usize) -> Result<Bytes, ReaderError> {
        let expected = (length as u64).min(self.file.size.saturating_sub(offset)) as usize;
        let mut chunk = BytesMut::zeroed(expected);

        let actual = self.read_at(offset, &mut chunk).await?;
        if actual != expected {
            return Err(ReaderError::Truncated {
                offset,
                expected,
                actual,
            });
        }

        Ok(chunk.freeze())
    }

    /// Moves the cursor, returning the new position.
    ///
    /// # Errors
    ///
    /// - `ReaderError::SeekBeforeStart` - Target before 0; cursor is set to 0
    /// - `ReaderError::EndOfStream` - Target past the end; cursor is set to the file size
    pub fn seek(&mut self, target: SeekFrom) -> Result<u64, ReaderError> {
        let size = self.file.size;
        let requested = match target {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.position as i128 + delta as i128,
            SeekFrom::End(delta) => size as i128 + delta as i128,
        };

        if requested < 0 {
            self.position = 0;
            return Err(ReaderError::SeekBeforeStart { requested });
        }

        if requested > size as i128 {
            self.position = size;
            return Err(ReaderError::EndOfStream { requested, size });
        }

        self.position = requested as u64;
        Ok(self.position)
    }

    fn report(&self, delivered: usize, requested: usize) {
        if let Some(progress) = &self.progress {
            progress(ReadProgress {
                delivered,
                requested,
            });
        }
    }
}
