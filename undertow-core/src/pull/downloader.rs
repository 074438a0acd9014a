//! Whole-file download with concurrent block workers and in-order writes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{PullError, Puller};
use crate::index::FileDescriptor;

/// Suffix of the partial file written by `save_to_path`.
const TEMP_SUFFIX: &str = ".undertow-tmp";

/// Downloads entire files through a shared `Puller`.
///
/// Worker `k` of `N` fetches blocks `k, k + N, k + 2N, ...` and hands each to
/// the coordinator over its own single-slot channel. The coordinator writes
/// blocks strictly in index order, so each worker runs at most one block
/// ahead of the writer.
pub struct ParallelDownloader {
    puller: Arc<Puller>,
    workers: usize,
}

impl ParallelDownloader {
    /// Creates a downloader using the puller's configured worker count.
    pub fn new(puller: Arc<Puller>) -> Self {
        let workers = puller.config().download_workers.max(1);
        Self { puller, workers }
    }

    /// Overrides the number of concurrent workers (at least one).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Streams every block of `file` into `writer` in order.
    ///
    /// Returns the number of bytes written. The first failure of any worker
    /// cancels the remaining workers and is returned once they have stopped.
    ///
    /// # Errors
    ///
    /// - `PullError::Cancelled` - If `token` was cancelled
    /// - `PullError::Write` - If writing to `writer` failed
    /// - Any other `PullError` a block fetch produced
    pub async fn download_into<W>(
        &self,
        file: Arc<FileDescriptor>,
        writer: &mut W,
        token: &CancellationToken,
    ) -> Result<u64, PullError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let block_count = file.block_count();
        if block_count == 0 {
            writer.flush().await.map_err(PullError::Write)?;
            return Ok(0);
        }

        let workers = self.workers.min(block_count);
        let token = token.child_token();

        let mut receivers = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let (sender, receiver) = mpsc::channel::<Bytes>(1);
            receivers.push(receiver);

            let puller = Arc::clone(&self.puller);
            let file = Arc::clone(&file);
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                for block_index in (worker..block_count).step_by(workers) {
                    let data = match puller.fetch_block(&file, block_index, &token).await {
                        Ok(data) => data,
                        Err(error) => {
                            token.cancel();
                            return Err(error);
                        }
                    };
                    if sender.send(data).await.is_err() {
                        // Coordinator stopped reading
                        return Err(PullError::Cancelled);
                    }
                }
                Ok(())
            }));
        }

        let mut written: u64 = 0;
        let mut blocks_written = 0;
        let mut write_failure = None;

        for block_index in 0..block_count {
            let Some(data) = receivers[block_index % workers].recv().await else {
                break;
            };
            if let Err(error) = writer.write_all(&data).await {
                token.cancel();
                write_failure = Some(PullError::Write(error));
                break;
            }
            written += data.len() as u64;
            blocks_written += 1;
            debug!(
                "Wrote block {}/{} of {} ({} bytes total)",
                block_index + 1,
                block_count,
                file.path,
                written
            );
        }

        // Unblock workers parked on a full channel before joining them
        drop(receivers);
        let outcomes = join_all(handles).await;

        if let Some(error) = write_failure {
            return Err(error);
        }

        let mut cancelled = false;
        for outcome in outcomes {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(PullError::Cancelled)) => cancelled = true,
                Ok(Err(error)) => return Err(error),
                Err(join_error) => {
                    return Err(PullError::Worker {
                        reason: join_error.to_string(),
                    });
                }
            }
        }

        if cancelled || blocks_written < block_count {
            return Err(PullError::Cancelled);
        }

        writer.flush().await.map_err(PullError::Write)?;
        Ok(written)
    }

    /// Downloads `file` to `destination` atomically.
    ///
    /// Bytes go to `<destination>.undertow-tmp`, which is renamed over
    /// `destination` only after the whole file was written and synced. On any
    /// failure the temporary file is removed and `destination` is untouched.
    ///
    /// # Errors
    ///
    /// Same as `download_into`; file system failures map to `PullError::Write`.
    pub async fn save_to_path(
        &self,
        file: Arc<FileDescriptor>,
        destination: &Path,
        token: &CancellationToken,
    ) -> Result<u64, PullError> {
        let temp_path = temp_path_for(destination);
        let path = file.path.clone();

        let result = match self.write_temp(file, &temp_path, token).await {
            Ok(written) => tokio::fs::rename(&temp_path, destination)
                .await
                .map(|()| written)
                .map_err(PullError::Write),
            Err(error) => Err(error),
        };

        match result {
            Ok(written) => {
                info!(
                    "Saved {} ({} bytes) to {}",
                    path,
                    written,
                    destination.display()
                );
                Ok(written)
            }
            Err(error) => {
                if let Err(remove_error) = tokio::fs::remove_file(&temp_path).await
                    && remove_error.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(
                        "Failed to remove partial download {}: {}",
                        temp_path.display(),
                        remove_error
                    );
                }
                Err(error)
            }
        }
    }

    async fn write_temp(
        &self,
        file: Arc<FileDescriptor>,
        temp_path: &Path,
        token: &CancellationToken,
    ) -> Result<u64, PullError> {
        let mut output = tokio::fs::File::create(temp_path)
            .await
            .map_err(PullError::Write)?;
        let written = self.download_into(file, &mut output, token).await?;
        output.sync_all().await.map_err(PullError::Write)?;
        Ok(written)
    }
}

fn temp_path_for(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use async_trait::async_trait;
    use sha2::{Digest, Sha256};

    use super::*;
    use crate::cache::BlockCache;
    use crate::config::{CacheConfig, PullerConfig};
    use crate::index::{
        BlockHash, BlockInfo, FolderId, IndexError, IndexService, PeerCandidate, PeerId,
    };
    use crate::transport::{BlockRequest, PeerTransport, TransportError};

    /// One peer holding every block except those listed as missing.
    struct SinglePeer {
        blocks: Vec<Vec<u8>>,
        missing: HashSet<usize>,
    }

    impl SinglePeer {
        fn new(block_count: usize, block_size: usize) -> Self {
            let blocks = (0..block_count)
                .map(|b| (0..block_size).map(|i| (b * 31 + i) as u8).collect())
                .collect();
            Self {
                blocks,
                missing: HashSet::new(),
            }
        }

        fn whole_file(&self) -> Vec<u8> {
            self.blocks.concat()
        }

        fn descriptor(&self) -> Arc<FileDescriptor> {
            let mut offset = 0;
            let blocks = self
                .blocks
                .iter()
                .map(|data| {
                    let block = BlockInfo {
                        hash: BlockHash::new(Sha256::digest(data).to_vec()),
                        offset,
                        size: data.len() as u32,
                    };
                    offset += data.len() as u64;
                    block
                })
                .collect();
            Arc::new(FileDescriptor {
                folder: FolderId::new("default"),
                path: "movie.mkv".to_string(),
                size: offset,
                block_size: self.blocks.first().map_or(0, |b| b.len() as u32),
                blocks,
            })
        }
    }

    #[async_trait]
    impl IndexService for SinglePeer {
        async fn resolve_file(
            &self,
            _folder: &FolderId,
            _path: &str,
        ) -> Result<FileDescriptor, IndexError> {
            Ok(self.descriptor().as_ref().clone())
        }

        async fn peers_holding(
            &self,
            _file: &FileDescriptor,
            block_index: usize,
        ) -> Result<Vec<PeerCandidate>, IndexError> {
            if self.missing.contains(&block_index) {
                return Ok(Vec::new());
            }
            Ok(vec![PeerCandidate {
                peer: PeerId::new([9; 32]),
                latency: Some(Duration::from_millis(5)),
                from_temporary: false,
            }])
        }

        fn is_peer_connected(&self, _peer: &PeerId) -> bool {
            true
        }

        fn latency_to(&self, _peer: &PeerId) -> Option<Duration> {
            None
        }
    }

    #[async_trait]
    impl PeerTransport for SinglePeer {
        async fn request_block(
            &self,
            request: BlockRequest<'_>,
            _timeout: Duration,
        ) -> Result<Bytes, TransportError> {
            tokio::task::yield_now().await;
            Ok(Bytes::from(self.blocks[request.block_index].clone()))
        }
    }

    fn downloader_for(peer: Arc<SinglePeer>, workers: usize) -> ParallelDownloader {
        let puller = Puller::new(
            peer.clone(),
            peer,
            Arc::new(BlockCache::new(&CacheConfig { max_entries: 4 })),
            PullerConfig::default(),
        );
        ParallelDownloader::new(Arc::new(puller)).with_workers(workers)
    }

    #[tokio::test]
    async fn test_writes_blocks_in_order() {
        for workers in [1, 2, 3, 8] {
            let peer = Arc::new(SinglePeer::new(7, 64));
            let downloader = downloader_for(peer.clone(), workers);
            let mut output = Vec::new();

            let written = downloader
                .download_into(peer.descriptor(), &mut output, &CancellationToken::new())
                .await
                .unwrap();

            assert_eq!(written, 7 * 64);
            assert_eq!(output, peer.whole_file(), "workers = {workers}");
        }
    }

    #[tokio::test]
    async fn test_empty_file_writes_nothing() {
        let peer = Arc::new(SinglePeer::new(0, 64));
        let downloader = downloader_for(peer.clone(), 2);
        let mut output = Vec::new();

        let written = downloader
            .download_into(peer.descriptor(), &mut output, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(written, 0);
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_first_worker_error_is_returned() {
        let mut peer = SinglePeer::new(6, 32);
        peer.missing.insert(3);
        let peer = Arc::new(peer);
        let downloader = downloader_for(peer.clone(), 2);
        let mut output = Vec::new();

        let result = downloader
            .download_into(peer.descriptor(), &mut output, &CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            Err(PullError::NoPeerAvailable { block_index: 3, .. })
        ));
        assert!(output.len() <= 3 * 32);
    }

    #[tokio::test]
    async fn test_cancelled_download_reports_cancellation() {
        let peer = Arc::new(SinglePeer::new(4, 32));
        let downloader = downloader_for(peer.clone(), 2);
        let token = CancellationToken::new();
        token.cancel();
        let mut output = Vec::new();

        let result = downloader
            .download_into(peer.descriptor(), &mut output, &token)
            .await;

        assert!(matches!(result, Err(PullError::Cancelled)));
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_write_error_stops_download() {
        let peer = Arc::new(SinglePeer::new(4, 16));
        let downloader = downloader_for(peer.clone(), 2);
        let mut writer = tokio_test::io::Builder::new()
            .write(&peer.blocks[0])
            .write_error(std::io::Error::other("disk full"))
            .build();

        let result = downloader
            .download_into(peer.descriptor(), &mut writer, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(PullError::Write(_))));
    }

    #[tokio::test]
    async fn test_save_to_path_renames_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("movie.mkv");
        let peer = Arc::new(SinglePeer::new(5, 100));
        let downloader = downloader_for(peer.clone(), 2);

        let written = downloader
            .save_to_path(peer.descriptor(), &destination, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(written, 500);
        assert_eq!(std::fs::read(&destination).unwrap(), peer.whole_file());
        assert!(!temp_path_for(&destination).exists());
    }

    #[tokio::test]
    async fn test_save_to_path_cleans_up_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("movie.mkv");
        let mut peer = SinglePeer::new(5, 100);
        peer.missing.insert(4);
        let peer = Arc::new(peer);
        let downloader = downloader_for(peer.clone(), 2);

        let result = downloader
            .save_to_path(peer.descriptor(), &destination, &CancellationToken::new())
            .await;

        assert!(result.is_err());
        assert!(!destination.exists());
        assert!(!temp_path_for(&destination).exists());
    }

    #[test]
    fn test_temp_path_appends_suffix() {
        assert_eq!(
            temp_path_for(Path::new("/data/movie.mkv")),
            PathBuf::from("/data/movie.mkv.undertow-tmp")
        );
    }
}
