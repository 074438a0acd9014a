//! One file held by one peer, optionally also present locally.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use super::RangeReader;
use crate::cache::BlockCache;
use crate::config::{CacheConfig, PullerConfig};
use crate::index::{
    BlockHash, BlockInfo, FileDescriptor, FolderId, IndexError, IndexService, PeerCandidate,
    PeerId,
};
use crate::pull::Puller;
use crate::storage::{LocalStorage, StorageError};
use crate::transport::{BlockRequest, PeerTransport, TransportError};

pub(crate) struct MemoryFile {
    pub content: Vec<u8>,
    pub block_size: usize,
    pub local_copy: bool,
    pub transport_calls: AtomicUsize,
    pub local_reads: AtomicUsize,
}

impl MemoryFile {
    pub fn new(size: usize, block_size: usize) -> Self {
        Self {
            content: (0..size).map(|i| (i % 251) as u8).collect(),
            block_size,
            local_copy: false,
            transport_calls: AtomicUsize::new(0),
            local_reads: AtomicUsize::new(0),
        }
    }

    pub fn descriptor(&self) -> FileDescriptor {
        let blocks = self
            .content
            .chunks(self.block_size)
            .enumerate()
            .map(|(index, data)| BlockInfo {
                hash: BlockHash::new(Sha256::digest(data).to_vec()),
                offset: (index * self.block_size) as u64,
                size: data.len() as u32,
            })
            .collect();
        FileDescriptor {
            folder: FolderId::new("media"),
            path: "clip.webm".to_string(),
            size: self.content.len() as u64,
            block_size: self.block_size as u32,
            blocks,
        }
    }

    pub fn transport_calls(&self) -> usize {
        self.transport_calls.load(Ordering::SeqCst)
    }

    pub fn reader(self: &Arc<Self>, token: CancellationToken) -> RangeReader {
        let puller = Puller::new(
            self.clone(),
            self.clone(),
            Arc::new(BlockCache::new(&CacheConfig { max_entries: 16 })),
            PullerConfig::default(),
        );
        RangeReader::new(
            Arc::new(puller),
            self.clone(),
            Arc::new(self.descriptor()),
            token,
        )
    }
}

#[async_trait]
impl IndexService for MemoryFile {
    async fn resolve_file(
        &self,
        _folder: &FolderId,
        _path: &str,
    ) -> Result<FileDescriptor, IndexError> {
        Ok(self.descriptor())
    }

    async fn peers_holding(
        &self,
        _file: &FileDescriptor,
        _block_index: usize,
    ) -> Result<Vec<PeerCandidate>, IndexError> {
        Ok(vec![PeerCandidate {
            peer: PeerId::new([4; 32]),
            latency: Some(Duration::from_millis(20)),
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
impl PeerTransport for MemoryFile {
    async fn request_block(
        &self,
        request: BlockRequest<'_>,
        _timeout: Duration,
    ) -> Result<Bytes, TransportError> {
        self.transport_calls.fetch_add(1, Ordering::SeqCst);
        let start = request.block.offset as usize;
        let end = start + request.block.size as usize;
        Ok(Bytes::copy_from_slice(&self.content[start..end]))
    }
}

#[async_trait]
impl LocalStorage for MemoryFile {
    async fn read_local(
        &self,
        _folder: &FolderId,
        _path: &str,
        offset: u64,
        length: usize,
    ) -> Result<Option<Bytes>, StorageError> {
        self.local_reads.fetch_add(1, Ordering::SeqCst);
        if !self.local_copy {
            return Ok(None);
        }
        let start = offset as usize;
        Ok(self
            .content
            .get(start..start + length)
            .map(Bytes::copy_from_slice))
    }
}
