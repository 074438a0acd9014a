//! Block-level file model and the index service boundary.
//!
//! The distributed index is owned elsewhere; this module only defines the
//! read-only snapshot it hands out (a `FileDescriptor`) and the questions the
//! retrieval layer asks it: which file a path names, which peers hold a block,
//! whether a peer is connected and how far away it is.

use std::fmt;
use std::ops::Range;
use std::time::Duration;

use async_trait::async_trait;

/// Identifier of a synchronized folder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FolderId(String);

impl FolderId {
    /// Creates a folder identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable cryptographic identity of a remote peer.
///
/// 32-byte digest of the peer's certificate. Displayed as the first eight hex
/// characters, which is enough to tell peers apart in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; 32]);

impl PeerId {
    /// Creates a peer identity from its 32-byte digest.
    pub fn new(digest: [u8; 32]) -> Self {
        Self(digest)
    }

    /// Returns reference to the underlying digest.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full lowercase hex form of the identity.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Content hash of one block; the cache key and integrity anchor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockHash(Vec<u8>);

impl BlockHash {
    /// Wraps raw hash bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw hash bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

/// Immutable descriptor of one block within a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub hash: BlockHash,
    /// Byte offset of the block's first byte within the file
    pub offset: u64,
    pub size: u32,
}

impl BlockInfo {
    /// Offset one past the block's last byte.
    pub fn end(&self) -> u64 {
        self.offset + self.size as u64
    }
}

/// Snapshot of one synchronized file as the index currently describes it.
///
/// Blocks are contiguous, non-overlapping and ordered by offset; all but the
/// last are `block_size` bytes long. The snapshot is not refreshed while a
/// retrieval operation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub folder: FolderId,
    pub path: String,
    pub size: u64,
    pub block_size: u32,
    pub blocks: Vec<BlockInfo>,
}

impl FileDescriptor {
    /// Returns the block at `index`, if the file has that many blocks.
    pub fn block(&self, index: usize) -> Option<&BlockInfo> {
        self.blocks.get(index)
    }

    /// Number of blocks in the file.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Block indices whose bytes intersect `[offset, offset + length)`.
    ///
    /// A window starting mid-block includes that leading block. The window is
    /// clipped to the file; an empty or out-of-file window yields an empty range.
    pub fn covering_blocks(&self, offset: u64, length: u64) -> Range<usize> {
        let end = offset.saturating_add(length).min(self.size);
        if offset >= end {
            return 0..0;
        }

        let first = self.blocks.partition_point(|block| block.end() <= offset);
        let last = self.blocks.partition_point(|block| block.offset < end);
        first..last.max(first)
    }
}

/// One peer the index believes holds a given block.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerCandidate {
    pub peer: PeerId,
    /// Last measured round-trip latency; `None` when unknown
    pub latency: Option<Duration>,
    /// The peer only has the block in an in-progress temporary copy
    pub from_temporary: bool,
}

impl PeerCandidate {
    /// Creates a candidate from a latency reported in seconds.
    ///
    /// NaN, infinite and negative measurements all mean "unknown".
    pub fn with_latency_secs(peer: PeerId, latency_secs: f64, from_temporary: bool) -> Self {
        let latency = (latency_secs.is_finite() && latency_secs >= 0.0)
            .then(|| Duration::from_secs_f64(latency_secs));
        Self {
            peer,
            latency,
            from_temporary,
        }
    }
}

/// Questions the retrieval layer asks the distributed index.
#[async_trait]
pub trait IndexService: Send + Sync {
    /// Resolves a folder-relative path to its current file descriptor.
    ///
    /// # Errors
    ///
    /// - `IndexError::FileNotFound` - If the index has no such file
    /// - `IndexError::Unavailable` - If the index cannot be queried
    async fn resolve_file(&self, folder: &FolderId, path: &str)
    -> Result<FileDescriptor, IndexError>;

    /// Lists the peers currently announcing block `block_index` of `file`.
    ///
    /// # Errors
    ///
    /// - `IndexError::Unavailable` - If the index cannot be queried
    async fn peers_holding(
        &self,
        file: &FileDescriptor,
        block_index: usize,
    ) -> Result<Vec<PeerCandidate>, IndexError>;

    /// Whether a live connection to `peer` exists right now.
    fn is_peer_connected(&self, peer: &PeerId) -> bool;

    /// Latest latency measurement to `peer`, `None` when never measured.
    fn latency_to(&self, peer: &PeerId) -> Option<Duration>;
}

/// Errors reported by the index service.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// No file with this path exists in the folder
    #[error("File {path} not found in folder {folder}")]
    FileNotFound {
        /// Folder that was searched
        folder: FolderId,
        /// Folder-relative path that was requested
        path: String,
    },

    /// The index could not answer
    #[error("Index unavailable: {reason}")]
    Unavailable {
        /// Description of the failure
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn descriptor(block_sizes: &[u32]) -> FileDescriptor {
        let mut offset = 0;
        let blocks = block_sizes
            .iter()
            .enumerate()
            .map(|(index, &size)| {
                let block = BlockInfo {
                    hash: BlockHash::new(vec![index as u8; 4]),
                    offset,
                    size,
                };
                offset += size as u64;
                block
            })
            .collect();
        FileDescriptor {
            folder: FolderId::new("default"),
            path: "file.bin".to_string(),
            size: offset,
            block_size: block_sizes.first().copied().unwrap_or(0),
            blocks,
        }
    }

    #[test]
    fn test_covering_blocks_mid_block_start() {
        let file = descriptor(&[100, 100, 50]);
        assert_eq!(file.covering_blocks(50, 170), 0..3);
    }

    #[test]
    fn test_covering_blocks_aligned_window() {
        let file = descriptor(&[100, 100, 50]);
        assert_eq!(file.covering_blocks(100, 100), 1..2);
        assert_eq!(file.covering_blocks(0, 1), 0..1);
        assert_eq!(file.covering_blocks(199, 2), 1..3);
    }

    #[test]
    fn test_covering_blocks_clips_to_file() {
        let file = descriptor(&[100, 100, 50]);
        assert_eq!(file.covering_blocks(240, 1000), 2..3);
        assert_eq!(file.covering_blocks(250, 10), 0..0);
        assert_eq!(file.covering_blocks(10, 0), 0..0);
    }

    #[test]
    fn test_peer_id_display_is_short_hex() {
        let peer = PeerId::new([0xab; 32]);
        assert_eq!(peer.to_string(), "abababab");
        assert_eq!(peer.to_hex().len(), 64);
    }

    #[test]
    fn test_candidate_latency_unknown_for_nan() {
        let peer = PeerId::new([1; 32]);
        assert_eq!(
            PeerCandidate::with_latency_secs(peer, f64::NAN, false).latency,
            None
        );
        assert_eq!(
            PeerCandidate::with_latency_secs(peer, -1.0, false).latency,
            None
        );
        assert_eq!(
            PeerCandidate::with_latency_secs(peer, 0.25, true).latency,
            Some(Duration::from_millis(250))
        );
    }

    proptest! {
        #[test]
        fn covering_blocks_contains_every_requested_byte(
            sizes in prop::collection::vec(1u32..64, 1..12),
            offset in 0u64..800,
            length in 0u64..800,
        ) {
            let file = descriptor(&sizes);
            let covering = file.covering_blocks(offset, length);
            let end = (offset + length).min(file.size);

            for byte in offset..end {
                let holder = file.blocks.iter().position(|b| b.offset <= byte && byte < b.end());
                let holder = holder.expect("byte inside file has a block");
                prop_assert!(covering.contains(&holder));
            }

            for index in covering {
                let block = &file.blocks[index];
                prop_assert!(block.offset < end && block.end() > offset);
            }
        }
    }
}
