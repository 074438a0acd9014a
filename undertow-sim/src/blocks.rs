//! Splitting file content into content-hashed blocks.

use bytes::Bytes;
use sha2::{Digest, Sha256};
use undertow_core::{BlockHash, BlockInfo, FileDescriptor, FolderId};

/// File content together with the descriptor an index would publish for it.
#[derive(Debug, Clone)]
pub struct SeededFile {
    pub descriptor: FileDescriptor,
    pub content: Bytes,
}

impl SeededFile {
    /// Bytes of block `index`, if it exists.
    pub fn block_data(&self, index: usize) -> Option<Bytes> {
        let block = self.descriptor.block(index)?;
        let start = block.offset as usize;
        let end = block.end() as usize;
        (end <= self.content.len()).then(|| self.content.slice(start..end))
    }
}

/// Cuts `content` into `block_size` blocks hashed with SHA-256.
///
/// The last block holds the remainder. A block size of zero is treated as one.
pub fn split_into_blocks(
    folder: FolderId,
    path: impl Into<String>,
    content: Bytes,
    block_size: u32,
) -> SeededFile {
    let block_size = block_size.max(1);
    let blocks = content
        .chunks(block_size as usize)
        .enumerate()
        .map(|(index, data)| BlockInfo {
            hash: BlockHash::new(Sha256::digest(data).to_vec()),
            offset: index as u64 * block_size as u64,
            size: data.len() as u32,
        })
        .collect();

    SeededFile {
        descriptor: FileDescriptor {
            folder,
            path: path.into(),
            size: content.len() as u64,
            block_size,
            blocks,
        },
        content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_block_holds_remainder() {
        let file = split_into_blocks(
            FolderId::new("default"),
            "a.bin",
            Bytes::from(vec![1u8; 250]),
            100,
        );

        let sizes: Vec<u32> = file.descriptor.blocks.iter().map(|b| b.size).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert_eq!(file.descriptor.blocks[2].offset, 200);
        assert_eq!(file.descriptor.size, 250);
    }

    #[test]
    fn test_identical_blocks_share_hash() {
        let file = split_into_blocks(
            FolderId::new("default"),
            "a.bin",
            Bytes::from(vec![9u8; 200]),
            100,
        );
        assert_eq!(file.descriptor.blocks[0].hash, file.descriptor.blocks[1].hash);
    }

    #[test]
    fn test_block_data() {
        let content: Vec<u8> = (0..=255).collect();
        let file = split_into_blocks(FolderId::new("default"), "a.bin", Bytes::from(content), 100);

        assert_eq!(file.block_data(2).unwrap().as_ref(), &(200..=255).collect::<Vec<u8>>()[..]);
        assert!(file.block_data(3).is_none());
    }

    #[test]
    fn test_empty_file_has_no_blocks() {
        let file = split_into_blocks(FolderId::new("default"), "empty", Bytes::new(), 100);
        assert!(file.descriptor.blocks.is_empty());
        assert_eq!(file.descriptor.size, 0);
    }
}
