//! Block content verification.

use sha2::{Digest, Sha256};

use crate::index::BlockInfo;

/// Decides whether bytes returned by a peer really are the requested block.
pub trait BlockVerifier: Send + Sync {
    /// Returns a reason when `data` must be rejected.
    fn verify(&self, block: &BlockInfo, data: &[u8]) -> Result<(), String>;
}

/// Checks length, and SHA-256 content for 32-byte block hashes.
///
/// Hashes of any other length are accepted after the length check, which lets
/// indexes that use a different digest still be served.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Verifier;

impl BlockVerifier for Sha256Verifier {
    fn verify(&self, block: &BlockInfo, data: &[u8]) -> Result<(), String> {
        if data.len() != block.size as usize {
            return Err(format!(
                "expected {} bytes, received {}",
                block.size,
                data.len()
            ));
        }

        let expected = block.hash.as_bytes();
        if expected.len() == 32 && Sha256::digest(data).as_slice() != expected {
            return Err(format!("content does not hash to {}", block.hash));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::BlockHash;

    fn block_for(data: &[u8]) -> BlockInfo {
        BlockInfo {
            hash: BlockHash::new(Sha256::digest(data).to_vec()),
            offset: 0,
            size: data.len() as u32,
        }
    }

    #[test]
    fn test_accepts_matching_content() {
        let block = block_for(b"hello block");
        assert!(Sha256Verifier.verify(&block, b"hello block").is_ok());
    }

    #[test]
    fn test_rejects_wrong_length() {
        let block = block_for(b"hello block");
        let reason = Sha256Verifier.verify(&block, b"hello").unwrap_err();
        assert!(reason.contains("expected 11 bytes"));
    }

    #[test]
    fn test_rejects_corrupted_content() {
        let block = block_for(b"hello block");
        assert!(Sha256Verifier.verify(&block, b"jello block").is_err());
    }

    #[test]
    fn test_non_sha256_hash_only_checks_length() {
        let block = BlockInfo {
            hash: BlockHash::new(vec![7; 4]),
            offset: 0,
            size: 3,
        };
        assert!(Sha256Verifier.verify(&block, b"abc").is_ok());
    }
}
