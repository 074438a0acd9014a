//! Peer transport boundary.
//!
//! Sending a block request to a connected peer and waiting for the bytes is
//! somebody else's protocol; the retrieval layer only needs one call.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::index::{BlockInfo, FolderId, PeerId};

/// Everything a peer needs to locate one block.
#[derive(Debug, Clone, Copy)]
pub struct BlockRequest<'a> {
    pub peer: &'a PeerId,
    pub folder: &'a FolderId,
    pub path: &'a str,
    pub block_index: usize,
    pub block: &'a BlockInfo,
    /// Ask the peer to serve from its temporary copy of the file
    pub from_temporary: bool,
}

/// Fetches block bytes from remote peers.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Requests one block from `request.peer`.
    ///
    /// Implementations should give up after `timeout`; callers enforce the
    /// same bound independently.
    ///
    /// # Errors
    ///
    /// - `TransportError::NotConnected` - If no connection to the peer exists
    /// - `TransportError::Timeout` - If the peer did not answer in time
    /// - `TransportError::Remote` - If the peer answered with an error
    async fn request_block(
        &self,
        request: BlockRequest<'_>,
        timeout: Duration,
    ) -> Result<Bytes, TransportError>;
}

/// Failures of a single block request to a single peer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    /// Peer is not connected
    #[error("Peer {peer} is not connected")]
    NotConnected {
        /// Peer the request was addressed to
        peer: PeerId,
    },

    /// Peer did not answer within the per-block timeout
    #[error("Peer {peer} timed out after {after:?}")]
    Timeout {
        /// Peer the request was addressed to
        peer: PeerId,
        /// Time given to the peer
        after: Duration,
    },

    /// Peer answered with an error
    #[error("Peer {peer} refused block: {reason}")]
    Remote {
        /// Peer the request was addressed to
        peer: PeerId,
        /// Error reported by the peer
        reason: String,
    },

    /// Peer answered with bytes that do not match the block descriptor
    #[error("Peer {peer} sent an invalid block: {reason}")]
    InvalidBlock {
        /// Peer the request was addressed to
        peer: PeerId,
        /// Why the bytes were rejected
        reason: String,
    },
}
