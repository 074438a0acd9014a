//! Block and byte-range fetching across ranked peer candidates.
//!
//! For each block the puller asks the index who holds it, orders those peers
//! by measured latency, and walks them tier by tier: peers that delivered
//! earlier in this operation first, untried peers next, peers that failed
//! last. When every tier is exhausted it sleeps a fixed back-off and walks
//! them again until the caller cancels. Only an empty candidate list, the
//! caller's cancellation or an index failure end a fetch unsuccessfully.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::experience::PeerExperience;
use super::ranking::{Tier, sort_by_latency};
use super::verify::{BlockVerifier, Sha256Verifier};
use super::PullError;
use crate::cache::BlockCache;
use crate::config::PullerConfig;
use crate::index::{BlockInfo, FileDescriptor, IndexService, PeerCandidate};
use crate::transport::{BlockRequest, PeerTransport, TransportError};

/// Outcome of one request to one candidate.
#[derive(Debug)]
enum AttemptError {
    Cancelled,
    Peer(TransportError),
}

/// One retrieval operation over the peers of a synchronized folder.
///
/// Holds the operation's `PeerExperience`; construct a fresh puller per
/// operation so experience never leaks across files or requests. The block
/// cache is shared and outlives every puller.
pub struct Puller {
    index: Arc<dyn IndexService>,
    transport: Arc<dyn PeerTransport>,
    cache: Arc<BlockCache>,
    verifier: Arc<dyn BlockVerifier>,
    experience: PeerExperience,
    config: PullerConfig,
}

impl Puller {
    /// Creates a puller with an empty experience map and SHA-256 verification.
    pub fn new(
        index: Arc<dyn IndexService>,
        transport: Arc<dyn PeerTransport>,
        cache: Arc<BlockCache>,
        config: PullerConfig,
    ) -> Self {
        Self {
            index,
            transport,
            cache,
            verifier: Arc::new(Sha256Verifier),
            experience: PeerExperience::new(),
            config,
        }
    }

    /// Replaces the block verifier.
    pub fn with_verifier(mut self, verifier: Arc<dyn BlockVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Experience gathered by this operation so far.
    pub fn experience(&self) -> &PeerExperience {
        &self.experience
    }

    pub fn config(&self) -> &PullerConfig {
        &self.config
    }

    /// Fetches one block, from the cache if possible, otherwise from peers.
    ///
    /// Retries indefinitely while candidates exist; bound the call with
    /// `token` when the file may be unobtainable.
    ///
    /// # Errors
    ///
    /// - `PullError::BlockOutOfRange` - If `block_index` is not in the descriptor
    /// - `PullError::NoPeerAvailable` - If the index lists no holder for the block
    /// - `PullError::Cancelled` - If `token` was cancelled before a peer delivered
    /// - `PullError::Index` - If the index could not be queried
    pub async fn fetch_block(
        &self,
        file: &FileDescriptor,
        block_index: usize,
        token: &CancellationToken,
    ) -> Result<Bytes, PullError> {
        let block = file
            .block(block_index)
            .ok_or(PullError::BlockOutOfRange {
                block_index,
                block_count: file.block_count(),
            })?;

        if let Some(data) = self.cache.get(&block.hash) {
            return Ok(data);
        }

        if token.is_cancelled() {
            return Err(PullError::Cancelled);
        }

        let mut candidates = self.index.peers_holding(file, block_index).await?;
        if candidates.is_empty() {
            warn!(
                "No peer holds block {} of {}/{}",
                block_index, file.folder, file.path
            );
            return Err(PullError::NoPeerAvailable {
                path: file.path.clone(),
                block_index,
            });
        }

        for candidate in &mut candidates {
            if candidate.latency.is_none() {
                candidate.latency = self.index.latency_to(&candidate.peer);
            }
        }
        sort_by_latency(&mut candidates);

        let timeout = self.config.block_timeout(block.size);
        let mut pass: u64 = 0;

        loop {
            pass += 1;
            let tiers = self.partition_by_tier(&candidates);

            for (tier, members) in Tier::ORDER.into_iter().zip(tiers) {
                if token.is_cancelled() {
                    return Err(PullError::Cancelled);
                }

                for candidate in members {
                    if token.is_cancelled() {
                        return Err(PullError::Cancelled);
                    }

                    if !self.index.is_peer_connected(&candidate.peer) {
                        trace!("Skipping disconnected peer {}", candidate.peer);
                        continue;
                    }

                    debug!(
                        "Requesting block {} of {} from {} ({:?}, pass {})",
                        block_index, file.path, candidate.peer, tier, pass
                    );

                    match self
                        .attempt(file, block_index, block, candidate, timeout, token)
                        .await
                    {
                        Ok(data) => {
                            self.experience.set(candidate.peer, true);
                            self.cache.put(block.hash.clone(), data.clone());
                            return Ok(data);
                        }
                        Err(AttemptError::Cancelled) => return Err(PullError::Cancelled),
                        // A failure racing the caller's cancellation says nothing about the peer
                        Err(AttemptError::Peer(_)) if token.is_cancelled() => {
                            return Err(PullError::Cancelled);
                        }
                        Err(AttemptError::Peer(error)) => {
                            warn!("Block {} of {}: {}", block_index, file.path, error);
                            self.experience.set(candidate.peer, false);
                        }
                    }
                }
            }

            debug!(
                "All candidates failed for block {} of {} after pass {}, retrying in {:?}",
                block_index, file.path, pass, self.config.retry_backoff
            );

            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(PullError::Cancelled),
                _ = tokio::time::sleep(self.config.retry_backoff) => {}
            }
        }
    }

    /// Fills `dest` with file bytes starting at `offset`.
    ///
    /// Returns the number of bytes written, which is less than `dest.len()`
    /// only when the window runs past the end of the file.
    ///
    /// # Errors
    ///
    /// Any `fetch_block` error aborts the range; bytes already copied into
    /// `dest` are left in place and must not be trusted.
    pub async fn fetch_range(
        &self,
        file: &FileDescriptor,
        offset: u64,
        dest: &mut [u8],
        token: &CancellationToken,
    ) -> Result<usize, PullError> {
        self.fetch_range_with_progress(file, offset, dest, token, |_| {})
            .await
    }

    /// Like `fetch_range`, reporting cumulative bytes written after each block.
    ///
    /// # Errors
    ///
    /// Same as `fetch_range`.
    pub async fn fetch_range_with_progress<F>(
        &self,
        file: &FileDescriptor,
        offset: u64,
        dest: &mut [u8],
        token: &CancellationToken,
        mut on_progress: F,
    ) -> Result<usize, PullError>
    where
        F: FnMut(usize) + Send,
    {
        let end = offset.saturating_add(dest.len() as u64).min(file.size);
        let mut written = 0;

        for block_index in file.covering_blocks(offset, dest.len() as u64) {
            let data = self.fetch_block(file, block_index, token).await?;
            let block_offset = file.blocks[block_index].offset;

            let copy_start = offset.max(block_offset);
            let copy_end = end.min(block_offset + data.len() as u64);
            if copy_end <= copy_start {
                continue;
            }

            let source =
                &data[(copy_start - block_offset) as usize..(copy_end - block_offset) as usize];
            let target = (copy_start - offset) as usize;
            dest[target..target + source.len()].copy_from_slice(source);

            written += source.len();
            on_progress(written);
        }

        Ok(written)
    }

    fn partition_by_tier<'a>(&self, candidates: &'a [PeerCandidate]) -> [Vec<&'a PeerCandidate>; 3] {
        let mut tiers: [Vec<&PeerCandidate>; 3] = Default::default();
        for candidate in candidates {
            tiers[self.experience.tier(&candidate.peer) as usize].push(candidate);
        }
        tiers
    }

    async fn attempt(
        &self,
        file: &FileDescriptor,
        block_index: usize,
        block: &BlockInfo,
        candidate: &PeerCandidate,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<Bytes, AttemptError> {
        let request = BlockRequest {
            peer: &candidate.peer,
            folder: &file.folder,
            path: &file.path,
            block_index,
            block,
            from_temporary: candidate.from_temporary,
        };

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(AttemptError::Cancelled),
            outcome = tokio::time::timeout(timeout, self.transport.request_block(request, timeout)) => outcome,
        };

        let data = match outcome {
            Ok(Ok(data)) => data,
            Ok(Err(error)) => return Err(AttemptError::Peer(error)),
            Err(_) => {
                return Err(AttemptError::Peer(TransportError::Timeout {
                    peer: candidate.peer,
                    after: timeout,
                }));
            }
        };

        self.verifier.verify(block, &data).map_err(|reason| {
            AttemptError::Peer(TransportError::InvalidBlock {
                peer: candidate.peer,
                reason,
            })
        })?;

        Ok(data)
    }
}
