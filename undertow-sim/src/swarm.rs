//! In-memory swarm acting as index, peer transport and local storage.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};
use undertow_core::config::SimulationConfig;
use undertow_core::{
    BlockRequest, FileDescriptor, FolderId, IndexError, IndexService, LocalStorage,
    PeerCandidate, PeerId, PeerTransport, StorageError, TransportError,
};

use crate::blocks::{SeededFile, split_into_blocks};

/// How a simulated peer answers block requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerBehavior {
    /// Returns the requested block
    Serve,
    /// Answers every request with an error
    Fail,
    /// Never answers
    Stall,
    /// Returns the block with its first byte flipped
    Corrupt,
}

/// One remote device in the swarm.
#[derive(Debug, Clone)]
pub struct SimulatedPeer {
    pub id: PeerId,
    /// Latency the index reports; also delays answers when latency is simulated
    pub latency: Option<Duration>,
    pub connected: bool,
    /// Probability in `[0, 1]` that a served request fails instead
    pub failure_rate: f64,
    pub behavior: PeerBehavior,
    /// Advertised as holding blocks in a temporary copy
    pub holds_temporary: bool,
    /// Block indices held, `None` meaning every block of every file
    pub holds_blocks: Option<HashSet<usize>>,
}

impl SimulatedPeer {
    /// Connected, reliable peer whose identity is `tag` repeated.
    pub fn new(tag: u8) -> Self {
        Self {
            id: PeerId::new([tag; 32]),
            latency: None,
            connected: true,
            failure_rate: 0.0,
            behavior: PeerBehavior::Serve,
            holds_temporary: false,
            holds_blocks: None,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_behavior(mut self, behavior: PeerBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_failure_rate(mut self, failure_rate: f64) -> Self {
        self.failure_rate = failure_rate;
        self
    }

    pub fn disconnected(mut self) -> Self {
        self.connected = false;
        self
    }

    pub fn temporary(mut self) -> Self {
        self.holds_temporary = true;
        self
    }

    /// Restricts the peer to the given block indices.
    pub fn holding(mut self, blocks: impl IntoIterator<Item = usize>) -> Self {
        self.holds_blocks = Some(blocks.into_iter().collect());
        self
    }

    fn holds(&self, block_index: usize) -> bool {
        self.holds_blocks
            .as_ref()
            .is_none_or(|blocks| blocks.contains(&block_index))
    }
}

type FileKey = (FolderId, String);

/// Deterministic swarm of peers sharing a set of seeded files.
///
/// Counters record every transport request and local read so tests can
/// assert that a path was served without touching the network.
pub struct SimulatedSwarm {
    files: RwLock<HashMap<FileKey, SeededFile>>,
    peers: RwLock<Vec<SimulatedPeer>>,
    local_files: RwLock<HashSet<FileKey>>,
    rng: Mutex<ChaCha8Rng>,
    simulate_latency: bool,
    block_requests: AtomicUsize,
    local_reads: AtomicUsize,
    request_log: Mutex<Vec<(PeerId, usize)>>,
}

impl SimulatedSwarm {
    /// Empty swarm with a seeded RNG and no simulated delays.
    pub fn new(seed: u64) -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            peers: RwLock::new(Vec::new()),
            local_files: RwLock::new(HashSet::new()),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            simulate_latency: false,
            block_requests: AtomicUsize::new(0),
            local_reads: AtomicUsize::new(0),
            request_log: Mutex::new(Vec::new()),
        }
    }

    /// Swarm with `peer_count` identical peers as described by `config`.
    ///
    /// Peers answer after their latency, so use paused time in tests that
    /// build a swarm with non-zero latency.
    pub fn from_config(config: &SimulationConfig) -> Self {
        let mut swarm = Self::new(config.deterministic_seed);
        swarm.simulate_latency = config.peer_latency_ms > 0;
        for tag in 0..config.peer_count {
            let peer = SimulatedPeer::new(tag as u8 + 1)
                .with_latency(Duration::from_millis(config.peer_latency_ms))
                .with_failure_rate(config.failure_rate);
            swarm.add_peer(peer);
        }
        swarm
    }

    /// Makes answers wait for each peer's latency.
    pub fn with_simulated_latency(mut self) -> Self {
        self.simulate_latency = true;
        self
    }

    /// Publishes a file to the index and to every peer.
    pub fn add_file(&self, file: SeededFile) -> FileDescriptor {
        let descriptor = file.descriptor.clone();
        debug!(
            "Seeding {}/{} ({} bytes, {} blocks)",
            descriptor.folder,
            descriptor.path,
            descriptor.size,
            descriptor.block_count()
        );
        self.files.write().insert(
            (descriptor.folder.clone(), descriptor.path.clone()),
            file,
        );
        descriptor
    }

    /// Splits `content` into blocks and publishes it.
    pub fn seed_bytes(
        &self,
        folder: &FolderId,
        path: &str,
        content: impl Into<Bytes>,
        block_size: u32,
    ) -> FileDescriptor {
        self.add_file(split_into_blocks(
            folder.clone(),
            path,
            content.into(),
            block_size,
        ))
    }

    pub fn add_peer(&self, peer: SimulatedPeer) {
        self.peers.write().push(peer);
    }

    pub fn set_connected(&self, peer: &PeerId, connected: bool) {
        self.update_peer(peer, |p| p.connected = connected);
    }

    pub fn set_behavior(&self, peer: &PeerId, behavior: PeerBehavior) {
        self.update_peer(peer, |p| p.behavior = behavior);
    }

    /// Marks a seeded file as fully present in local storage.
    pub fn mark_local(&self, folder: &FolderId, path: &str) {
        self.local_files
            .write()
            .insert((folder.clone(), path.to_string()));
    }

    /// Descriptors of every seeded file.
    pub fn files(&self) -> Vec<FileDescriptor> {
        let mut files: Vec<_> = self
            .files
            .read()
            .values()
            .map(|file| file.descriptor.clone())
            .collect();
        files.sort_by(|a, b| (a.folder.as_str(), &a.path).cmp(&(b.folder.as_str(), &b.path)));
        files
    }

    /// Content of a seeded file.
    pub fn content(&self, folder: &FolderId, path: &str) -> Option<Bytes> {
        self.files
            .read()
            .get(&(folder.clone(), path.to_string()))
            .map(|file| file.content.clone())
    }

    /// Transport requests issued so far.
    pub fn block_requests(&self) -> usize {
        self.block_requests.load(Ordering::SeqCst)
    }

    /// Local storage reads issued so far.
    pub fn local_reads(&self) -> usize {
        self.local_reads.load(Ordering::SeqCst)
    }

    /// Every transport request as `(peer, block index)`, in arrival order.
    pub fn request_log(&self) -> Vec<(PeerId, usize)> {
        self.request_log.lock().clone()
    }

    pub fn reset_counters(&self) {
        self.block_requests.store(0, Ordering::SeqCst);
        self.local_reads.store(0, Ordering::SeqCst);
        self.request_log.lock().clear();
    }

    fn update_peer(&self, peer: &PeerId, update: impl FnOnce(&mut SimulatedPeer)) {
        if let Some(found) = self.peers.write().iter_mut().find(|p| &p.id == peer) {
            update(found);
        }
    }

    fn peer(&self, peer: &PeerId) -> Option<SimulatedPeer> {
        self.peers.read().iter().find(|p| &p.id == peer).cloned()
    }

    fn roll_failure(&self, failure_rate: f64) -> bool {
        failure_rate > 0.0 && self.rng.lock().random_bool(failure_rate.min(1.0))
    }
}

#[async_trait]
impl IndexService for SimulatedSwarm {
    async fn resolve_file(
        &self,
        folder: &FolderId,
        path: &str,
    ) -> Result<FileDescriptor, IndexError> {
        self.files
            .read()
            .get(&(folder.clone(), path.to_string()))
            .map(|file| file.descriptor.clone())
            .ok_or_else(|| IndexError::FileNotFound {
                folder: folder.clone(),
                path: path.to_string(),
            })
    }

    async fn peers_holding(
        &self,
        file: &FileDescriptor,
        block_index: usize,
    ) -> Result<Vec<PeerCandidate>, IndexError> {
        if !self
            .files
            .read()
            .contains_key(&(file.folder.clone(), file.path.clone()))
        {
            return Ok(Vec::new());
        }

        Ok(self
            .peers
            .read()
            .iter()
            .filter(|peer| peer.holds(block_index))
            .map(|peer| PeerCandidate {
                peer: peer.id,
                latency: peer.latency,
                from_temporary: peer.holds_temporary,
            })
            .collect())
    }

    fn is_peer_connected(&self, peer: &PeerId) -> bool {
        self.peer(peer).is_some_and(|p| p.connected)
    }

    fn latency_to(&self, peer: &PeerId) -> Option<Duration> {
        self.peer(peer).and_then(|p| p.latency)
    }
}

#[async_trait]
impl PeerTransport for SimulatedSwarm {
    async fn request_block(
        &self,
        request: BlockRequest<'_>,
        _timeout: Duration,
    ) -> Result<Bytes, TransportError> {
        self.block_requests.fetch_add(1, Ordering::SeqCst);
        self.request_log
            .lock()
            .push((*request.peer, request.block_index));
        trace!(
            "Simulated request for block {} of {} to {}",
            request.block_index, request.path, request.peer
        );

        let peer = match self.peer(request.peer) {
            Some(peer) if peer.connected => peer,
            _ => {
                return Err(TransportError::NotConnected {
                    peer: *request.peer,
                });
            }
        };

        if self.simulate_latency
            && let Some(latency) = peer.latency
        {
            tokio::time::sleep(latency).await;
        }

        let remote_error = |reason: &str| TransportError::Remote {
            peer: peer.id,
            reason: reason.to_string(),
        };

        match peer.behavior {
            PeerBehavior::Fail => return Err(remote_error("simulated refusal")),
            PeerBehavior::Stall => std::future::pending::<()>().await,
            PeerBehavior::Serve | PeerBehavior::Corrupt => {}
        }

        if !peer.holds(request.block_index) {
            return Err(remote_error("block not held"));
        }
        if self.roll_failure(peer.failure_rate) {
            return Err(remote_error("simulated failure"));
        }

        let data = self
            .files
            .read()
            .get(&(request.folder.clone(), request.path.to_string()))
            .and_then(|file| file.block_data(request.block_index))
            .ok_or_else(|| remote_error("no such block"))?;

        if peer.behavior == PeerBehavior::Corrupt && !data.is_empty() {
            let mut corrupted = BytesMut::from(data.as_ref());
            corrupted[0] ^= 0xff;
            return Ok(corrupted.freeze());
        }

        Ok(data)
    }
}

#[async_trait]
impl LocalStorage for SimulatedSwarm {
    async fn read_local(
        &self,
        folder: &FolderId,
        path: &str,
        offset: u64,
        length: usize,
    ) -> Result<Option<Bytes>, StorageError> {
        self.local_reads.fetch_add(1, Ordering::SeqCst);

        let key = (folder.clone(), path.to_string());
        if !self.local_files.read().contains(&key) {
            return Ok(None);
        }

        let start = offset as usize;
        Ok(self.files.read().get(&key).and_then(|file| {
            let end = start.checked_add(length)?;
            (end <= file.content.len()).then(|| file.content.slice(start..end))
        }))
    }
}

#[cfg(test)]
mod tests {
    use undertow_core::BlockInfo;

    use super::*;

    fn folder() -> FolderId {
        FolderId::new("default")
    }

    fn swarm_with_file() -> (SimulatedSwarm, FileDescriptor) {
        let swarm = SimulatedSwarm::new(42);
        let content: Vec<u8> = (0..250u32).map(|i| i as u8).collect();
        let file = swarm.seed_bytes(&folder(), "clip.mp4", content, 100);
        (swarm, file)
    }

    fn request<'a>(peer: &'a PeerId, file: &'a FileDescriptor, block_index: usize) -> BlockRequest<'a> {
        BlockRequest {
            peer,
            folder: &file.folder,
            path: &file.path,
            block_index,
            block: &file.blocks[block_index],
            from_temporary: false,
        }
    }

    #[tokio::test]
    async fn test_unknown_file_is_not_found() {
        let (swarm, _) = swarm_with_file();
        let result = swarm.resolve_file(&folder(), "missing.mp4").await;
        assert!(matches!(result, Err(IndexError::FileNotFound { .. })));
    }

    #[tokio::test]
    async fn test_peers_holding_reports_flags() {
        let (swarm, file) = swarm_with_file();
        swarm.add_peer(SimulatedPeer::new(1).with_latency(Duration::from_millis(30)));
        swarm.add_peer(SimulatedPeer::new(2).temporary().holding([0, 1]));

        let holders = swarm.peers_holding(&file, 2).await.unwrap();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].latency, Some(Duration::from_millis(30)));

        let holders = swarm.peers_holding(&file, 0).await.unwrap();
        assert_eq!(holders.len(), 2);
        assert!(holders[1].from_temporary);
    }

    #[tokio::test]
    async fn test_serves_requested_block() {
        let (swarm, file) = swarm_with_file();
        swarm.add_peer(SimulatedPeer::new(1));
        let peer = PeerId::new([1; 32]);

        let data = swarm
            .request_block(request(&peer, &file, 2), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(data.as_ref(), &(200..250u32).map(|i| i as u8).collect::<Vec<_>>()[..]);
        assert_eq!(swarm.block_requests(), 1);
        assert_eq!(swarm.request_log(), vec![(peer, 2)]);
    }

    #[tokio::test]
    async fn test_disconnected_peer_refuses() {
        let (swarm, file) = swarm_with_file();
        swarm.add_peer(SimulatedPeer::new(1).disconnected());
        let peer = PeerId::new([1; 32]);

        assert!(!swarm.is_peer_connected(&peer));
        let result = swarm
            .request_block(request(&peer, &file, 0), Duration::from_secs(1))
            .await;
        assert_eq!(result, Err(TransportError::NotConnected { peer }));

        swarm.set_connected(&peer, true);
        assert!(swarm.is_peer_connected(&peer));
    }

    #[tokio::test]
    async fn test_corrupt_peer_flips_first_byte() {
        let (swarm, file) = swarm_with_file();
        swarm.add_peer(SimulatedPeer::new(1).with_behavior(PeerBehavior::Corrupt));
        let peer = PeerId::new([1; 32]);

        let data = swarm
            .request_block(request(&peer, &file, 1), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(data[0], 100 ^ 0xff);
        assert_eq!(data[1], 101);
    }

    #[tokio::test]
    async fn test_local_reads_only_for_marked_files() {
        let (swarm, file) = swarm_with_file();

        let missing = swarm.read_local(&file.folder, &file.path, 10, 20).await.unwrap();
        assert!(missing.is_none());

        swarm.mark_local(&file.folder, &file.path);
        let present = swarm.read_local(&file.folder, &file.path, 10, 20).await.unwrap();
        assert_eq!(present.unwrap().as_ref(), &(10..30u32).map(|i| i as u8).collect::<Vec<_>>()[..]);

        let past_end = swarm.read_local(&file.folder, &file.path, 240, 20).await.unwrap();
        assert!(past_end.is_none());
        assert_eq!(swarm.local_reads(), 3);
    }

    #[tokio::test]
    async fn test_same_seed_same_failures() {
        async fn outcomes(seed: u64) -> Vec<bool> {
            let config = SimulationConfig {
                deterministic_seed: seed,
                peer_count: 1,
                peer_latency_ms: 0,
                failure_rate: 0.5,
                block_size: 100,
            };
            let swarm = SimulatedSwarm::from_config(&config);
            let file = swarm.seed_bytes(&folder(), "a.bin", vec![3u8; 100], 100);
            let peer = PeerId::new([1; 32]);
            let mut results = Vec::new();
            for _ in 0..32 {
                let result = swarm
                    .request_block(request(&peer, &file, 0), Duration::from_secs(1))
                    .await;
                results.push(result.is_ok());
            }
            results
        }

        let first = outcomes(7).await;
        assert_eq!(first, outcomes(7).await);
        assert!(first.contains(&true) && first.contains(&false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_latency_delays_answers() {
        let swarm = SimulatedSwarm::new(1).with_simulated_latency();
        let file = swarm.seed_bytes(&folder(), "a.bin", vec![1u8; 10], 10);
        swarm.add_peer(SimulatedPeer::new(1).with_latency(Duration::from_millis(80)));
        let peer = PeerId::new([1; 32]);
        let started = tokio::time::Instant::now();

        swarm
            .request_block(request(&peer, &file, 0), Duration::from_secs(1))
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn test_block_info_matches_content() {
        let (swarm, file) = swarm_with_file();
        let BlockInfo { offset, size, .. } = file.blocks[1].clone();
        let content = swarm.content(&folder(), "clip.mp4").unwrap();
        assert_eq!(content.len(), 250);
        assert_eq!((offset, size), (100, 100));
    }
}
