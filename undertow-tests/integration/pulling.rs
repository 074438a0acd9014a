//! Block retrieval against simulated peers with mixed behaviour.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use undertow_core::config::{CacheConfig, PullerConfig};
use undertow_core::{BlockCache, FileDescriptor, PullError, Puller, RangeReader};
use undertow_sim::{PeerBehavior, SimulatedPeer, SimulatedSwarm};

use crate::support::{media_folder, pattern};

fn peer(tag: u8, latency_ms: u64) -> SimulatedPeer {
    SimulatedPeer::new(tag).with_latency(Duration::from_millis(latency_ms))
}

fn seeded(swarm: &SimulatedSwarm, len: usize, block_size: u32) -> FileDescriptor {
    swarm.seed_bytes(&media_folder(), "clip.mkv", pattern(len), block_size)
}

fn puller(swarm: &Arc<SimulatedSwarm>, cache: Arc<BlockCache>) -> Puller {
    Puller::new(swarm.clone(), swarm.clone(), cache, PullerConfig::default())
}

fn fresh_cache() -> Arc<BlockCache> {
    Arc::new(BlockCache::new(&CacheConfig::default()))
}

#[tokio::test]
async fn test_corrupt_fastest_peer_is_bypassed() {
    let swarm = Arc::new(SimulatedSwarm::new(7));
    let liar = peer(1, 5).with_behavior(PeerBehavior::Corrupt);
    let honest = peer(2, 40);
    let (liar_id, honest_id) = (liar.id, honest.id);
    swarm.add_peer(liar);
    swarm.add_peer(honest);
    let file = seeded(&swarm, 1024, 256);
    let puller = puller(&swarm, fresh_cache());
    let token = CancellationToken::new();

    let block = puller.fetch_block(&file, 1, &token).await.unwrap();
    assert_eq!(block.as_ref(), &pattern(1024)[256..512]);
    assert_eq!(swarm.request_log(), vec![(liar_id, 1), (honest_id, 1)]);

    // The honest peer is now known good and goes first.
    swarm.reset_counters();
    puller.fetch_block(&file, 2, &token).await.unwrap();
    assert_eq!(swarm.request_log(), vec![(honest_id, 2)]);
    assert_eq!(puller.experience().get(&liar_id), Some(false));
    assert_eq!(puller.experience().get(&honest_id), Some(true));
}

#[tokio::test]
async fn test_disconnected_peer_is_never_asked() {
    let swarm = Arc::new(SimulatedSwarm::new(7));
    let near = peer(1, 1);
    let far = peer(2, 80);
    let (near_id, far_id) = (near.id, far.id);
    swarm.add_peer(near);
    swarm.add_peer(far);
    swarm.set_connected(&near_id, false);
    let file = seeded(&swarm, 600, 256);

    let data = puller(&swarm, fresh_cache())
        .fetch_block(&file, 0, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(data.len(), 256);
    assert_eq!(swarm.request_log(), vec![(far_id, 0)]);
}

#[tokio::test]
async fn test_partial_holders_serve_their_blocks() {
    let swarm = Arc::new(SimulatedSwarm::new(7));
    let even = peer(1, 5).holding([0, 2]);
    let odd = peer(2, 5).holding([1, 3]);
    let (even_id, odd_id) = (even.id, odd.id);
    swarm.add_peer(even);
    swarm.add_peer(odd);
    let file = seeded(&swarm, 1024, 256);
    let puller = puller(&swarm, fresh_cache());

    let mut dest = vec![0u8; 1024];
    let read = puller
        .fetch_range(&file, 0, &mut dest, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(read, 1024);
    assert_eq!(dest, pattern(1024));
    assert_eq!(
        swarm.request_log(),
        vec![(even_id, 0), (odd_id, 1), (even_id, 2), (odd_id, 3)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_retries_after_backoff_until_a_peer_recovers() {
    let swarm = Arc::new(SimulatedSwarm::new(7));
    let flaky = peer(1, 5).with_behavior(PeerBehavior::Fail);
    let flaky_id = flaky.id;
    swarm.add_peer(flaky);
    let file = seeded(&swarm, 512, 256);
    let puller = puller(&swarm, fresh_cache());

    let recovering = swarm.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        recovering.set_behavior(&flaky_id, PeerBehavior::Serve);
    });

    let started = Instant::now();
    let data = puller
        .fetch_block(&file, 0, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(data.as_ref(), &pattern(512)[..256]);
    assert_eq!(swarm.block_requests(), 2);
    assert!(started.elapsed() >= PullerConfig::default().retry_backoff);
}

#[tokio::test(start_paused = true)]
async fn test_peers_failing_in_a_pass_wait_for_the_next_pass() {
    let swarm = Arc::new(SimulatedSwarm::new(7));
    let near = peer(1, 5).with_behavior(PeerBehavior::Fail);
    let far = peer(2, 40).with_behavior(PeerBehavior::Fail);
    let (near_id, far_id) = (near.id, far.id);
    swarm.add_peer(near);
    swarm.add_peer(far);
    let file = seeded(&swarm, 512, 256);
    let puller = puller(&swarm, fresh_cache());

    let recovering = swarm.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        recovering.set_behavior(&near_id, PeerBehavior::Serve);
    });

    let started = Instant::now();
    puller
        .fetch_block(&file, 0, &CancellationToken::new())
        .await
        .unwrap();

    // Both fail as unknown peers; neither is asked again as known-bad until
    // the back-off has passed.
    assert_eq!(
        swarm.request_log(),
        vec![(near_id, 0), (far_id, 0), (near_id, 0)]
    );
    assert!(started.elapsed() >= PullerConfig::default().retry_backoff);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_a_stalled_fetch() {
    let swarm = Arc::new(SimulatedSwarm::new(7));
    swarm.add_peer(peer(1, 5).with_behavior(PeerBehavior::Stall));
    let file = seeded(&swarm, 512, 256);
    let puller = puller(&swarm, fresh_cache());

    let token = CancellationToken::new();
    let deadline = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        deadline.cancel();
    });

    let started = Instant::now();
    let result = puller.fetch_block(&file, 0, &token).await;

    assert!(matches!(result, Err(PullError::Cancelled)));
    assert!(started.elapsed() < PullerConfig::default().min_block_timeout);
    assert!(puller.experience().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_peer_times_out_to_next_candidate() {
    let swarm = Arc::new(SimulatedSwarm::new(7));
    swarm.add_peer(peer(1, 5).with_behavior(PeerBehavior::Stall));
    swarm.add_peer(peer(2, 50));
    let file = seeded(&swarm, 512, 256);
    let puller = puller(&swarm, fresh_cache());

    let started = Instant::now();
    let data = puller
        .fetch_block(&file, 1, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(data.as_ref(), &pattern(512)[256..]);
    assert!(started.elapsed() >= PullerConfig::default().min_block_timeout);
    assert_eq!(swarm.block_requests(), 2);
}

#[tokio::test]
async fn test_cache_is_shared_between_operations() {
    let swarm = Arc::new(SimulatedSwarm::new(7));
    swarm.add_peer(peer(1, 5));
    let file = seeded(&swarm, 1024, 256);
    let cache = fresh_cache();
    let token = CancellationToken::new();

    puller(&swarm, cache.clone())
        .fetch_block(&file, 3, &token)
        .await
        .unwrap();
    assert_eq!(swarm.block_requests(), 1);

    let again = puller(&swarm, cache.clone())
        .fetch_block(&file, 3, &token)
        .await
        .unwrap();
    assert_eq!(again.as_ref(), &pattern(1024)[768..]);
    assert_eq!(swarm.block_requests(), 1);
    assert_eq!(cache.statistics().hit_count, 1);
}

#[tokio::test]
async fn test_range_reader_over_the_swarm() {
    let swarm = Arc::new(SimulatedSwarm::new(7));
    swarm.add_peer(peer(1, 5));
    let file = Arc::new(seeded(&swarm, 2000, 256));
    let content = pattern(2000);

    let mut reader = RangeReader::new(
        Arc::new(puller(&swarm, fresh_cache())),
        swarm.clone(),
        file,
        CancellationToken::new(),
    );

    let chunk = reader.read_chunk(300, 700).await.unwrap();
    assert_eq!(chunk.as_ref(), &content[300..1000]);

    reader.seek(std::io::SeekFrom::End(-10)).unwrap();
    let mut tail = [0u8; 64];
    let read = reader.read(&mut tail).await.unwrap();
    assert_eq!(&tail[..read], &content[1990..]);
    assert_eq!(reader.position(), 2000);
}
