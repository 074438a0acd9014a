//! Whole-file downloads through the parallel downloader.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use undertow_core::config::{CacheConfig, PullerConfig, SimulationConfig};
use undertow_core::{BlockCache, ParallelDownloader, PullError, Puller};
use undertow_sim::{PeerBehavior, SimulatedPeer, SimulatedSwarm};

use crate::support::{media_folder, pattern};

fn downloader(swarm: &Arc<SimulatedSwarm>, workers: usize) -> ParallelDownloader {
    let puller = Puller::new(
        swarm.clone(),
        swarm.clone(),
        Arc::new(BlockCache::new(&CacheConfig::default())),
        PullerConfig::default(),
    );
    ParallelDownloader::new(Arc::new(puller)).with_workers(workers)
}

#[tokio::test(start_paused = true)]
async fn test_download_survives_flaky_swarm() {
    let swarm = Arc::new(SimulatedSwarm::from_config(&SimulationConfig {
        deterministic_seed: 11,
        peer_count: 3,
        peer_latency_ms: 20,
        failure_rate: 0.3,
        block_size: 300,
    }));
    let file = swarm.seed_bytes(&media_folder(), "show.mkv", pattern(10_000), 300);

    let mut output = Vec::new();
    let written = downloader(&swarm, 4)
        .download_into(Arc::new(file), &mut output, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(written, 10_000);
    assert_eq!(output, pattern(10_000));
    assert!(swarm.block_requests() >= 34);
}

#[tokio::test]
async fn test_save_to_path_writes_destination() {
    let swarm = Arc::new(SimulatedSwarm::new(3));
    swarm.add_peer(SimulatedPeer::new(1));
    let file = swarm.seed_bytes(&media_folder(), "show.mkv", pattern(5000), 512);

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("show.mkv");
    let written = downloader(&swarm, 3)
        .save_to_path(Arc::new(file), &destination, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(written, 5000);
    assert_eq!(std::fs::read(&destination).unwrap(), pattern(5000));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_missing_block_leaves_no_file_behind() {
    let swarm = Arc::new(SimulatedSwarm::new(3));
    swarm.add_peer(SimulatedPeer::new(1).holding([0, 1, 2, 4, 5]));
    let file = swarm.seed_bytes(&media_folder(), "show.mkv", pattern(600), 100);

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("show.mkv");
    let result = downloader(&swarm, 2)
        .save_to_path(Arc::new(file), &destination, &CancellationToken::new())
        .await;

    assert!(matches!(
        result,
        Err(PullError::NoPeerAvailable { block_index: 3, .. })
    ));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_cancels_stalled_download() {
    let swarm = Arc::new(SimulatedSwarm::new(3));
    swarm.add_peer(SimulatedPeer::new(1).with_behavior(PeerBehavior::Stall));
    let file = swarm.seed_bytes(&media_folder(), "show.mkv", pattern(2048), 256);

    let token = CancellationToken::new();
    let deadline = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        deadline.cancel();
    });

    let mut output = Vec::new();
    let result = downloader(&swarm, 2)
        .download_into(Arc::new(file), &mut output, &token)
        .await;

    assert!(matches!(result, Err(PullError::Cancelled)));
    assert!(output.is_empty());
}
