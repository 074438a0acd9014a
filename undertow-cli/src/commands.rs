//! CLI command implementations

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use undertow_core::config::UndertowConfig;
use undertow_core::storage::FolderStorage;
use undertow_core::{
    BlockCache, FolderId, IndexService, LocalStorage, ParallelDownloader, Puller, UndertowError,
};
use undertow_sim::{SimulatedSwarm, seed_directory};
use undertow_web::{AppState, run_server};

/// Options describing the simulated swarm both commands run against.
#[derive(Args, Debug)]
pub struct SwarmArgs {
    /// Directory whose files are published to the simulated swarm
    #[arg(long)]
    pub media_dir: PathBuf,

    /// Folder id the files are published under
    #[arg(long, default_value = "default")]
    pub folder: String,

    /// Number of simulated peers
    #[arg(long)]
    pub peers: Option<usize>,

    /// Probability that a simulated block request fails
    #[arg(long)]
    pub failure_rate: Option<f64>,

    /// Simulated peer latency in milliseconds
    #[arg(long)]
    pub latency_ms: Option<u64>,

    /// Block size used when splitting seeded files
    #[arg(long)]
    pub block_size: Option<u32>,

    /// Seed for simulated failures
    #[arg(long)]
    pub seed: Option<u64>,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the streaming server
    Serve {
        #[command(flatten)]
        swarm: SwarmArgs,

        /// Address to listen on
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Maximum streaming rate in bytes per second
        #[arg(long)]
        throttle: Option<u64>,

        /// Route /sign for issuing URLs over HTTP
        #[arg(long)]
        expose_signing: bool,

        /// Serve files present in the media directory without the swarm
        #[arg(long)]
        local: bool,

        /// Block cache capacity in entries
        #[arg(long)]
        cache_entries: Option<usize>,
    },
    /// Download one file to disk through the swarm
    Download {
        #[command(flatten)]
        swarm: SwarmArgs,

        /// Folder-relative path of the file
        path: String,

        /// Destination file
        #[arg(short, long)]
        output: PathBuf,

        /// Concurrent block workers
        #[arg(long)]
        workers: Option<usize>,

        /// Give up after this many seconds
        #[arg(long)]
        deadline: Option<u64>,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Serve {
            swarm,
            bind,
            throttle,
            expose_signing,
            local,
            cache_entries,
        } => {
            let mut config = UndertowConfig::from_env();
            if let Some(bind) = bind {
                config.server.bind_address = bind;
            }
            if throttle.is_some() {
                config.server.throttle_bytes_per_second = throttle.filter(|rate| *rate > 0);
            }
            if let Some(entries) = cache_entries {
                config.cache.max_entries = entries.max(1);
            }
            config.server.expose_signing |= expose_signing;
            serve(swarm, config, local).await
        }
        Commands::Download {
            swarm,
            path,
            output,
            workers,
            deadline,
        } => {
            let mut config = UndertowConfig::from_env();
            if let Some(workers) = workers {
                config.puller.download_workers = workers.max(1);
            }
            download(swarm, config, path, output, deadline.map(Duration::from_secs)).await
        }
    }
}

async fn build_swarm(
    args: &SwarmArgs,
    config: &mut UndertowConfig,
) -> anyhow::Result<Arc<SimulatedSwarm>> {
    let simulation = &mut config.simulation;
    if let Some(peers) = args.peers {
        simulation.peer_count = peers;
    }
    if let Some(failure_rate) = args.failure_rate {
        simulation.failure_rate = failure_rate.clamp(0.0, 1.0);
    }
    if let Some(latency_ms) = args.latency_ms {
        simulation.peer_latency_ms = latency_ms;
    }
    if let Some(block_size) = args.block_size {
        simulation.block_size = block_size.max(1);
    }
    if let Some(seed) = args.seed {
        simulation.deterministic_seed = seed;
    }

    let swarm = Arc::new(SimulatedSwarm::from_config(simulation));
    let folder = FolderId::new(args.folder.clone());
    let files = seed_directory(&swarm, &folder, &args.media_dir, simulation.block_size)
        .await
        .with_context(|| format!("Failed to seed {}", args.media_dir.display()))?;

    if files.is_empty() {
        warn!("No files found in {}", args.media_dir.display());
    }
    info!(
        "Simulated swarm: {} peers, {} ms latency, {:.1}% failure rate",
        simulation.peer_count,
        simulation.peer_latency_ms,
        simulation.failure_rate * 100.0
    );

    Ok(swarm)
}

/// Runs the streaming server until Ctrl-C.
async fn serve(args: SwarmArgs, mut config: UndertowConfig, local: bool) -> anyhow::Result<()> {
    let swarm = build_swarm(&args, &mut config).await?;
    let folder = FolderId::new(args.folder.clone());

    let local_storage: Arc<dyn LocalStorage> = if local {
        Arc::new(FolderStorage::new().with_folder(folder.clone(), args.media_dir.clone()))
    } else {
        swarm.clone()
    };

    let bind_address = config.server.bind_address;
    let state = AppState::new(swarm.clone(), swarm.clone(), local_storage, config);

    for file in swarm.files() {
        let url = state.signer.issue_url(&file.folder, &file.path);
        info!("{} ({} bytes): http://{}{}", file.path, file.size, bind_address, url);
    }

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
            on_signal.cancel();
        }
    });

    run_server(state, shutdown)
        .await
        .with_context(|| format!("Streaming server on {bind_address} failed"))
}

/// Downloads one seeded file, honoring an optional deadline and Ctrl-C.
async fn download(
    args: SwarmArgs,
    mut config: UndertowConfig,
    path: String,
    output: PathBuf,
    deadline: Option<Duration>,
) -> anyhow::Result<()> {
    let swarm = build_swarm(&args, &mut config).await?;
    let folder = FolderId::new(args.folder.clone());

    let file = match swarm.resolve_file(&folder, &path).await {
        Ok(file) => file,
        Err(e) => anyhow::bail!(UndertowError::from(e).user_message()),
    };

    let token = CancellationToken::new();
    if let Some(deadline) = deadline {
        let expired = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            warn!("Deadline of {:?} reached, cancelling download", deadline);
            expired.cancel();
        });
    }
    let interrupted = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupted.cancel();
        }
    });

    let puller = Puller::new(
        swarm.clone(),
        swarm.clone(),
        Arc::new(BlockCache::new(&config.cache)),
        config.puller.clone(),
    );
    let downloader = ParallelDownloader::new(Arc::new(puller));

    println!(
        "Downloading {} ({} bytes, {} blocks) with {} workers...",
        file.path,
        file.size,
        file.block_count(),
        downloader.workers()
    );

    match downloader.save_to_path(Arc::new(file), &output, &token).await {
        Ok(written) => {
            println!("✓ Saved {} bytes to {}", written, output.display());
            Ok(())
        }
        Err(e) => {
            let e = UndertowError::from(e);
            error!("Download failed: {}", e);
            anyhow::bail!(e.user_message())
        }
    }
}
