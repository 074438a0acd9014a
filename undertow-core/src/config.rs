//! Centralized configuration for Undertow.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::net::SocketAddr;
use std::time::Duration;

/// Central configuration for all Undertow components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct UndertowConfig {
    pub puller: PullerConfig,
    pub cache: CacheConfig,
    pub server: ServerConfig,
    pub simulation: SimulationConfig,
}

/// Block fetch and retry behaviour.
#[derive(Debug, Clone)]
pub struct PullerConfig {
    /// Sleep between full passes over all candidate tiers
    pub retry_backoff: Duration,
    /// Throughput floor used to scale the per-block timeout (bytes per second)
    pub min_bytes_per_second: u64,
    /// Lower bound for the per-block timeout
    pub min_block_timeout: Duration,
    /// Concurrent workers used by whole-file downloads
    pub download_workers: usize,
}

impl Default for PullerConfig {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_millis(700),
            min_bytes_per_second: 62_500, // 500 kbit/s
            min_block_timeout: Duration::from_secs(1),
            download_workers: 2,
        }
    }
}

impl PullerConfig {
    /// Time one peer is given to deliver a block of `block_size` bytes.
    ///
    /// Scales with block size so large blocks are not abandoned early, but
    /// never drops below `min_block_timeout`.
    pub fn block_timeout(&self, block_size: u32) -> Duration {
        let rate = self.min_bytes_per_second.max(1);
        let scaled = Duration::from_secs_f64(block_size as f64 / rate as f64);
        scaled.max(self.min_block_timeout)
    }
}

/// Block cache sizing.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached blocks (not bytes)
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            // 64 blocks of at most 16 MiB keeps the worst case around 1 GiB
            max_entries: 64,
        }
    }
}

/// Streaming server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    pub bind_address: SocketAddr,
    /// Optional playback throttle in bytes per second (None = unlimited)
    pub throttle_bytes_per_second: Option<u64>,
    /// Size of each chunk handed to the HTTP response body
    pub stream_chunk_size: usize,
    /// Whether `/sign` is routed (development only)
    pub expose_signing: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8384)),
            throttle_bytes_per_second: None,
            stream_chunk_size: 256 * 1024, // 256 KiB
            expose_signing: false,
        }
    }
}

/// Simulated swarm configuration for development and testing.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Deterministic seed for reproducible failure injection
    pub deterministic_seed: u64,
    /// Number of simulated peers holding every seeded file
    pub peer_count: usize,
    /// Simulated peer latency in milliseconds
    pub peer_latency_ms: u64,
    /// Probability that a single block request fails (0.0 to 1.0)
    pub failure_rate: f64,
    /// Nominal block size used when splitting seeded files
    pub block_size: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            deterministic_seed: 42,
            peer_count: 3,
            peer_latency_ms: 40,
            failure_rate: 0.05,
            block_size: 128 * 1024, // 128 KiB
        }
    }
}

impl SimulationConfig {
    /// Creates a configuration for deterministic testing.
    pub fn deterministic_testing() -> Self {
        Self {
            deterministic_seed: 42,
            peer_count: 2,
            peer_latency_ms: 0,
            failure_rate: 0.0,
            block_size: 1024,
        }
    }
}

impl UndertowConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(entries) = std::env::var("UNDERTOW_CACHE_ENTRIES")
            && let Ok(count) = entries.parse::<usize>()
            && count > 0
        {
            config.cache.max_entries = count;
        }

        if let Ok(rate) = std::env::var("UNDERTOW_THROTTLE_BPS")
            && let Ok(bytes_per_second) = rate.parse::<u64>()
        {
            config.server.throttle_bytes_per_second =
                (bytes_per_second > 0).then_some(bytes_per_second);
        }

        if let Ok(backoff) = std::env::var("UNDERTOW_RETRY_BACKOFF_MS")
            && let Ok(millis) = backoff.parse::<u64>()
        {
            config.puller.retry_backoff = Duration::from_millis(millis);
        }

        if let Ok(bind) = std::env::var("UNDERTOW_BIND")
            && let Ok(address) = bind.parse::<SocketAddr>()
        {
            config.server.bind_address = address;
        }

        if let Ok(seed) = std::env::var("UNDERTOW_SIMULATION_SEED")
            && let Ok(seed_value) = seed.parse::<u64>()
        {
            config.simulation.deterministic_seed = seed_value;
        }

        config
    }

    /// Creates a configuration optimized for testing.
    pub fn for_testing() -> Self {
        Self {
            puller: PullerConfig::default(),
            cache: CacheConfig { max_entries: 16 },
            server: ServerConfig {
                bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
                stream_chunk_size: 1024,
                expose_signing: true,
                ..Default::default()
            },
            simulation: SimulationConfig::deterministic_testing(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = UndertowConfig::default();

        assert_eq!(config.puller.retry_backoff, Duration::from_millis(700));
        assert_eq!(config.puller.download_workers, 2);
        assert_eq!(config.cache.max_entries, 64);
        assert_eq!(config.server.throttle_bytes_per_second, None);
        assert!(!config.server.expose_signing);
    }

    #[test]
    fn test_block_timeout_has_one_second_floor() {
        let config = PullerConfig::default();
        assert_eq!(config.block_timeout(1024), Duration::from_secs(1));
        assert_eq!(config.block_timeout(0), Duration::from_secs(1));
    }

    #[test]
    fn test_block_timeout_scales_with_block_size() {
        let config = PullerConfig::default();
        // 16 MiB at 62.5 kB/s
        let timeout = config.block_timeout(16 * 1024 * 1024);
        assert!(timeout > Duration::from_secs(268));
        assert!(timeout < Duration::from_secs(269));
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("UNDERTOW_CACHE_ENTRIES", "10");
            std::env::set_var("UNDERTOW_THROTTLE_BPS", "1000");
            std::env::set_var("UNDERTOW_RETRY_BACKOFF_MS", "50");
            std::env::set_var("UNDERTOW_BIND", "0.0.0.0:9000");
            std::env::set_var("UNDERTOW_SIMULATION_SEED", "7");
        }

        let config = UndertowConfig::from_env();

        assert_eq!(config.cache.max_entries, 10);
        assert_eq!(config.server.throttle_bytes_per_second, Some(1000));
        assert_eq!(config.puller.retry_backoff, Duration::from_millis(50));
        assert_eq!(config.server.bind_address.port(), 9000);
        assert_eq!(config.simulation.deterministic_seed, 7);

        unsafe {
            std::env::remove_var("UNDERTOW_CACHE_ENTRIES");
            std::env::remove_var("UNDERTOW_THROTTLE_BPS");
            std::env::remove_var("UNDERTOW_RETRY_BACKOFF_MS");
            std::env::remove_var("UNDERTOW_BIND");
            std::env::remove_var("UNDERTOW_SIMULATION_SEED");
        }
    }
}
