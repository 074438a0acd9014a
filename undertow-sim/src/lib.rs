//! Undertow Simulation - Deterministic collaborators for retrieval testing
//!
//! Provides an in-memory swarm that plays all three external collaborators of
//! the retrieval layer at once: the index (file descriptors and block
//! holders), the peer transport (block requests with configurable latency,
//! failures and stalls) and local storage (files marked as present on disk).
//! Random failures come from a seeded ChaCha RNG, so the same seed yields the
//! same run.

pub mod blocks;
pub mod seed;
pub mod swarm;

pub use blocks::{SeededFile, split_into_blocks};
pub use seed::seed_directory;
pub use swarm::{PeerBehavior, SimulatedPeer, SimulatedSwarm};
