//! Per-operation memory of which peers delivered and which failed.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::ranking::Tier;
use crate::index::PeerId;

/// Last known outcome per peer within one retrieval operation.
///
/// Created empty with its `Puller`, updated after every attempt and dropped
/// with it. Several block fetches of the same operation may update it
/// concurrently.
#[derive(Debug, Default)]
pub struct PeerExperience {
    outcomes: Mutex<HashMap<PeerId, bool>>,
}

impl PeerExperience {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last recorded outcome for `peer`: `Some(true)` if it delivered,
    /// `Some(false)` if it failed, `None` if it was never tried.
    pub fn get(&self, peer: &PeerId) -> Option<bool> {
        self.outcomes.lock().get(peer).copied()
    }

    /// Records the outcome of the latest attempt against `peer`.
    pub fn set(&self, peer: PeerId, was_good: bool) {
        self.outcomes.lock().insert(peer, was_good);
    }

    /// Ranking tier `peer` currently belongs to.
    pub fn tier(&self, peer: &PeerId) -> Tier {
        match self.get(peer) {
            Some(true) => Tier::KnownGood,
            None => Tier::Unknown,
            Some(false) => Tier::KnownBad,
        }
    }

    /// Number of peers with any recorded outcome.
    pub fn len(&self) -> usize {
        self.outcomes.lock().len()
    }

    /// Whether no outcome has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.outcomes.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_peer_has_no_experience() {
        let experience = PeerExperience::new();
        let peer = PeerId::new([1; 32]);
        assert_eq!(experience.get(&peer), None);
        assert_eq!(experience.tier(&peer), Tier::Unknown);
        assert!(experience.is_empty());
    }

    #[test]
    fn test_latest_outcome_wins() {
        let experience = PeerExperience::new();
        let peer = PeerId::new([1; 32]);

        experience.set(peer, false);
        assert_eq!(experience.tier(&peer), Tier::KnownBad);

        experience.set(peer, true);
        assert_eq!(experience.get(&peer), Some(true));
        assert_eq!(experience.tier(&peer), Tier::KnownGood);
        assert_eq!(experience.len(), 1);
    }
}
