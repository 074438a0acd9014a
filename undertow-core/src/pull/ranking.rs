//! Candidate ordering: latency first, then experience tier.

use std::cmp::Ordering;
use std::time::Duration;

use crate::index::PeerCandidate;

/// Experience buckets consulted in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    /// Last attempt against this peer succeeded
    KnownGood,
    /// Peer not tried yet in this operation
    Unknown,
    /// Last attempt against this peer failed
    KnownBad,
}

impl Tier {
    /// Tiers in the order a fetch walks them.
    pub const ORDER: [Tier; 3] = [Tier::KnownGood, Tier::Unknown, Tier::KnownBad];
}

/// Total order on optional latencies: any known latency sorts before an
/// unknown one, and two unknown latencies are equal.
pub fn compare_latency(a: Option<Duration>, b: Option<Duration>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Sorts candidates by ascending latency, keeping the index's order for ties.
pub fn sort_by_latency(candidates: &mut [PeerCandidate]) {
    candidates.sort_by(|a, b| compare_latency(a.latency, b.latency));
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::index::PeerId;

    fn candidate(tag: u8, latency_ms: Option<u64>) -> PeerCandidate {
        PeerCandidate {
            peer: PeerId::new([tag; 32]),
            latency: latency_ms.map(Duration::from_millis),
            from_temporary: false,
        }
    }

    fn tags(candidates: &[PeerCandidate]) -> Vec<u8> {
        candidates.iter().map(|c| c.peer.as_bytes()[0]).collect()
    }

    #[test]
    fn test_unknown_latency_sorts_last() {
        let mut candidates = vec![
            candidate(1, None),
            candidate(2, Some(80)),
            candidate(3, None),
            candidate(4, Some(10)),
        ];
        sort_by_latency(&mut candidates);
        assert_eq!(tags(&candidates), vec![4, 2, 1, 3]);
    }

    #[test]
    fn test_equal_latency_keeps_order() {
        let mut candidates = vec![
            candidate(5, Some(20)),
            candidate(6, Some(20)),
            candidate(7, Some(20)),
        ];
        sort_by_latency(&mut candidates);
        assert_eq!(tags(&candidates), vec![5, 6, 7]);
    }

    #[test]
    fn test_nan_latency_reports_are_unknown() {
        let mut candidates = vec![
            PeerCandidate::with_latency_secs(PeerId::new([1; 32]), f64::NAN, false),
            PeerCandidate::with_latency_secs(PeerId::new([2; 32]), f64::NAN, false),
            PeerCandidate::with_latency_secs(PeerId::new([3; 32]), 0.5, false),
        ];
        sort_by_latency(&mut candidates);
        assert_eq!(tags(&candidates), vec![3, 1, 2]);
    }

    #[test]
    fn test_tier_order() {
        assert_eq!(
            Tier::ORDER,
            [Tier::KnownGood, Tier::Unknown, Tier::KnownBad]
        );
        assert!(Tier::KnownGood < Tier::KnownBad);
    }

    proptest! {
        #[test]
        fn sorted_latencies_are_monotonic(latencies in prop::collection::vec(prop::option::of(0u64..500), 0..20)) {
            let mut candidates: Vec<_> = latencies
                .iter()
                .enumerate()
                .map(|(i, latency)| candidate(i as u8, *latency))
                .collect();
            sort_by_latency(&mut candidates);

            for pair in candidates.windows(2) {
                prop_assert_ne!(compare_latency(pair[0].latency, pair[1].latency), Ordering::Greater);
            }
        }
    }
}
