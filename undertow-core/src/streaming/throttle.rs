//! Playback pacing for streamed responses.

use std::time::Duration;

use tokio::time::Instant;

/// Paces chunk delivery to a maximum throughput.
///
/// After each chunk the caller reports its size; if the chunk arrived faster
/// than `size / rate` allows, `pace` sleeps the difference. A slow chunk is
/// never compensated by a faster one later, so the rate is an upper bound,
/// not an average target.
#[derive(Debug, Clone)]
pub struct PlaybackThrottle {
    bytes_per_second: u64,
    chunk_started: Instant,
}

impl PlaybackThrottle {
    /// Creates a throttle starting its first chunk now.
    ///
    /// Returns `None` for a rate of zero, meaning unthrottled.
    pub fn new(bytes_per_second: u64) -> Option<Self> {
        (bytes_per_second > 0).then(|| Self {
            bytes_per_second,
            chunk_started: Instant::now(),
        })
    }

    /// Builds a throttle from an optional configured rate.
    pub fn from_config(bytes_per_second: Option<u64>) -> Option<Self> {
        bytes_per_second.and_then(Self::new)
    }

    pub fn bytes_per_second(&self) -> u64 {
        self.bytes_per_second
    }

    /// Time `bytes` should take at the configured rate.
    pub fn target_duration(&self, bytes: usize) -> Duration {
        Duration::from_secs_f64(bytes as f64 / self.bytes_per_second as f64)
    }

    /// Sleeps until a chunk of `bytes` has taken at least its target duration,
    /// then starts timing the next chunk.
    pub async fn pace(&mut self, bytes: usize) {
        let target = self.target_duration(bytes);
        let elapsed = self.chunk_started.elapsed();
        if let Some(remaining) = target.checked_sub(elapsed)
            && !remaining.is_zero()
        {
            tokio::time::sleep(remaining).await;
        }
        self.chunk_started = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_rate_is_unthrottled() {
        assert!(PlaybackThrottle::new(0).is_none());
        assert!(PlaybackThrottle::from_config(None).is_none());
        assert!(PlaybackThrottle::from_config(Some(0)).is_none());
    }

    #[test]
    fn test_target_duration() {
        let throttle = PlaybackThrottle::new(1000).unwrap();
        assert_eq!(throttle.target_duration(500), Duration::from_millis(500));
        assert_eq!(throttle.target_duration(0), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_chunk_sleeps_the_difference() {
        let mut throttle = PlaybackThrottle::new(1000).unwrap();
        tokio::time::advance(Duration::from_millis(200)).await;
        let before = Instant::now();

        throttle.pace(500).await;

        assert_eq!(before.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_chunk_does_not_sleep() {
        let mut throttle = PlaybackThrottle::new(1000).unwrap();
        tokio::time::advance(Duration::from_millis(800)).await;
        let before = Instant::now();

        throttle.pace(500).await;

        assert_eq!(before.elapsed(), Duration::ZERO);
    }
}
