//! Buffer retention policies consulted by [`super::playback::PlaybackController`] (§4.8).
//!
//! Class-hierarchy strategies in the source become named, independently
//! testable implementations of one capability interface (§9).

use std::time::Duration;

/// A currently-buffered slice, as tracked by the controller.
#[derive(Debug, Clone, Copy)]
pub struct BufferEntry {
    pub sequence: u32,
    pub age: Duration,
}

/// Capability interface for slice buffer retention decisions.
pub trait BufferStrategy: Send + Sync {
    /// TTL to apply to a freshly-loaded slice.
    fn on_slice_loaded(&self, sequence: u32) -> Duration;
    /// Whether to keep a slice cached while it is the one playing.
    fn on_slice_playing(&self, sequence: u32) -> bool;
    /// Whether to evict a slice immediately once it finishes playing.
    fn on_slice_finished(&self, sequence: u32) -> bool;
    /// Whether `entry` should be evicted given the current play position.
    fn should_cleanup(&self, entry: &BufferEntry, current_index: u32) -> bool;
    /// Indices to drop from the buffer after a seek to `target`.
    fn on_seek(&self, target: u32, current: u32, buffered: &[u32]) -> Vec<u32>;
}

/// ttl 30s; do not retain during play; drop on finish; keep only
/// `[current, current + max_buffer_size)`; on seek, drop all except
/// `{target, target+1}`. Use when content protection dominates.
pub struct ConservativeBufferStrategy {
    pub max_buffer_size: u32,
}

impl Default for ConservativeBufferStrategy {
    fn default() -> Self {
        Self { max_buffer_size: 3 }
    }
}

impl BufferStrategy for ConservativeBufferStrategy {
    fn on_slice_loaded(&self, _sequence: u32) -> Duration {
        Duration::from_secs(30)
    }
    fn on_slice_playing(&self, _sequence: u32) -> bool {
        false
    }
    fn on_slice_finished(&self, _sequence: u32) -> bool {
        true
    }
    fn should_cleanup(&self, entry: &BufferEntry, current_index: u32) -> bool {
        entry.sequence < current_index || entry.sequence >= current_index + self.max_buffer_size
    }
    fn on_seek(&self, target: u32, _current: u32, buffered: &[u32]) -> Vec<u32> {
        buffered
            .iter()
            .copied()
            .filter(|&s| s != target && s != target + 1)
            .collect()
    }
}

/// ttl 120s; retain briefly after finish; keep a sliding window
/// `|i - current| <= sliding_window`; drop outside that on seek. Default
/// strategy.
pub struct BalancedBufferStrategy {
    pub sliding_window: u32,
}

impl Default for BalancedBufferStrategy {
    fn default() -> Self {
        Self { sliding_window: 10 }
    }
}

impl BufferStrategy for BalancedBufferStrategy {
    fn on_slice_loaded(&self, _sequence: u32) -> Duration {
        Duration::from_secs(120)
    }
    fn on_slice_playing(&self, _sequence: u32) -> bool {
        true
    }
    fn on_slice_finished(&self, _sequence: u32) -> bool {
        false
    }
    fn should_cleanup(&self, entry: &BufferEntry, current_index: u32) -> bool {
        (i64::from(entry.sequence) - i64::from(current_index)).abs() > i64::from(self.sliding_window)
    }
    fn on_seek(&self, target: u32, _current: u32, buffered: &[u32]) -> Vec<u32> {
        buffered
            .iter()
            .copied()
            .filter(|&s| (i64::from(s) - i64::from(target)).abs() > i64::from(self.sliding_window))
            .collect()
    }
}

/// ttl 300s; keep during and after play; drop only when buffer count
/// exceeds `max_buffer_size` and the distance from `target` exceeds
/// `max_buffer_size / 2` on seek.
pub struct AggressiveBufferStrategy {
    pub max_buffer_size: u32,
}

impl Default for AggressiveBufferStrategy {
    fn default() -> Self {
        Self {
            max_buffer_size: 60,
        }
    }
}

impl BufferStrategy for AggressiveBufferStrategy {
    fn on_slice_loaded(&self, _sequence: u32) -> Duration {
        Duration::from_secs(300)
    }
    fn on_slice_playing(&self, _sequence: u32) -> bool {
        true
    }
    fn on_slice_finished(&self, _sequence: u32) -> bool {
        false
    }
    fn should_cleanup(&self, _entry: &BufferEntry, _current_index: u32) -> bool {
        // Cleanup here is driven by the aggregate buffer count, which a
        // single entry cannot see; the controller consults `on_seek`'s
        // count-aware rule and its own size accounting instead.
        false
    }
    fn on_seek(&self, target: u32, _current: u32, buffered: &[u32]) -> Vec<u32> {
        if buffered.len() as u32 <= self.max_buffer_size {
            return Vec::new();
        }
        let half = self.max_buffer_size / 2;
        buffered
            .iter()
            .copied()
            .filter(|&s| (i64::from(s) - i64::from(target)).unsigned_abs() as u32 > half)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conservative_keeps_only_forward_window() {
        let strategy = ConservativeBufferStrategy { max_buffer_size: 2 };
        assert!(!strategy.should_cleanup(&BufferEntry { sequence: 5, age: Duration::ZERO }, 5));
        assert!(strategy.should_cleanup(&BufferEntry { sequence: 4, age: Duration::ZERO }, 5));
        assert!(strategy.should_cleanup(&BufferEntry { sequence: 8, age: Duration::ZERO }, 5));
    }

    #[test]
    fn conservative_seek_drops_all_but_target_pair() {
        let strategy = ConservativeBufferStrategy::default();
        let dropped = strategy.on_seek(10, 0, &[9, 10, 11, 20]);
        assert_eq!(dropped, vec![9, 20]);
    }

    #[test]
    fn balanced_keeps_sliding_window() {
        let strategy = BalancedBufferStrategy { sliding_window: 3 };
        assert!(!strategy.should_cleanup(&BufferEntry { sequence: 7, age: Duration::ZERO }, 5));
        assert!(strategy.should_cleanup(&BufferEntry { sequence: 1, age: Duration::ZERO }, 5));
    }

    #[test]
    fn aggressive_seek_noop_under_capacity() {
        let strategy = AggressiveBufferStrategy { max_buffer_size: 10 };
        assert!(strategy.on_seek(5, 0, &[1, 2, 3]).is_empty());
    }

    #[test]
    fn aggressive_seek_drops_far_entries_over_capacity() {
        let strategy = AggressiveBufferStrategy { max_buffer_size: 4 };
        let buffered: Vec<u32> = (0..10).collect();
        let dropped = strategy.on_seek(0, 0, &buffered);
        assert!(dropped.contains(&9));
        assert!(!dropped.contains(&0));
    }
}
