//! Shared TTL + LRU cache entry type used by both the producer's slice
//! cache and the consumer's decoded-PCM cache (§3).

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// One cached payload with expiry and recency bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub payload: T,
    pub expires_at: Instant,
    pub last_accessed_at: Instant,
    pub slice_index: u32,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Capacity-bounded, TTL-evicting cache keyed by slice id.
///
/// Eviction order on overflow: expired entries first, then least-recently
/// accessed among the rest, matching the producer cache rule in §4.5 step
/// 7 ("evict expired entries; if still over capacity, remove the
/// least-recently-accessed non-expired entries until at or below
/// capacity").
pub struct SliceCache<T> {
    entries: DashMap<String, CacheEntry<T>>,
    capacity: usize,
    ttl: Duration,
}

impl<T: Clone> SliceCache<T> {
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            ttl,
        }
    }

    /// Returns a cached payload if present and not expired. Refreshes
    /// `last_accessed_at` on hit.
    pub fn get(&self, slice_id: &str) -> Option<T> {
        let now = Instant::now();
        let mut entry = self.entries.get_mut(slice_id)?;
        if entry.is_expired(now) {
            return None;
        }
        entry.last_accessed_at = now;
        Some(entry.payload.clone())
    }

    /// Inserts a payload and runs eviction to stay within capacity.
    pub fn insert(&self, slice_id: String, slice_index: u32, payload: T) {
        let now = Instant::now();
        self.entries.insert(
            slice_id,
            CacheEntry {
                payload,
                expires_at: now + self.ttl,
                last_accessed_at: now,
                slice_index,
            },
        );
        self.evict_expired();
        self.evict_lru_if_over_capacity();
    }

    pub fn remove(&self, slice_id: &str) {
        self.entries.remove(slice_id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }

    fn evict_lru_if_over_capacity(&self) {
        if self.entries.len() <= self.capacity {
            return;
        }
        let mut over = self.entries.len() - self.capacity;
        let mut by_recency: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|r| (r.key().clone(), r.value().last_accessed_at))
            .collect();
        by_recency.sort_by_key(|(_, accessed)| *accessed);

        for (slice_id, _) in by_recency {
            if over == 0 {
                break;
            }
            self.entries.remove(&slice_id);
            over -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn insert_then_get_returns_payload() {
        let cache: SliceCache<Vec<u8>> = SliceCache::new(10, Duration::from_secs(60));
        cache.insert("slice-1".to_string(), 0, vec![1, 2, 3]);
        assert_eq!(cache.get("slice-1"), Some(vec![1, 2, 3]));
    }

    #[test]
    fn missing_key_returns_none() {
        let cache: SliceCache<Vec<u8>> = SliceCache::new(10, Duration::from_secs(60));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn expired_entry_is_not_returned() {
        let cache: SliceCache<u8> = SliceCache::new(10, Duration::from_millis(1));
        cache.insert("s".to_string(), 0, 7);
        sleep(Duration::from_millis(20));
        assert_eq!(cache.get("s"), None);
    }

    #[test]
    fn evicts_least_recently_accessed_when_over_capacity() {
        let cache: SliceCache<u32> = SliceCache::new(2, Duration::from_secs(60));
        cache.insert("a".to_string(), 0, 1);
        sleep(Duration::from_millis(5));
        cache.insert("b".to_string(), 1, 2);
        sleep(Duration::from_millis(5));
        // touch "a" so it is more recent than "b"
        let _ = cache.get("a");
        sleep(Duration::from_millis(5));
        cache.insert("c".to_string(), 2, 3);

        assert_eq!(cache.len(), 2);
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn remove_drops_entry() {
        let cache: SliceCache<u8> = SliceCache::new(10, Duration::from_secs(60));
        cache.insert("s".to_string(), 0, 1);
        cache.remove("s");
        assert!(cache.get("s").is_none());
    }
}
