//! Per-provider result cache and request accounting.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default cache capacity for every provider.
pub const DEFAULT_CAPACITY: usize = 50;

/// FIFO lookup cache. Negative results (`None`) are cached like positives so
/// repeated misses don't re-hit the provider; past capacity the oldest entry
/// is evicted.
pub struct GenreCache<K> {
    entries: Mutex<VecDeque<(K, Option<Vec<String>>)>>,
    capacity: usize,
}

impl<K: PartialEq> GenreCache<K> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Outer `None` is a cache miss; `Some(None)` is a cached negative.
    pub fn get(&self, key: &K) -> Option<Option<Vec<String>>> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn insert(&self, key: K, value: Option<Vec<String>>) {
        let mut entries = self.entries.lock().unwrap();
        entries.push_back((key, value));
        if entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl<K: PartialEq> Default for GenreCache<K> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Rolling request counters, observability only. Timestamps older than 24h
/// are pruned on every record.
#[derive(Default)]
pub struct RequestStats {
    hits: Mutex<VecDeque<Instant>>,
}

impl RequestStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one outbound request and return the (last hour, last 24h)
    /// counts including it.
    pub fn record(&self) -> (usize, usize) {
        self.record_at(Instant::now())
    }

    fn record_at(&self, now: Instant) -> (usize, usize) {
        let mut hits = self.hits.lock().unwrap();
        hits.push_back(now);
        Self::prune_and_count(&mut hits, now)
    }

    /// Current (last hour, last 24h) counts.
    pub fn counts(&self) -> (usize, usize) {
        let mut hits = self.hits.lock().unwrap();
        Self::prune_and_count(&mut hits, Instant::now())
    }

    fn prune_and_count(hits: &mut VecDeque<Instant>, now: Instant) -> (usize, usize) {
        let day = Duration::from_secs(86_400);
        let hour = Duration::from_secs(3_600);
        while hits
            .front()
            .is_some_and(|&t| now.saturating_duration_since(t) > day)
        {
            hits.pop_front();
        }
        let last_hour = hits
            .iter()
            .filter(|&&t| now.saturating_duration_since(t) <= hour)
            .count();
        (last_hour, hits.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_hit_and_miss() {
        let cache: GenreCache<String> = GenreCache::new(10);
        assert!(cache.get(&"key".to_string()).is_none());

        cache.insert("key".to_string(), Some(vec!["rock".to_string()]));
        assert_eq!(
            cache.get(&"key".to_string()),
            Some(Some(vec!["rock".to_string()]))
        );
    }

    #[test]
    fn test_cache_negative_result_is_a_hit() {
        let cache: GenreCache<String> = GenreCache::new(10);
        cache.insert("unknown".to_string(), None);
        assert_eq!(cache.get(&"unknown".to_string()), Some(None));
    }

    #[test]
    fn test_cache_evicts_oldest_past_capacity() {
        let cache: GenreCache<usize> = GenreCache::new(3);
        for i in 0..4 {
            cache.insert(i, None);
        }
        assert_eq!(cache.len(), 3);
        assert!(cache.get(&0).is_none());
        assert!(cache.get(&3).is_some());
    }

    #[test]
    fn test_request_stats_counts() {
        let stats = RequestStats::new();
        assert_eq!(stats.counts(), (0, 0));
        let (hour, day) = stats.record();
        assert_eq!((hour, day), (1, 1));
        let (hour, day) = stats.record();
        assert_eq!((hour, day), (2, 2));
    }

    #[test]
    fn test_request_stats_prunes_old_hits() {
        let stats = RequestStats::new();
        let now = Instant::now();
        stats.record_at(now);
        // A "request" 25 hours later prunes the first one.
        let later = now + Duration::from_secs(25 * 3_600);
        let (hour, day) = stats.record_at(later);
        assert_eq!((hour, day), (1, 1));
    }
}
