//! Bounded TTL cache for collaborator responses.
//!
//! Enrichment and embedding responses are cached behind an explicit,
//! injected cache instance. Never a process-wide singleton: each job wires
//! its own cache (or none) so tests and concurrent stages stay isolated.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

struct CacheEntry<V> {
    value: V,
    inserted_at: DateTime<Utc>,
}

/// A size-bounded cache whose entries expire after a fixed TTL.
///
/// Eviction is FIFO by insertion time when the bound is hit; expired
/// entries are dropped lazily on read.
pub struct ResponseCache<V> {
    entries: HashMap<String, CacheEntry<V>>,
    order: Vec<String>,
    max_entries: usize,
    ttl: Duration,
    hits: u64,
    misses: u64,
}

impl<V: Clone> ResponseCache<V> {
    /// Create a cache bounded to `max_entries` with the given TTL.
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            max_entries: max_entries.max(1),
            ttl,
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a key, dropping it if expired.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let now = Utc::now();
        let expired = match self.entries.get(key) {
            Some(entry) => now.signed_duration_since(entry.inserted_at) > self.ttl,
            None => {
                self.misses += 1;
                return None;
            }
        };
        if expired {
            self.remove(key);
            self.misses += 1;
            return None;
        }
        self.hits += 1;
        self.entries.get(key).map(|e| e.value.clone())
    }

    /// Insert a value, evicting the oldest entry if the cache is full.
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            if let Some(oldest) = self.order.first().cloned() {
                self.remove(&oldest);
            }
        }
        if self.entries.contains_key(&key) {
            self.order.retain(|k| *k != key);
        }
        self.order.push(key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Utc::now(),
            },
        );
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (hits, misses) counters for observability.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_and_miss_counters() {
        let mut cache: ResponseCache<String> = ResponseCache::new(4, Duration::minutes(5));
        assert!(cache.get("a").is_none());
        cache.insert("a", "features".to_string());
        assert_eq!(cache.get("a").as_deref(), Some("features"));
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn test_bound_evicts_oldest() {
        let mut cache: ResponseCache<u32> = ResponseCache::new(2, Duration::minutes(5));
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn test_expired_entries_drop_on_read() {
        let mut cache: ResponseCache<u32> = ResponseCache::new(4, Duration::zero());
        cache.insert("a", 1);
        assert!(cache.get("a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reinsert_refreshes_position() {
        let mut cache: ResponseCache<u32> = ResponseCache::new(2, Duration::minutes(5));
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 10);
        cache.insert("c", 3);
        // "b" was the oldest after "a" refreshed.
        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("a"), Some(10));
    }
}
