//! In-process LRU tier: bounded by entry count and approximate bytes,
//! guarded by a short mutex that is never held across a suspension point.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

#[derive(Debug, Clone, Default)]
pub struct LruStats {
    pub len: usize,
    pub bytes: usize,
    pub hits: u64,
    pub misses: u64,
}

struct CachedValue {
    bytes: Vec<u8>,
    expires_at: Instant,
}

struct LruState {
    map: LruCache<String, CachedValue>,
    total_bytes: usize,
    capacity_bytes: usize,
    hits: u64,
    misses: u64,
}

pub struct LruTier {
    inner: Mutex<LruState>,
}

impl LruTier {
    pub fn new(capacity_entries: usize, capacity_bytes: usize) -> Self {
        let cap = NonZeroUsize::new(capacity_entries.max(1)).expect("max(1) is non-zero");
        Self {
            inner: Mutex::new(LruState {
                map: LruCache::new(cap),
                total_bytes: 0,
                capacity_bytes,
                hits: 0,
                misses: 0,
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut state = self.inner.lock().expect("lru mutex poisoned");
        match state.map.get(key) {
            Some(value) if value.expires_at > Instant::now() => {
                let bytes = value.bytes.clone();
                state.hits += 1;
                Some(bytes)
            }
            Some(_) => {
                // Expired: drop it and report a miss.
                if let Some(old) = state.map.pop(key) {
                    state.total_bytes -= old.bytes.len();
                }
                state.misses += 1;
                None
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    pub fn put(&self, key: &str, bytes: Vec<u8>, ttl_secs: u64) {
        let expires_at = Instant::now() + Duration::from_secs(ttl_secs);
        let mut state = self.inner.lock().expect("lru mutex poisoned");
        let added = bytes.len();
        if let Some(old) = state.map.push(
            key.to_string(),
            CachedValue { bytes, expires_at },
        ) {
            // push() returns either the displaced LRU entry or the replaced
            // value under the same key.
            state.total_bytes -= old.1.bytes.len();
        }
        state.total_bytes += added;
        // Byte bound: evict cold entries until we fit again.
        while state.total_bytes > state.capacity_bytes {
            match state.map.pop_lru() {
                Some((_, evicted)) => state.total_bytes -= evicted.bytes.len(),
                None => break,
            }
        }
    }

    pub fn remove(&self, key: &str) {
        let mut state = self.inner.lock().expect("lru mutex poisoned");
        if let Some(old) = state.map.pop(key) {
            state.total_bytes -= old.bytes.len();
        }
    }

    pub fn remove_prefix(&self, prefix: &str) {
        let mut state = self.inner.lock().expect("lru mutex poisoned");
        let matching: Vec<String> = state
            .map
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in matching {
            if let Some(old) = state.map.pop(&key) {
                state.total_bytes -= old.bytes.len();
            }
        }
    }

    pub fn clear(&self) {
        let mut state = self.inner.lock().expect("lru mutex poisoned");
        state.map.clear();
        state.total_bytes = 0;
    }

    pub fn stats(&self) -> LruStats {
        let state = self.inner.lock().expect("lru mutex poisoned");
        LruStats {
            len: state.map.len(),
            bytes: state.total_bytes,
            hits: state.hits,
            misses: state.misses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_miss_counters_and_round_trip() {
        let tier = LruTier::new(8, 1024);
        assert!(tier.get("a").is_none());
        tier.put("a", vec![1, 2, 3], 60);
        assert_eq!(tier.get("a"), Some(vec![1, 2, 3]));
        let stats = tier.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn byte_bound_evicts_cold_entries() {
        let tier = LruTier::new(64, 100);
        tier.put("cold", vec![0u8; 60], 60);
        tier.put("hot", vec![0u8; 60], 60);
        // 120 bytes > 100: "cold" must have been evicted.
        assert!(tier.get("cold").is_none());
        assert_eq!(tier.get("hot").map(|b| b.len()), Some(60));
        assert!(tier.stats().bytes <= 100);
    }

    #[test]
    fn entry_bound_evicts_lru_order() {
        let tier = LruTier::new(2, 10_000);
        tier.put("a", vec![1], 60);
        tier.put("b", vec![2], 60);
        tier.get("a"); // touch: b is now LRU
        tier.put("c", vec![3], 60);
        assert!(tier.get("b").is_none());
        assert!(tier.get("a").is_some());
    }

    #[test]
    fn expired_entries_read_as_misses() {
        let tier = LruTier::new(8, 1024);
        tier.put("x", vec![9], 0);
        assert!(tier.get("x").is_none());
        assert_eq!(tier.stats().len, 0);
    }

    #[test]
    fn prefix_removal() {
        let tier = LruTier::new(8, 1024);
        tier.put("analytics:mood:u1:a", vec![1], 60);
        tier.put("analytics:mood:u1:b", vec![2], 60);
        tier.put("analytics:mood:u2:a", vec![3], 60);
        tier.remove_prefix("analytics:mood:u1:");
        assert!(tier.get("analytics:mood:u1:a").is_none());
        assert!(tier.get("analytics:mood:u2:a").is_some());
    }
}
