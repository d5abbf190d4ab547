//! Three-tier cache: in-process LRU → embedded shared KV → (the relational
//! store, which lives elsewhere and is always authoritative).
//!
//! Reads try the LRU, then the shared tier (promoting hits); writes go
//! through both, best-effort — the authoritative store has already been
//! updated by the time anything lands here. Invalidation is centralised:
//! every write path maps to an [`invalidate::InvalidationPlan`] enumerating
//! exactly the keys and prefixes to purge, so no cache write is ever ad-hoc.

pub mod error;
pub mod invalidate;
pub mod keys;
pub mod lru_tier;
pub mod shared;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use error::CacheError;
use invalidate::InvalidationPlan;
use keys::{CacheKey, Domain};
use lru_tier::LruTier;
use reverie_core::config::CacheConfig;
use shared::SharedKv;

pub struct CacheLayer {
    lru: LruTier,
    shared: SharedKv,
    ttls: reverie_core::config::SharedTtlConfig,
}

impl CacheLayer {
    /// Construct both tiers. Opens the shared tier's database file but
    /// performs no health checks or other blocking work beyond that — health
    /// is observed on demand by ordinary reads.
    pub fn open(config: &CacheConfig) -> Result<Self, CacheError> {
        Ok(Self {
            lru: LruTier::new(config.lru.capacity_entries, config.lru.capacity_bytes),
            shared: SharedKv::open(&config.shared.path)?,
            ttls: config.shared.ttl.clone(),
        })
    }

    /// In-memory variant for tests: the shared tier lives in a temp file.
    pub fn open_at(
        path: &std::path::Path,
        config: &CacheConfig,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            lru: LruTier::new(config.lru.capacity_entries, config.lru.capacity_bytes),
            shared: SharedKv::open(path)?,
            ttls: config.shared.ttl.clone(),
        })
    }

    fn ttl_for(&self, domain: Domain) -> u64 {
        match domain {
            Domain::Analytics => self.ttls.analytics_secs,
            Domain::Signal => self.ttls.signals_secs,
            Domain::Embedding => self.ttls.embeddings_secs,
            Domain::Retrieval => self.ttls.retrieval_secs,
        }
    }

    /// Tiered read: LRU first, then the shared store (promoting the hit).
    pub fn get<T: DeserializeOwned + Serialize>(
        &self,
        key: &CacheKey,
    ) -> Result<Option<T>, CacheError> {
        if let Some(bytes) = self.lru.get(key.as_str()) {
            return Ok(Some(
                serde_json::from_slice(&bytes).map_err(|e| CacheError::Codec(e.to_string()))?,
            ));
        }
        match self.shared.get(key.as_str())? {
            Some((bytes, remaining_secs)) => {
                self.lru.put(key.as_str(), bytes.clone(), remaining_secs);
                Ok(Some(
                    serde_json::from_slice(&bytes).map_err(|e| CacheError::Codec(e.to_string()))?,
                ))
            }
            None => Ok(None),
        }
    }

    /// Best-effort write-through to both tiers with the domain TTL. Failures
    /// are logged, never propagated — the authoritative store already holds
    /// the data.
    pub fn put<T: Serialize>(&self, key: &CacheKey, value: &T, domain: Domain) {
        self.put_with_ttl(key, value, self.ttl_for(domain));
    }

    /// Write-through with an explicit TTL, for entries whose lifetime is a
    /// dedicated configuration value (the fingerprint result cache).
    pub fn put_with_ttl<T: Serialize>(&self, key: &CacheKey, value: &T, ttl_secs: u64) {
        let bytes = match serde_json::to_vec(value) {
            Ok(b) => b,
            Err(e) => {
                warn!(key = key.as_str(), error = %e, "cache value failed to serialize");
                return;
            }
        };
        self.lru.put(key.as_str(), bytes.clone(), ttl_secs);
        if let Err(e) = self.shared.put(key.as_str(), &bytes, ttl_secs) {
            warn!(key = key.as_str(), error = %e, "shared cache write failed");
        }
    }

    /// Remove one key from both tiers.
    pub fn remove(&self, key: &CacheKey) {
        self.lru.remove(key.as_str());
        if let Err(e) = self.shared.remove(key.as_str()) {
            warn!(key = key.as_str(), error = %e, "shared cache remove failed");
        }
    }

    /// Apply an invalidation plan: exact keys, prefixes, or everything.
    pub fn apply(&self, plan: &InvalidationPlan) {
        if plan.purge_all {
            self.lru.clear();
            if let Err(e) = self.shared.clear() {
                warn!(error = %e, "shared cache clear failed");
            }
            return;
        }
        for key in &plan.keys {
            self.remove(key);
        }
        for prefix in &plan.prefixes {
            self.lru.remove_prefix(prefix);
            if let Err(e) = self.shared.remove_prefix(prefix) {
                warn!(prefix = %prefix, error = %e, "shared cache prefix purge failed");
            }
        }
    }

    /// LRU tier hit/miss counters, for observability.
    pub fn lru_stats(&self) -> lru_tier::LruStats {
        self.lru.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverie_core::config::CacheConfig;

    fn layer() -> (CacheLayer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::default();
        let layer = CacheLayer::open_at(&dir.path().join("cache.redb"), &config).unwrap();
        (layer, dir)
    }

    #[test]
    fn tiered_round_trip_promotes_to_lru() {
        let (layer, _dir) = layer();
        let key = CacheKey::embedding(&"entry-1".into());
        layer.put(&key, &vec![0.1f32, 0.2], Domain::Embedding);

        let hit: Option<Vec<f32>> = layer.get(&key).unwrap();
        assert_eq!(hit, Some(vec![0.1, 0.2]));
        assert!(layer.lru_stats().hits >= 1);
    }

    #[test]
    fn shared_tier_survives_an_lru_wipe() {
        let (layer, _dir) = layer();
        let key = CacheKey::signal(&reverie_core::types::Fingerprint("abc".to_string()));
        layer.put(&key, &"payload".to_string(), Domain::Signal);
        layer.lru.clear();

        let hit: Option<String> = layer.get(&key).unwrap();
        assert_eq!(hit.as_deref(), Some("payload"));
    }

    #[test]
    fn remove_and_prefix_purge_clear_both_tiers() {
        let (layer, _dir) = layer();
        let user = reverie_core::types::UserId::from("u1");
        let a = CacheKey::analytics("mood", &user, "2026-07");
        let b = CacheKey::analytics("mood", &user, "2026-08");
        layer.put(&a, &1u32, Domain::Analytics);
        layer.put(&b, &2u32, Domain::Analytics);

        let plan = InvalidationPlan {
            keys: vec![],
            prefixes: vec![format!("analytics:mood:{user}:")],
            purge_all: false,
        };
        layer.apply(&plan);
        assert!(layer.get::<u32>(&a).unwrap().is_none());
        assert!(layer.get::<u32>(&b).unwrap().is_none());
    }
}
