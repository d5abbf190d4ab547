//! Shared key-value tier backed by `redb`.
//!
//! Process-external in the sense that the file outlives the process and can
//! be shared by tooling; values carry their expiry inline and are checked on
//! read. Construction opens the database file and nothing else — no eager
//! health checks, no background work.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Cache table: `key (str) → serialized Envelope`.
const CACHE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("cache");

#[derive(Serialize, Deserialize)]
struct Envelope {
    expires_at_unix: u64,
    payload: Vec<u8>,
}

pub struct SharedKv {
    db: Database,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl SharedKv {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CacheError::Storage(format!("cannot create cache dir: {e}")))?;
        }
        let db = Database::create(path)?;
        // Ensure the table exists so first reads don't error.
        {
            let tx = db.begin_write()?;
            tx.open_table(CACHE_TABLE)?;
            tx.commit()?;
        }
        Ok(Self { db })
    }

    /// Fetch a live value; returns the payload and its remaining TTL in
    /// seconds. Expired rows are lazily deleted.
    pub fn get(&self, key: &str) -> Result<Option<(Vec<u8>, u64)>, CacheError> {
        let envelope: Option<Envelope> = {
            let tx = self.db.begin_read()?;
            let table = tx.open_table(CACHE_TABLE)?;
            match table.get(key)? {
                Some(value) => Some(
                    serde_json::from_slice(value.value())
                        .map_err(|e| CacheError::Codec(e.to_string()))?,
                ),
                None => None,
            }
        };
        let Some(envelope) = envelope else {
            return Ok(None);
        };
        let now = unix_now();
        if envelope.expires_at_unix <= now {
            self.remove(key)?;
            return Ok(None);
        }
        Ok(Some((envelope.payload, envelope.expires_at_unix - now)))
    }

    pub fn put(&self, key: &str, payload: &[u8], ttl_secs: u64) -> Result<(), CacheError> {
        let envelope = Envelope {
            expires_at_unix: unix_now().saturating_add(ttl_secs),
            payload: payload.to_vec(),
        };
        let bytes =
            serde_json::to_vec(&envelope).map_err(|e| CacheError::Codec(e.to_string()))?;
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(CACHE_TABLE)?;
            table.insert(key, bytes.as_slice())?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<(), CacheError> {
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(CACHE_TABLE)?;
            table.remove(key)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Remove every key starting with `prefix`.
    pub fn remove_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let matching: Vec<String> = {
            let tx = self.db.begin_read()?;
            let table = tx.open_table(CACHE_TABLE)?;
            let mut keys = Vec::new();
            for row in table.range(prefix..)? {
                let (key, _) = row?;
                let key = key.value().to_string();
                if !key.starts_with(prefix) {
                    break;
                }
                keys.push(key);
            }
            keys
        };
        let removed = matching.len();
        if removed > 0 {
            let tx = self.db.begin_write()?;
            {
                let mut table = tx.open_table(CACHE_TABLE)?;
                for key in &matching {
                    table.remove(key.as_str())?;
                }
            }
            tx.commit()?;
        }
        Ok(removed)
    }

    pub fn clear(&self) -> Result<(), CacheError> {
        let keys: Vec<String> = {
            let tx = self.db.begin_read()?;
            let table = tx.open_table(CACHE_TABLE)?;
            table
                .iter()?
                .filter_map(|r| r.ok().map(|(k, _)| k.value().to_string()))
                .collect()
        };
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(CACHE_TABLE)?;
            for key in &keys {
                table.remove(key.as_str())?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv() -> (SharedKv, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let kv = SharedKv::open(dir.path().join("cache.redb")).unwrap();
        (kv, dir)
    }

    #[test]
    fn round_trip_reports_remaining_ttl() {
        let (kv, _dir) = kv();
        kv.put("k", b"value", 120).unwrap();
        let (payload, remaining) = kv.get("k").unwrap().unwrap();
        assert_eq!(payload, b"value");
        assert!(remaining > 0 && remaining <= 120);
    }

    #[test]
    fn expired_rows_read_as_absent() {
        let (kv, _dir) = kv();
        kv.put("k", b"value", 0).unwrap();
        assert!(kv.get("k").unwrap().is_none());
    }

    #[test]
    fn prefix_purge_spares_other_namespaces() {
        let (kv, _dir) = kv();
        kv.put("retrieval:u1:a", b"1", 60).unwrap();
        kv.put("retrieval:u1:b", b"2", 60).unwrap();
        kv.put("retrieval:u2:a", b"3", 60).unwrap();
        assert_eq!(kv.remove_prefix("retrieval:u1:").unwrap(), 2);
        assert!(kv.get("retrieval:u1:a").unwrap().is_none());
        assert!(kv.get("retrieval:u2:a").unwrap().is_some());
    }
}
