//! User-partitioned in-process vector index.
//!
//! Records are lookup aids, weakly owned: the whole index is rebuildable
//! from persisted signals, which is exactly what the engine's startup
//! reconciliation does. Per-user isolation is structural — each user has a
//! private partition and a query never touches any other — rather than a
//! metadata filter that could be forgotten.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reverie_core::types::{EntryId, UserId};
use reverie_core::ErrorKind;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum VectorError {
    #[error("embedding dimension {got} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl VectorError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InputInvalid
    }
}

#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub entry_id: EntryId,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub entry_id: EntryId,
    pub score: f32,
}

pub struct VectorIndex {
    dimension: usize,
    partitions: DashMap<UserId, HashMap<EntryId, VectorRecord>>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            partitions: DashMap::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Insert or replace the record for `(user, entry)`. Idempotent: the
    /// same inputs twice leave the index identical to once.
    pub fn upsert(
        &self,
        user_id: &UserId,
        entry_id: &EntryId,
        embedding: Vec<f32>,
        created_at: DateTime<Utc>,
    ) -> Result<(), VectorError> {
        if embedding.len() != self.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimension,
                got: embedding.len(),
            });
        }
        self.partitions.entry(user_id.clone()).or_default().insert(
            entry_id.clone(),
            VectorRecord {
                entry_id: entry_id.clone(),
                embedding,
                created_at,
            },
        );
        Ok(())
    }

    /// Top-`k` records in this user's partition by cosine similarity,
    /// optionally restricted by `filter`. A user with no records yields an
    /// empty result; `k` larger than the corpus yields the whole corpus,
    /// ordered.
    pub fn query(
        &self,
        user_id: &UserId,
        probe: &[f32],
        k: usize,
        filter: impl Fn(&EntryId) -> bool,
    ) -> Result<Vec<VectorHit>, VectorError> {
        if probe.len() != self.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimension,
                got: probe.len(),
            });
        }
        let Some(partition) = self.partitions.get(user_id) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<VectorHit> = partition
            .values()
            .filter(|record| filter(&record.entry_id))
            .map(|record| VectorHit {
                entry_id: record.entry_id.clone(),
                score: cosine_similarity(&record.embedding, probe),
            })
            .collect();
        drop(partition);
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        debug!(user = %user_id, hits = hits.len(), "vector query");
        Ok(hits)
    }

    pub fn remove(&self, user_id: &UserId, entry_id: &EntryId) {
        if let Some(mut partition) = self.partitions.get_mut(user_id) {
            partition.remove(entry_id);
        }
    }

    /// Drop a user's whole partition (user deletion).
    pub fn remove_user(&self, user_id: &UserId) {
        self.partitions.remove(user_id);
    }

    pub fn len(&self, user_id: &UserId) -> usize {
        self.partitions.get(user_id).map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, user_id: &UserId) -> bool {
        self.len(user_id) == 0
    }

    /// Wipe and repopulate from authoritative records. Dimension mismatches
    /// in persisted data are skipped and counted rather than aborting the
    /// sweep.
    pub fn rebuild<I>(&self, records: I) -> usize
    where
        I: IntoIterator<Item = (UserId, EntryId, Vec<f32>, DateTime<Utc>)>,
    {
        self.partitions.clear();
        let mut loaded = 0usize;
        let mut skipped = 0usize;
        for (user, entry, embedding, created_at) in records {
            match self.upsert(&user, &entry, embedding, created_at) {
                Ok(()) => loaded += 1,
                Err(_) => skipped += 1,
            }
        }
        info!(loaded, skipped, "vector index rebuilt");
        loaded
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> VectorIndex {
        VectorIndex::new(3)
    }

    fn user(s: &str) -> UserId {
        UserId::from(s)
    }

    fn entry(s: &str) -> EntryId {
        EntryId::from(s)
    }

    #[test]
    fn query_ranks_by_cosine_similarity() {
        let index = index();
        let u = user("u1");
        index
            .upsert(&u, &entry("close"), vec![0.9, 0.1, 0.0], Utc::now())
            .unwrap();
        index
            .upsert(&u, &entry("far"), vec![0.0, 0.0, 1.0], Utc::now())
            .unwrap();

        let hits = index.query(&u, &[1.0, 0.0, 0.0], 2, |_| true).unwrap();
        assert_eq!(hits[0].entry_id, entry("close"));
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn upsert_is_idempotent_by_user_and_entry() {
        let index = index();
        let u = user("u1");
        for _ in 0..3 {
            index
                .upsert(&u, &entry("e1"), vec![1.0, 0.0, 0.0], Utc::now())
                .unwrap();
        }
        assert_eq!(index.len(&u), 1);
    }

    #[test]
    fn dimension_mismatch_is_a_typed_error() {
        let index = index();
        let err = index
            .upsert(&user("u1"), &entry("e1"), vec![1.0], Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            VectorError::DimensionMismatch {
                expected: 3,
                got: 1
            }
        ));
    }

    #[test]
    fn empty_partition_yields_empty_results_not_errors() {
        let index = index();
        let hits = index
            .query(&user("nobody"), &[1.0, 0.0, 0.0], 5, |_| true)
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn k_larger_than_corpus_returns_everything_ordered() {
        let index = index();
        let u = user("u1");
        for (i, v) in [[1.0, 0.0, 0.0], [0.7, 0.7, 0.0], [0.0, 1.0, 0.0]]
            .iter()
            .enumerate()
        {
            index
                .upsert(&u, &entry(&format!("e{i}")), v.to_vec(), Utc::now())
                .unwrap();
        }
        let hits = index.query(&u, &[1.0, 0.0, 0.0], 50, |_| true).unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn queries_never_cross_user_partitions() {
        let index = index();
        // Nearly identical embeddings for two different users.
        index
            .upsert(&user("u1"), &entry("mine"), vec![1.0, 0.0, 0.0], Utc::now())
            .unwrap();
        index
            .upsert(&user("u2"), &entry("theirs"), vec![0.99, 0.01, 0.0], Utc::now())
            .unwrap();

        let hits = index.query(&user("u1"), &[1.0, 0.0, 0.0], 10, |_| true).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry_id, entry("mine"));
    }

    #[test]
    fn rebuild_replaces_the_whole_index() {
        let index = index();
        index
            .upsert(&user("u1"), &entry("old"), vec![1.0, 0.0, 0.0], Utc::now())
            .unwrap();
        let loaded = index.rebuild(vec![
            (user("u1"), entry("new"), vec![0.0, 1.0, 0.0], Utc::now()),
            (user("u2"), entry("bad"), vec![0.0], Utc::now()), // wrong dimension: skipped
        ]);
        assert_eq!(loaded, 1);
        assert_eq!(index.len(&user("u1")), 1);
        let hits = index.query(&user("u1"), &[0.0, 1.0, 0.0], 1, |_| true).unwrap();
        assert_eq!(hits[0].entry_id, entry("new"));
    }
}
