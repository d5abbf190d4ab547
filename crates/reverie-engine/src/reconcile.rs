//! Startup reconciliation.
//!
//! Consults the migration log to decide whether the analysis version moved
//! (purging every derived cache if it did), then rebuilds the vector index
//! from the signal store. The sweep is best-effort with its duration logged;
//! deployments that need a bounded startup call it from a background task
//! via [`crate::Engine::rebuild_vector_index`] instead.

use std::sync::Arc;
use std::time::Instant;

use reverie_cache::invalidate::{plan, WriteKind};
use reverie_cache::CacheLayer;
use reverie_core::config::ReverieConfig;
use reverie_core::error::Result;
use reverie_store::Store;
use reverie_vector::VectorIndex;
use tracing::{info, warn};

use crate::error_map::engine_err;

pub fn startup(
    config: &ReverieConfig,
    store: &Arc<Store>,
    cache: &Arc<CacheLayer>,
    vector: &Arc<VectorIndex>,
) -> Result<()> {
    let current = config.analysis.version.as_str();
    match store
        .latest_migrated_version("analysis")
        .map_err(engine_err)?
    {
        None => {
            store
                .append_migration(None, current, "analysis", Some("initial analysis version"))
                .map_err(engine_err)?;
        }
        Some(previous) if previous != current => {
            warn!(from = %previous, to = current, "analysis version changed; purging derived state");
            store
                .append_migration(
                    Some(&previous),
                    current,
                    "analysis",
                    Some("version bump: derived caches and projections purged"),
                )
                .map_err(engine_err)?;
            cache.apply(&plan(&WriteKind::VersionBump));
            store.delete_all_projections().map_err(engine_err)?;
        }
        Some(_) => {}
    }

    let loaded = rebuild_vectors(store, vector)?;
    info!(loaded, "startup reconciliation complete");
    Ok(())
}

/// Rebuild the whole vector index from persisted signals. Returns the number
/// of records loaded.
pub fn rebuild_vectors(store: &Arc<Store>, vector: &Arc<VectorIndex>) -> Result<usize> {
    let started = Instant::now();
    let records = store.signals_for_rebuild().map_err(engine_err)?;
    let loaded = vector.rebuild(records.into_iter().filter_map(|(user, entry, record)| {
        let analyzed_at = record.analyzed_at;
        record.embedding.map(|embedding| (user, entry, embedding, analyzed_at))
    }));
    info!(
        loaded,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "vector index rebuilt from signal store"
    );
    Ok(loaded)
}
