//! The composition root.
//!
//! `Engine` wires the model runner, stores, cache, vector index, analysis
//! pipeline and conversation orchestrator together with explicit dependency
//! injection — no implicit initialization order, no service globals. It also
//! owns the startup reconciliation (migration log check + vector rebuild)
//! and graceful shutdown, and is the only layer that converts subsystem
//! errors into the public [`EngineError`] with correlation ids.

pub mod bootstrap;
mod error_map;
mod reconcile;

use std::sync::Arc;
use std::time::Duration;

use reverie_analysis::{
    fingerprint, AnalysisPipeline, AnalysisPool, FingerprintCoordinator,
};
use reverie_analytics::{
    AnalyticsAggregator, MoodTrend, PatternSummary, SignalCoverage, TopicDistribution,
    WritingStats,
};
use reverie_cache::invalidate::{plan, WriteKind};
use reverie_cache::keys::{CacheKey, Domain};
use reverie_cache::CacheLayer;
use reverie_chat::{ConversationOrchestrator, SessionContext, TurnOutcome};
use reverie_core::config::ReverieConfig;
use reverie_core::signal::SignalRecord;
use reverie_core::types::{EntryId, SessionId, SessionType, TopicId, UserId};
use reverie_core::{EngineError, Result};
use reverie_models::ModelRunner;
use reverie_store::{
    EntryRecord, SessionRecord, Store, TopicRecord, UserRecord,
};
use reverie_vector::VectorIndex;
use tracing::{info, instrument};

use error_map::engine_err;

pub use bootstrap::init_tracing;

pub struct Engine {
    config: ReverieConfig,
    store: Arc<Store>,
    cache: Arc<CacheLayer>,
    vector: Arc<VectorIndex>,
    runner: Arc<ModelRunner>,
    coordinator: Arc<FingerprintCoordinator>,
    pool: AnalysisPool,
    orchestrator: ConversationOrchestrator,
    analytics: AnalyticsAggregator,
}

impl Engine {
    /// Build the engine from configuration with the standard model registry.
    /// Must be called inside a tokio runtime — the analysis pool spawns its
    /// workers here.
    pub fn open(config: ReverieConfig) -> Result<Self> {
        let runner = ModelRunner::from_config(&config);
        Self::open_with_runner(config, runner)
    }

    /// Build the engine around a caller-supplied runner. This is the seam
    /// deployments (and tests) use to swap individual model backends.
    pub fn open_with_runner(config: ReverieConfig, runner: ModelRunner) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(Store::open(&config.database.path).map_err(engine_err)?);
        let cache = Arc::new(CacheLayer::open(&config.cache).map_err(engine_err)?);
        let vector = Arc::new(VectorIndex::new(config.vector.dimension));
        let runner = Arc::new(runner);
        let pipeline =
            Arc::new(AnalysisPipeline::new(runner.clone(), &config).map_err(engine_err)?);
        let pool = AnalysisPool::new(
            pipeline.clone(),
            config.analysis.workers,
            config.analysis.queue_depth,
        );
        let deadline = Duration::from_millis(config.deadline.default_ms);
        let orchestrator = ConversationOrchestrator::new(
            store.clone(),
            vector.clone(),
            runner.clone(),
            pipeline,
            cache.clone(),
            config.crisis.threshold,
            deadline,
        );
        let analytics = AnalyticsAggregator::new(store.clone(), cache.clone());

        reconcile::startup(&config, &store, &cache, &vector)?;

        info!(version = %config.analysis.version, "engine ready");
        Ok(Self {
            config,
            store,
            cache,
            vector,
            runner,
            coordinator: Arc::new(FingerprintCoordinator::new()),
            pool,
            orchestrator,
            analytics,
        })
    }

    /// Drain the analysis pool and release everything deterministically.
    pub async fn shutdown(self) {
        self.pool.shutdown().await;
        info!("engine shut down");
    }

    // ── Users ─────────────────────────────────────────────────────────────

    pub fn create_user(&self, display_name: &str) -> Result<UserRecord> {
        self.store.create_user(display_name).map_err(engine_err)
    }

    pub fn get_user(&self, user_id: &UserId) -> Result<UserRecord> {
        self.store
            .get_user(user_id)
            .map_err(engine_err)?
            .ok_or_else(|| EngineError::not_found(format!("user {user_id}")))
    }

    /// Delete a user: relational cascade, vector partition, cache keys.
    #[instrument(skip(self), fields(user = %user_id))]
    pub fn delete_user(&self, user_id: &UserId) -> Result<()> {
        let entries = self.store.entry_ids_for_user(user_id).map_err(engine_err)?;
        self.store.delete_user(user_id).map_err(engine_err)?;
        self.vector.remove_user(user_id);
        self.cache.apply(&plan(&WriteKind::UserDelete {
            user: user_id.clone(),
            entries,
        }));
        Ok(())
    }

    // ── Topics ────────────────────────────────────────────────────────────

    pub fn create_topic(
        &self,
        user_id: &UserId,
        name: &str,
        color: Option<&str>,
        description: Option<&str>,
    ) -> Result<TopicRecord> {
        self.store
            .create_topic(user_id, name, color, description)
            .map_err(engine_err)
    }

    pub fn list_topics(&self, user_id: &UserId) -> Result<Vec<TopicRecord>> {
        self.store.list_topics(user_id).map_err(engine_err)
    }

    pub fn delete_topic(&self, user_id: &UserId, topic_id: &TopicId) -> Result<()> {
        self.store
            .delete_topic(user_id, topic_id)
            .map_err(engine_err)
    }

    // ── Entries ───────────────────────────────────────────────────────────

    /// Create an entry without analyzing it. The fingerprint is stamped with
    /// the current analysis version.
    pub fn create_entry(
        &self,
        user_id: &UserId,
        content: &str,
        topic_id: Option<&TopicId>,
    ) -> Result<EntryRecord> {
        if content.trim().is_empty() {
            return Err(EngineError::input_invalid("entry content must not be empty"));
        }
        let version = self.config.analysis.version();
        let fp = fingerprint(content, &version);
        let entry = self
            .store
            .create_entry(user_id, content, topic_id, &fp, &version)
            .map_err(engine_err)?;
        // An entry write invalidates the user's projections and retrieval
        // results even before any signal exists.
        self.cache.apply(&plan(&WriteKind::EntryWrite {
            user: user_id.clone(),
            entry: entry.id.clone(),
            fingerprint: fp,
        }));
        Ok(entry)
    }

    /// Create and analyze in one step.
    pub async fn add_entry(
        &self,
        user_id: &UserId,
        content: &str,
        topic_id: Option<&TopicId>,
    ) -> Result<(EntryRecord, SignalRecord)> {
        let entry = self.create_entry(user_id, content, topic_id)?;
        let signal = self.analyze_entry(user_id, &entry.id).await?;
        Ok((entry, signal))
    }

    /// Run (or reuse) the analysis for an entry with the default deadline.
    pub async fn analyze_entry(
        &self,
        user_id: &UserId,
        entry_id: &EntryId,
    ) -> Result<SignalRecord> {
        self.analyze_entry_with_deadline(user_id, entry_id, self.default_deadline())
            .await
    }

    /// Run (or reuse) the analysis for an entry.
    ///
    /// The fingerprint contract applies: a cached result within TTL is
    /// returned without a run; concurrent callers for the same fingerprint
    /// share one in-flight run; a failure releases the flight for retry.
    /// `deadline` covers queueing and the whole extractor chain.
    #[instrument(skip(self, deadline), fields(user = %user_id, entry = %entry_id))]
    pub async fn analyze_entry_with_deadline(
        &self,
        user_id: &UserId,
        entry_id: &EntryId,
        deadline: Duration,
    ) -> Result<SignalRecord> {
        let entry = self
            .store
            .get_entry(user_id, entry_id)
            .map_err(engine_err)?
            .ok_or_else(|| EngineError::not_found(format!("entry {entry_id}")))?;

        let version = self.config.analysis.version();
        let fp = fingerprint(&entry.content, &version);
        // Entries written under an older analysis version are re-stamped
        // before re-analysis; this also drops any stale signal row.
        let entry = if entry.analysis_version != version || entry.content_fingerprint != fp {
            self.store
                .update_entry_content(user_id, &entry.id, &entry.content, &fp, &version)
                .map_err(engine_err)?
        } else {
            entry
        };

        // TTL reuse: an identical (content, version) analyzed recently —
        // by this entry or any other — short-circuits the model path.
        let signal_key = CacheKey::signal(&fp);
        if let Ok(Some(record)) = self.cache.get::<SignalRecord>(&signal_key) {
            self.persist_signal(user_id, &entry, &record)?;
            return Ok(record);
        }

        let content = entry.content.clone();
        let pool = &self.pool;
        let record = self
            .coordinator
            .run(fp.clone(), || pool.analyze_with_deadline(content, deadline))
            .await
            .map_err(engine_err)?;

        self.persist_signal(user_id, &entry, &record)?;

        // Centralised invalidation first, then write-through of the fresh
        // values so readers converge on the new state.
        self.cache.apply(&plan(&WriteKind::EntryWrite {
            user: user_id.clone(),
            entry: entry.id.clone(),
            fingerprint: fp.clone(),
        }));
        // The fingerprint result lives exactly `fingerprint.ttl` — the window
        // in which a repeat analysis of the same (content, version) is free.
        self.cache
            .put_with_ttl(&signal_key, &record, self.config.fingerprint.ttl_secs);
        if let Some(embedding) = &record.embedding {
            self.cache
                .put(&CacheKey::embedding(&entry.id), embedding, Domain::Embedding);
        }
        Ok(record)
    }

    /// Edit an entry's content: counts and fingerprint recomputed, stale
    /// signal invalidated, then re-analyzed.
    pub async fn edit_entry(
        &self,
        user_id: &UserId,
        entry_id: &EntryId,
        content: &str,
    ) -> Result<(EntryRecord, SignalRecord)> {
        let version = self.config.analysis.version();
        let fp = fingerprint(content, &version);
        let entry = self
            .store
            .update_entry_content(user_id, entry_id, content, &fp, &version)
            .map_err(engine_err)?;
        self.cache.apply(&plan(&WriteKind::EntryWrite {
            user: user_id.clone(),
            entry: entry_id.clone(),
            fingerprint: fp,
        }));
        let signal = self.analyze_entry(user_id, entry_id).await?;
        Ok((entry, signal))
    }

    /// Soft-delete: excluded from retrieval and analytics, vector record
    /// removed, caches invalidated.
    #[instrument(skip(self), fields(user = %user_id, entry = %entry_id))]
    pub fn delete_entry(&self, user_id: &UserId, entry_id: &EntryId) -> Result<()> {
        let entry = self
            .store
            .get_entry(user_id, entry_id)
            .map_err(engine_err)?
            .ok_or_else(|| EngineError::not_found(format!("entry {entry_id}")))?;
        self.store
            .soft_delete_entry(user_id, entry_id)
            .map_err(engine_err)?;
        self.vector.remove(user_id, entry_id);
        self.cache.apply(&plan(&WriteKind::EntryDelete {
            user: user_id.clone(),
            entry: entry_id.clone(),
            fingerprint: entry.content_fingerprint,
        }));
        Ok(())
    }

    pub fn get_entry(&self, user_id: &UserId, entry_id: &EntryId) -> Result<EntryRecord> {
        self.store
            .get_entry(user_id, entry_id)
            .map_err(engine_err)?
            .ok_or_else(|| EngineError::not_found(format!("entry {entry_id}")))
    }

    /// Read an entry's signal through the cache.
    ///
    /// A cached record is only served while its version matches the owning
    /// entry — readers may see a stale projection, never a cross-version
    /// signal. The store remains authoritative on a miss.
    pub fn get_entry_signal(
        &self,
        user_id: &UserId,
        entry_id: &EntryId,
    ) -> Result<Option<SignalRecord>> {
        let Some(entry) = self.store.get_entry(user_id, entry_id).map_err(engine_err)? else {
            return Ok(None);
        };
        let key = CacheKey::signal(&entry.content_fingerprint);
        if let Ok(Some(record)) = self.cache.get::<SignalRecord>(&key) {
            if record.analysis_version == entry.analysis_version {
                return Ok(Some(record));
            }
        }
        let signal = self
            .store
            .get_entry_signal(user_id, entry_id)
            .map_err(engine_err)?;
        if let Some(record) = &signal {
            self.cache.put(&key, record, Domain::Signal);
        }
        Ok(signal)
    }

    pub fn list_entries(&self, user_id: &UserId, limit: usize) -> Result<Vec<EntryRecord>> {
        self.store.list_entries(user_id, limit).map_err(engine_err)
    }

    pub fn search_entries(
        &self,
        user_id: &UserId,
        query: &str,
        limit: usize,
    ) -> Result<Vec<EntryRecord>> {
        self.store
            .search_entries(user_id, query, limit)
            .map_err(engine_err)
    }

    // ── Conversation ──────────────────────────────────────────────────────

    pub fn start_session(
        &self,
        user_id: &UserId,
        session_type: SessionType,
        theme: Option<serde_json::Value>,
    ) -> Result<SessionRecord> {
        self.store
            .create_session(user_id, session_type, theme)
            .map_err(engine_err)
    }

    pub fn close_session(&self, user_id: &UserId, session_id: &SessionId) -> Result<()> {
        self.store
            .close_session(user_id, session_id)
            .map_err(engine_err)
    }

    pub fn list_sessions(&self, user_id: &UserId, limit: usize) -> Result<Vec<SessionRecord>> {
        self.store.list_sessions(user_id, limit).map_err(engine_err)
    }

    /// Resolve the typed context for a session — the only shape the
    /// orchestrator accepts.
    pub fn session_context(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<SessionContext> {
        let session = self
            .store
            .get_session(user_id, session_id)
            .map_err(engine_err)?
            .ok_or_else(|| EngineError::not_found(format!("session {session_id}")))?;
        Ok(SessionContext::resolve(
            &self.config,
            user_id.clone(),
            session.id,
            session.session_type,
        ))
    }

    /// Run one conversation turn with the default deadline.
    pub async fn send_message(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        content: &str,
    ) -> Result<TurnOutcome> {
        self.send_message_with_deadline(user_id, session_id, content, self.default_deadline())
            .await
    }

    /// Run one conversation turn; `deadline` covers analysis, retrieval and
    /// generation end-to-end.
    pub async fn send_message_with_deadline(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        content: &str,
        deadline: Duration,
    ) -> Result<TurnOutcome> {
        let ctx = self.session_context(user_id, session_id)?;
        self.orchestrator
            .take_turn_with_deadline(&ctx, content, deadline)
            .await
            .map_err(engine_err)
    }

    fn default_deadline(&self) -> Duration {
        Duration::from_millis(self.config.deadline.default_ms)
    }

    // ── Analytics ─────────────────────────────────────────────────────────

    pub fn mood_trend(&self, user_id: &UserId, window_days: i64) -> Result<MoodTrend> {
        self.analytics
            .mood_trend(user_id, window_days)
            .map_err(engine_err)
    }

    pub fn writing_stats(&self, user_id: &UserId, window_days: i64) -> Result<WritingStats> {
        self.analytics
            .writing_stats(user_id, window_days)
            .map_err(engine_err)
    }

    pub fn topic_distribution(
        &self,
        user_id: &UserId,
        window_days: i64,
    ) -> Result<TopicDistribution> {
        self.analytics
            .topic_distribution(user_id, window_days)
            .map_err(engine_err)
    }

    pub fn patterns(&self, user_id: &UserId, window_days: i64) -> Result<PatternSummary> {
        self.analytics
            .patterns(user_id, window_days)
            .map_err(engine_err)
    }

    pub fn signal_coverage(&self, user_id: &UserId, window_days: i64) -> Result<SignalCoverage> {
        self.analytics
            .signal_coverage(user_id, window_days)
            .map_err(engine_err)
    }

    // ── Maintenance & observability ───────────────────────────────────────

    /// Rebuild the vector index from the signal store on demand.
    pub fn rebuild_vector_index(&self) -> Result<usize> {
        reconcile::rebuild_vectors(&self.store, &self.vector)
    }

    pub fn config(&self) -> &ReverieConfig {
        &self.config
    }

    pub fn runner(&self) -> &Arc<ModelRunner> {
        &self.runner
    }

    pub fn vector(&self) -> &Arc<VectorIndex> {
        &self.vector
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    // ── Internal ──────────────────────────────────────────────────────────

    /// Commit (signal row, vector record) atomically for one entry.
    fn persist_signal(
        &self,
        user_id: &UserId,
        entry: &EntryRecord,
        record: &SignalRecord,
    ) -> Result<()> {
        self.store
            .persist_entry_signal(user_id, &entry.id, record, || match &record.embedding {
                Some(embedding) => self
                    .vector
                    .upsert(user_id, &entry.id, embedding.clone(), entry.created_at)
                    .map_err(|e| e.to_string()),
                // A record without an embedding (embedder down) has nothing
                // to index; the reconciliation sweep picks it up after a
                // successful re-analysis.
                None => Ok(()),
            })
            .map_err(engine_err)
    }
}
