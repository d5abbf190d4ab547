use std::collections::BTreeMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, ErrorKind};
use crate::types::AnalysisVersion;

/// Top-level config (reverie.toml + REVERIE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverieConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub chunk: ChunkConfig,
    #[serde(default)]
    pub fingerprint: FingerprintConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub crisis: CrisisConfig,
    #[serde(default)]
    pub deadline: DeadlineConfig,
    /// Deployment-time model registry; changing a model's identity implies an
    /// `analysis.version` bump.
    #[serde(default = "default_models")]
    pub models: Vec<ModelSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Chunker windowing. Defaults size a window so ~300 tokens fit any
/// classifier with a 512-token ceiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Character budget per window.
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    /// Character overlap between adjacent windows.
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            size: default_chunk_size(),
            overlap: default_chunk_overlap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintConfig {
    /// Cache lifetime of an analysis result, in seconds.
    #[serde(default = "default_fingerprint_ttl")]
    pub ttl_secs: u64,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_fingerprint_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    #[serde(default)]
    pub lru: LruConfig,
    #[serde(default)]
    pub shared: SharedCacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LruConfig {
    #[serde(default = "default_lru_entries")]
    pub capacity_entries: usize,
    #[serde(default = "default_lru_bytes")]
    pub capacity_bytes: usize,
}

impl Default for LruConfig {
    fn default() -> Self {
        Self {
            capacity_entries: default_lru_entries(),
            capacity_bytes: default_lru_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedCacheConfig {
    #[serde(default = "default_shared_cache_path")]
    pub path: String,
    #[serde(default)]
    pub ttl: SharedTtlConfig,
}

impl Default for SharedCacheConfig {
    fn default() -> Self {
        Self {
            path: default_shared_cache_path(),
            ttl: SharedTtlConfig::default(),
        }
    }
}

/// Per-domain TTLs for the shared tier, in seconds. Transient projections are
/// short, signals medium; embeddings are effectively permanent and fall only
/// to explicit invalidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedTtlConfig {
    #[serde(default = "default_ttl_analytics")]
    pub analytics_secs: u64,
    #[serde(default = "default_ttl_signals")]
    pub signals_secs: u64,
    #[serde(default = "default_ttl_embeddings")]
    pub embeddings_secs: u64,
    #[serde(default = "default_ttl_retrieval")]
    pub retrieval_secs: u64,
}

impl Default for SharedTtlConfig {
    fn default() -> Self {
        Self {
            analytics_secs: default_ttl_analytics(),
            signals_secs: default_ttl_signals(),
            embeddings_secs: default_ttl_embeddings(),
            retrieval_secs: default_ttl_retrieval(),
        }
    }
}

/// Retrieval defaults, overridable per session type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Entries pulled by vector similarity.
    #[serde(default = "default_retrieval_k")]
    pub k: usize,
    /// Recent messages pulled from the current session.
    #[serde(default = "default_retrieval_recent_n")]
    pub recent_n: usize,
    /// Token budget for the merged context.
    #[serde(default = "default_retrieval_budget")]
    pub token_budget: usize,
    /// Per-session-type overrides, keyed by the session type's wire name.
    #[serde(default)]
    pub overrides: BTreeMap<String, RetrievalOverride>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_retrieval_k(),
            recent_n: default_retrieval_recent_n(),
            token_budget: default_retrieval_budget(),
            overrides: BTreeMap::new(),
        }
    }
}

/// Partial retrieval override for one session type.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetrievalOverride {
    pub k: Option<usize>,
    pub recent_n: Option<usize>,
    pub token_budget: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Opaque identifier folded into every fingerprint.
    #[serde(default = "default_analysis_version")]
    pub version: String,
    /// Worker tasks consuming analysis jobs.
    #[serde(default = "default_analysis_workers")]
    pub workers: usize,
    /// Bounded queue depth before new runs are shed with `Overloaded`.
    #[serde(default = "default_analysis_queue")]
    pub queue_depth: usize,
    /// Top-K topic tags kept after aggregation.
    #[serde(default = "default_topic_k")]
    pub topic_k: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            version: default_analysis_version(),
            workers: default_analysis_workers(),
            queue_depth: default_analysis_queue(),
            topic_k: default_topic_k(),
        }
    }
}

impl AnalysisConfig {
    pub fn version(&self) -> AnalysisVersion {
        AnalysisVersion(self.version.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    /// Embedding dimension, fixed per deployment and recorded alongside the
    /// analysis version.
    #[serde(default = "default_vector_dimension")]
    pub dimension: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            dimension: default_vector_dimension(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrisisConfig {
    /// Score at or above which a turn is flagged for the external crisis
    /// policy (inclusive).
    #[serde(default = "default_crisis_threshold")]
    pub threshold: f32,
}

impl Default for CrisisConfig {
    fn default() -> Self {
        Self {
            threshold: default_crisis_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlineConfig {
    #[serde(default = "default_deadline_ms")]
    pub default_ms: u64,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            default_ms: default_deadline_ms(),
        }
    }
}

// ── Model registry ────────────────────────────────────────────────────────────

/// One named model in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Registry name, e.g. "sentiment" or "generation".
    pub name: String,
    pub backend: BackendKind,
    /// Base URL for the `http` backend; ignored otherwise.
    pub endpoint: Option<String>,
    /// Remote model identifier for the `http` backend.
    pub remote_model: Option<String>,
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_calls: usize,
    #[serde(default)]
    pub device: DevicePreference,
}

/// Which backend implementation serves a model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Deterministic in-process lexicon valence scorer.
    LexiconSentiment,
    /// Deterministic in-process emotion classifier.
    LexiconEmotion,
    /// Deterministic in-process crisis indicator scorer.
    LexiconCrisis,
    /// Deterministic in-process keyword topic tagger.
    LexiconTopics,
    /// Deterministic hash-projection embedder.
    HashEmbedding,
    /// Deterministic template responder (offline generation fallback).
    TemplateGeneration,
    /// OpenAI-compatible HTTP inference server.
    Http,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl Default for ReverieConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            chunk: ChunkConfig::default(),
            fingerprint: FingerprintConfig::default(),
            cache: CacheConfig::default(),
            retrieval: RetrievalConfig::default(),
            analysis: AnalysisConfig::default(),
            vector: VectorConfig::default(),
            crisis: CrisisConfig::default(),
            deadline: DeadlineConfig::default(),
            models: default_models(),
        }
    }
}

impl ReverieConfig {
    /// Load config from a TOML file with REVERIE_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ReverieConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("REVERIE_").split("_"))
            .extract()
            .map_err(|e| EngineError::new(ErrorKind::InputInvalid, e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks figment cannot express.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.chunk.size == 0 {
            return Err(EngineError::input_invalid("chunk.size must be > 0"));
        }
        if self.chunk.overlap >= self.chunk.size {
            return Err(EngineError::input_invalid(format!(
                "chunk.overlap ({}) must be smaller than chunk.size ({})",
                self.chunk.overlap, self.chunk.size
            )));
        }
        if !(0.0..=1.0).contains(&self.crisis.threshold) {
            return Err(EngineError::input_invalid(
                "crisis.threshold must be within [0, 1]",
            ));
        }
        if self.analysis.workers == 0 {
            return Err(EngineError::input_invalid("analysis.workers must be > 0"));
        }
        if self.vector.dimension == 0 {
            return Err(EngineError::input_invalid("vector.dimension must be > 0"));
        }
        for spec in &self.models {
            if spec.backend == BackendKind::Http && spec.endpoint.is_none() {
                return Err(EngineError::input_invalid(format!(
                    "model '{}' uses the http backend but has no endpoint",
                    spec.name
                )));
            }
        }
        Ok(())
    }

    /// Effective retrieval parameters for a session type.
    pub fn retrieval_for(&self, session_type: &str) -> (usize, usize, usize) {
        let base = &self.retrieval;
        match base.overrides.get(session_type) {
            Some(o) => (
                o.k.unwrap_or(base.k),
                o.recent_n.unwrap_or(base.recent_n),
                o.token_budget.unwrap_or(base.token_budget),
            ),
            None => (base.k, base.recent_n, base.token_budget),
        }
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.reverie/reverie.db")
}
fn default_shared_cache_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.reverie/cache.redb")
}
fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.reverie/reverie.toml")
}
fn default_chunk_size() -> usize {
    1200
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_fingerprint_ttl() -> u64 {
    3600
}
fn default_lru_entries() -> usize {
    1024
}
fn default_lru_bytes() -> usize {
    32 * 1024 * 1024
}
fn default_ttl_analytics() -> u64 {
    300
}
fn default_ttl_signals() -> u64 {
    6 * 3600
}
fn default_ttl_embeddings() -> u64 {
    365 * 24 * 3600
}
fn default_ttl_retrieval() -> u64 {
    120
}
fn default_retrieval_k() -> usize {
    5
}
fn default_retrieval_recent_n() -> usize {
    10
}
fn default_retrieval_budget() -> usize {
    2048
}
fn default_analysis_version() -> String {
    "v3".to_string()
}
fn default_analysis_workers() -> usize {
    2
}
fn default_analysis_queue() -> usize {
    64
}
fn default_topic_k() -> usize {
    5
}
fn default_vector_dimension() -> usize {
    256
}
fn default_crisis_threshold() -> f32 {
    0.7
}
fn default_deadline_ms() -> u64 {
    30_000
}
fn default_max_input_tokens() -> usize {
    512
}
fn default_max_concurrent() -> usize {
    2
}

/// Default registry: the deterministic in-process backends, one per task.
fn default_models() -> Vec<ModelSpec> {
    let spec = |name: &str, backend: BackendKind| ModelSpec {
        name: name.to_string(),
        backend,
        endpoint: None,
        remote_model: None,
        max_input_tokens: default_max_input_tokens(),
        max_concurrent_calls: default_max_concurrent(),
        device: DevicePreference::Auto,
    };
    vec![
        spec("sentiment", BackendKind::LexiconSentiment),
        spec("emotion", BackendKind::LexiconEmotion),
        spec("crisis", BackendKind::LexiconCrisis),
        spec("topics", BackendKind::LexiconTopics),
        spec("embedding", BackendKind::HashEmbedding),
        spec("generation", BackendKind::TemplateGeneration),
    ]
}
