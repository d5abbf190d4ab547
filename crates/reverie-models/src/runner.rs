//! The model runner: registry lookup, lazy single-flight loading, degraded
//! state with background reload, per-model concurrency limits, pre-call
//! length guard and deadline enforcement.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reverie_core::config::{BackendKind, ModelSpec, ReverieConfig};
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};

use crate::backend::{InferenceBackend, ModelError, ModelInput, ModelOutput};
use crate::estimate::{estimate_tokens, truncate_to_tokens};
use crate::http::HttpBackend;
use crate::lexicon::{
    CrisisLexicon, EmotionLexicon, HashEmbedder, SentimentLexicon, TemplateResponder, TopicLexicon,
};

/// Delay before the background reload of a degraded model.
const RELOAD_BACKOFF: Duration = Duration::from_millis(250);

struct ModelEntry {
    spec: ModelSpec,
    /// Embedding dimension, needed to rebuild hash-projection backends.
    dimension: usize,
    /// Lazy-load slot. The async mutex doubles as the per-model load lock:
    /// concurrent cold callers queue here and reuse the loaded instance.
    slot: Mutex<Option<Arc<dyn InferenceBackend>>>,
    /// Bounds concurrent calls to protect accelerator memory.
    semaphore: Arc<Semaphore>,
    /// While set, callers fail fast with `ModelFault` until the background
    /// reload clears it.
    degraded: AtomicBool,
    calls: AtomicU64,
    faults: AtomicU64,
}

impl ModelEntry {
    fn new(spec: ModelSpec, dimension: usize) -> Self {
        let permits = spec.max_concurrent_calls.max(1);
        Self {
            spec,
            dimension,
            slot: Mutex::new(None),
            semaphore: Arc::new(Semaphore::new(permits)),
            degraded: AtomicBool::new(false),
            calls: AtomicU64::new(0),
            faults: AtomicU64::new(0),
        }
    }

    async fn ensure_loaded(&self) -> Result<Arc<dyn InferenceBackend>, ModelError> {
        let mut slot = self.slot.lock().await;
        if let Some(backend) = slot.as_ref() {
            return Ok(backend.clone());
        }
        let backend = build_backend(&self.spec, self.dimension)?;
        info!(model = %self.spec.name, backend = backend.name(), "model loaded");
        *slot = Some(backend.clone());
        Ok(backend)
    }
}

fn build_backend(
    spec: &ModelSpec,
    dimension: usize,
) -> Result<Arc<dyn InferenceBackend>, ModelError> {
    Ok(match spec.backend {
        BackendKind::LexiconSentiment => Arc::new(SentimentLexicon),
        BackendKind::LexiconEmotion => Arc::new(EmotionLexicon),
        BackendKind::LexiconCrisis => Arc::new(CrisisLexicon),
        BackendKind::LexiconTopics => Arc::new(TopicLexicon),
        BackendKind::HashEmbedding => Arc::new(HashEmbedder::new(dimension)),
        BackendKind::TemplateGeneration => Arc::new(TemplateResponder),
        BackendKind::Http => {
            let endpoint = spec.endpoint.clone().ok_or_else(|| {
                ModelError::Unavailable(format!("model '{}' has no endpoint", spec.name))
            })?;
            let remote = spec
                .remote_model
                .clone()
                .unwrap_or_else(|| spec.name.clone());
            Arc::new(HttpBackend::new(endpoint, remote))
        }
    })
}

/// Process-wide host for the fixed set of named inference models.
///
/// Built once by the composition root from configuration; shared via `Arc`.
/// Entries are immutable after construction; only their load slots and
/// degraded flags change.
pub struct ModelRunner {
    registry: HashMap<String, Arc<ModelEntry>>,
}

impl ModelRunner {
    pub fn from_config(config: &ReverieConfig) -> Self {
        let registry = config
            .models
            .iter()
            .map(|spec| {
                (
                    spec.name.clone(),
                    Arc::new(ModelEntry::new(spec.clone(), config.vector.dimension)),
                )
            })
            .collect();
        Self { registry }
    }

    /// Replace (or add) a model with an already-constructed backend.
    ///
    /// Used by tests to inject failing or instrumented backends, and by
    /// deployments that build a backend outside the standard registry kinds.
    pub fn register(&mut self, spec: ModelSpec, backend: Arc<dyn InferenceBackend>) {
        let entry = Arc::new(ModelEntry::new(spec.clone(), 0));
        // Pre-populate the slot so the injected backend is what gets called.
        *entry.slot.try_lock().expect("fresh entry is uncontended") = Some(backend);
        self.registry.insert(spec.name, entry);
    }

    /// Run one inference with a deadline covering queueing, loading and the
    /// model call itself.
    pub async fn infer(
        &self,
        model: &str,
        input: ModelInput,
        deadline: Duration,
    ) -> Result<ModelOutput, ModelError> {
        let entry = self
            .registry
            .get(model)
            .ok_or_else(|| ModelError::Unavailable(model.to_string()))?
            .clone();

        if entry.degraded.load(Ordering::Acquire) {
            return Err(ModelError::Fault(format!(
                "model '{model}' is degraded; reload in progress"
            )));
        }

        let started = Instant::now();

        // Shed the caller if the per-model permit doesn't arrive in time.
        let permit = tokio::time::timeout(deadline, entry.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| ModelError::Cancelled)?
            .map_err(|_| ModelError::Fault("model semaphore closed".to_string()))?;

        let input = apply_length_guard(input, entry.spec.max_input_tokens)?;
        let backend = entry.ensure_loaded().await?;

        let remaining = deadline.saturating_sub(started.elapsed());
        entry.calls.fetch_add(1, Ordering::Relaxed);
        let result = tokio::time::timeout(remaining, backend.infer(&input)).await;
        drop(permit);

        match result {
            // Deadline hit mid-call: the future is dropped (detached) and the
            // caller sees Cancelled.
            Err(_) => Err(ModelError::Cancelled),
            Ok(Err(ModelError::Fault(msg))) => {
                entry.faults.fetch_add(1, Ordering::Relaxed);
                self.degrade_and_reload(&entry);
                Err(ModelError::Fault(msg))
            }
            Ok(other) => other,
        }
    }

    /// Ensure a model is loaded without running inference.
    pub async fn warm(&self, model: &str) -> Result<(), ModelError> {
        let entry = self
            .registry
            .get(model)
            .ok_or_else(|| ModelError::Unavailable(model.to_string()))?;
        entry.ensure_loaded().await.map(|_| ())
    }

    /// Release a model's resources; subsequent calls reload lazily.
    pub async fn evict(&self, model: &str) -> Result<(), ModelError> {
        let entry = self
            .registry
            .get(model)
            .ok_or_else(|| ModelError::Unavailable(model.to_string()))?;
        let mut slot = entry.slot.lock().await;
        if slot.take().is_some() {
            info!(model, "model evicted");
        }
        Ok(())
    }

    /// Total inference calls dispatched to a model since startup. Exposed for
    /// instrumentation; tests use it to assert single-flight behavior.
    pub fn call_count(&self, model: &str) -> u64 {
        self.registry
            .get(model)
            .map(|e| e.calls.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Total device faults observed for a model since startup.
    pub fn fault_count(&self, model: &str) -> u64 {
        self.registry
            .get(model)
            .map(|e| e.faults.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Mark the entry degraded and schedule an evict-and-reload.
    fn degrade_and_reload(&self, entry: &Arc<ModelEntry>) {
        if entry.degraded.swap(true, Ordering::AcqRel) {
            return; // reload already scheduled
        }
        warn!(model = %entry.spec.name, "model degraded; scheduling reload");
        let entry = entry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(RELOAD_BACKOFF).await;
            let mut slot = entry.slot.lock().await;
            *slot = None;
            match build_backend(&entry.spec, entry.dimension) {
                Ok(backend) => {
                    *slot = Some(backend);
                    info!(model = %entry.spec.name, "model reloaded after fault");
                }
                Err(e) => {
                    // Leave the slot empty; the next call retries the load
                    // and surfaces the build error itself.
                    warn!(model = %entry.spec.name, error = %e, "model reload failed");
                }
            }
            entry.degraded.store(false, Ordering::Release);
        });
    }
}

/// Truncate over-budget inputs before they can reach a model.
///
/// After truncation the estimate must fit; a remaining overflow is a bug in
/// the guard and surfaces as `InputTooLarge`.
fn apply_length_guard(input: ModelInput, budget: usize) -> Result<ModelInput, ModelError> {
    let tokens = estimate_tokens(input.guarded_text());
    if tokens <= budget {
        return Ok(input);
    }
    let truncated = truncate_to_tokens(input.guarded_text(), budget).to_string();
    let remaining = estimate_tokens(&truncated);
    if remaining > budget {
        return Err(ModelError::InputTooLarge {
            tokens: remaining,
            budget,
        });
    }
    Ok(input.with_guarded_text(truncated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LabelScore;
    use crate::testing::{CountingBackend, FailingBackend};
    use reverie_core::config::DevicePreference;

    fn spec(name: &str, backend: BackendKind) -> ModelSpec {
        ModelSpec {
            name: name.to_string(),
            backend,
            endpoint: None,
            remote_model: None,
            max_input_tokens: 512,
            max_concurrent_calls: 2,
            device: DevicePreference::Auto,
        }
    }

    fn runner_with(name: &str, backend: Arc<dyn InferenceBackend>) -> ModelRunner {
        let mut runner = ModelRunner::from_config(&ReverieConfig::default());
        runner.register(spec(name, BackendKind::LexiconSentiment), backend);
        runner
    }

    #[tokio::test]
    async fn unknown_model_is_unavailable() {
        let runner = ModelRunner::from_config(&ReverieConfig::default());
        let err = runner
            .infer(
                "nope",
                ModelInput::Text("x".to_string()),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Unavailable(_)));
    }

    #[tokio::test]
    async fn over_budget_input_is_truncated_not_rejected() {
        let counting = Arc::new(CountingBackend::new(ModelOutput::Labels(vec![
            LabelScore::new("neutral", 1.0),
        ])));
        let runner = runner_with("probe", counting.clone());

        let huge = "word ".repeat(10_000);
        runner
            .infer("probe", ModelInput::Text(huge), Duration::from_secs(1))
            .await
            .unwrap();

        let seen = counting.last_input_len();
        assert!(seen > 0 && seen <= 512 * crate::estimate::CHARS_PER_TOKEN);
    }

    #[tokio::test]
    async fn fault_marks_model_degraded_until_reloaded() {
        let runner = runner_with("crisis", Arc::new(FailingBackend::new("gpu oom")));

        let err = runner
            .infer(
                "crisis",
                ModelInput::Text("hello".to_string()),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Fault(_)));
        assert_eq!(runner.fault_count("crisis"), 1);

        // While degraded, callers fail fast without reaching the backend.
        let err = runner
            .infer(
                "crisis",
                ModelInput::Text("hello".to_string()),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Fault(_)));
        assert_eq!(runner.call_count("crisis"), 1);

        // After the reload backoff the registry-built backend takes over.
        tokio::time::sleep(RELOAD_BACKOFF * 3).await;
        runner
            .infer(
                "crisis",
                ModelInput::Text("hello".to_string()),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn warm_then_evict_round_trip() {
        let runner = ModelRunner::from_config(&ReverieConfig::default());
        runner.warm("sentiment").await.unwrap();
        runner.evict("sentiment").await.unwrap();
        // Evicted models reload lazily on the next call.
        runner
            .infer(
                "sentiment",
                ModelInput::Text("a calm day".to_string()),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(runner.call_count("sentiment"), 1);
    }

    #[tokio::test]
    async fn call_count_tracks_dispatches() {
        let runner = ModelRunner::from_config(&ReverieConfig::default());
        for _ in 0..3 {
            runner
                .infer(
                    "embedding",
                    ModelInput::Text("counted".to_string()),
                    Duration::from_secs(1),
                )
                .await
                .unwrap();
        }
        assert_eq!(runner.call_count("embedding"), 3);
    }
}
