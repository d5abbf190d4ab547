//! Per-chunk signal extraction.
//!
//! Each extractor sends one chunk through the model runner and interprets
//! the classifier output into a typed signal plus a confidence in `[0, 1]`.
//! Interpretation enforces the closed vocabularies: an emotion label outside
//! the vocabulary folds into `neutral`, an unknown crisis tag is dropped —
//! raw model labels never leak into stored signals.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use reverie_core::signal::{CrisisIndicator, Emotion, EmotionDistribution, TopicTag};
use reverie_models::{LabelScore, ModelError, ModelInput, ModelOutput, ModelRunner};
use tracing::debug;

/// Per-indicator score at or above which a crisis tag is attached.
const INDICATOR_THRESHOLD: f32 = 0.5;

/// A per-chunk extractor result with its confidence.
#[derive(Debug, Clone)]
pub struct ChunkScore<T> {
    pub value: T,
    pub confidence: f32,
}

/// Model names the pipeline resolves through the runner.
#[derive(Debug, Clone)]
pub struct ExtractorModels {
    pub sentiment: String,
    pub emotion: String,
    pub crisis: String,
    pub topics: String,
    pub embedding: String,
}

impl Default for ExtractorModels {
    fn default() -> Self {
        Self {
            sentiment: "sentiment".to_string(),
            emotion: "emotion".to_string(),
            crisis: "crisis".to_string(),
            topics: "topics".to_string(),
            embedding: "embedding".to_string(),
        }
    }
}

/// The extractor set bound to a runner. Deadlines are passed per call so
/// callers can propagate the remainder of their own budget.
pub struct Extractors {
    runner: Arc<ModelRunner>,
    models: ExtractorModels,
}

impl Extractors {
    pub fn new(runner: Arc<ModelRunner>, models: ExtractorModels) -> Self {
        Self { runner, models }
    }

    async fn labels(
        &self,
        model: &str,
        text: &str,
        deadline: Duration,
    ) -> Result<Vec<LabelScore>, ModelError> {
        match self
            .runner
            .infer(model, ModelInput::Text(text.to_string()), deadline)
            .await?
        {
            ModelOutput::Labels(labels) => Ok(labels),
            other => Err(ModelError::Fault(format!(
                "model '{model}' returned unexpected output shape: {other:?}"
            ))),
        }
    }

    /// Sentiment score in `[-1, 1]` from a positive/negative/neutral
    /// classifier head. Confidence is the strongest head probability.
    pub async fn sentiment(
        &self,
        text: &str,
        deadline: Duration,
    ) -> Result<ChunkScore<f32>, ModelError> {
        let labels = self.labels(&self.models.sentiment, text, deadline).await?;
        let get = |name: &str| {
            labels
                .iter()
                .find(|l| l.label == name)
                .map(|l| l.score)
                .unwrap_or(0.0)
        };
        let score = (get("positive") - get("negative")).clamp(-1.0, 1.0);
        let confidence = labels
            .iter()
            .map(|l| l.score)
            .fold(0.0f32, f32::max)
            .clamp(0.0, 1.0);
        Ok(ChunkScore {
            value: score,
            confidence,
        })
    }

    /// Emotion distribution over the closed vocabulary. Unknown classifier
    /// labels fold into `neutral` so downstream mood mapping stays total.
    pub async fn emotions(
        &self,
        text: &str,
        deadline: Duration,
    ) -> Result<ChunkScore<EmotionDistribution>, ModelError> {
        let labels = self.labels(&self.models.emotion, text, deadline).await?;
        let mut dist = EmotionDistribution::new();
        for label in &labels {
            match label.label.parse::<Emotion>() {
                Ok(emotion) => dist.add(emotion, label.score.max(0.0)),
                Err(_) => {
                    debug!(label = %label.label, "emotion label outside vocabulary; folded into neutral");
                    dist.add(Emotion::Neutral, label.score.max(0.0));
                }
            }
        }
        dist.normalize();
        let confidence = dist.dominant().map(|(_, p)| p).unwrap_or(0.0);
        Ok(ChunkScore {
            value: dist,
            confidence,
        })
    }

    /// Crisis score in `[0, 1]` plus the indicator tags at or above the
    /// attachment threshold. Unknown tags are dropped — the vocabulary is
    /// closed by contract.
    pub async fn crisis(
        &self,
        text: &str,
        deadline: Duration,
    ) -> Result<ChunkScore<(f32, BTreeSet<CrisisIndicator>)>, ModelError> {
        let labels = self.labels(&self.models.crisis, text, deadline).await?;
        let mut indicators = BTreeSet::new();
        let mut score = 0.0f32;
        for label in &labels {
            let Ok(indicator) = label.label.parse::<CrisisIndicator>() else {
                debug!(label = %label.label, "crisis tag outside vocabulary; dropped");
                continue;
            };
            score = score.max(label.score);
            if label.score >= INDICATOR_THRESHOLD {
                indicators.insert(indicator);
            }
        }
        Ok(ChunkScore {
            value: (score.clamp(0.0, 1.0), indicators),
            confidence: 1.0,
        })
    }

    /// Ranked topic tags with confidences.
    pub async fn topics(
        &self,
        text: &str,
        deadline: Duration,
    ) -> Result<ChunkScore<Vec<TopicTag>>, ModelError> {
        let labels = self.labels(&self.models.topics, text, deadline).await?;
        let tags = labels
            .into_iter()
            .map(|l| TopicTag {
                tag: l.label,
                confidence: l.score.clamp(0.0, 1.0),
            })
            .collect();
        Ok(ChunkScore {
            value: tags,
            confidence: 1.0,
        })
    }

    /// Unit-norm embedding for one chunk.
    pub async fn embed(
        &self,
        text: &str,
        deadline: Duration,
    ) -> Result<ChunkScore<Vec<f32>>, ModelError> {
        match self
            .runner
            .infer(
                &self.models.embedding,
                ModelInput::Text(text.to_string()),
                deadline,
            )
            .await?
        {
            ModelOutput::Embedding(v) => Ok(ChunkScore {
                value: v,
                confidence: 1.0,
            }),
            other => Err(ModelError::Fault(format!(
                "embedding model returned unexpected output shape: {other:?}"
            ))),
        }
    }
}
