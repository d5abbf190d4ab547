//! The document analysis pipeline: chunk, extract per chunk, fold.
//!
//! Extractor faults are caught here and degrade to a partial signal record;
//! only an all-extractors failure or a cancellation surfaces as an error.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reverie_core::config::ReverieConfig;
use reverie_core::signal::{
    CrisisSignal, ExtractorFailure, MoodLabel, SentimentSignal, SignalRecord,
};
use reverie_core::types::AnalysisVersion;
use reverie_models::{ModelError, ModelRunner};
use tracing::{debug, instrument, warn};

use crate::aggregate;
use crate::chunker::Chunker;
use crate::error::AnalysisError;
use crate::extract::{ExtractorModels, Extractors};

pub struct AnalysisPipeline {
    chunker: Chunker,
    extractors: Extractors,
    topic_k: usize,
    version: AnalysisVersion,
    default_deadline: Duration,
}

impl AnalysisPipeline {
    pub fn new(runner: Arc<ModelRunner>, config: &ReverieConfig) -> Result<Self, AnalysisError> {
        let chunker = Chunker::from_config(&config.chunk)?;
        Ok(Self {
            chunker,
            extractors: Extractors::new(runner, ExtractorModels::default()),
            topic_k: config.analysis.topic_k,
            version: config.analysis.version(),
            default_deadline: Duration::from_millis(config.deadline.default_ms),
        })
    }

    pub fn version(&self) -> &AnalysisVersion {
        &self.version
    }

    /// Analyze with the configured default deadline.
    pub async fn analyze(&self, text: &str) -> Result<SignalRecord, AnalysisError> {
        self.analyze_with_deadline(text, self.default_deadline).await
    }

    /// Analyze one document into a signal record, spending at most
    /// `deadline` across the whole run.
    ///
    /// Returns `EmptyInput` for empty/whitespace-only text, `Cancelled` when
    /// the deadline fires mid-run, `TotalFailure` when no extractor produced
    /// anything. Anything else is a (possibly partial) record.
    #[instrument(skip(self, text), fields(len = text.len()))]
    pub async fn analyze_with_deadline(
        &self,
        text: &str,
        deadline: Duration,
    ) -> Result<SignalRecord, AnalysisError> {
        if text.trim().is_empty() {
            return Err(AnalysisError::EmptyInput);
        }
        let started = std::time::Instant::now();
        let chunks = self.chunker.chunk(text);
        debug!(chunks = chunks.len(), "document chunked");

        let mut failures: Vec<ExtractorFailure> = Vec::new();

        // Run one extractor across every chunk, collecting per-chunk results.
        // A chunk-level fault drops that chunk from the fold; a fault on every
        // chunk marks the whole extractor unavailable. Cancellation aborts.
        macro_rules! per_chunk {
            ($name:literal, $method:ident) => {{
                let mut scores = Vec::with_capacity(chunks.len());
                let mut last_err: Option<String> = None;
                for chunk in &chunks {
                    let remaining = deadline.saturating_sub(started.elapsed());
                    if remaining.is_zero() {
                        return Err(AnalysisError::Cancelled);
                    }
                    match self.extractors.$method(&chunk.text, remaining).await {
                        Ok(s) => scores.push(Some(s)),
                        Err(ModelError::Cancelled) => return Err(AnalysisError::Cancelled),
                        Err(e) => {
                            last_err = Some(e.to_string());
                            scores.push(None);
                        }
                    }
                }
                if scores.iter().all(Option::is_none) {
                    let reason = last_err.unwrap_or_else(|| "unknown".to_string());
                    warn!(extractor = $name, %reason, "extractor unavailable for every chunk");
                    failures.push(ExtractorFailure {
                        extractor: $name.to_string(),
                        reason,
                    });
                }
                scores
            }};
        }

        let sentiment_scores = per_chunk!("sentiment", sentiment);
        let emotion_scores = per_chunk!("emotion", emotions);
        let crisis_scores = per_chunk!("crisis", crisis);
        let topic_scores = per_chunk!("topics", topics);
        let embed_scores = per_chunk!("embedding", embed);

        let emotions = aggregate::emotions(&chunks, &emotion_scores);
        let sentiment = aggregate::scalar(&chunks, &sentiment_scores, -1.0, 1.0).map(|score| {
            SentimentSignal {
                score,
                mood: MoodLabel::from_signals(score, emotions.as_ref()),
            }
        });
        let crisis = aggregate::crisis(&chunks, &crisis_scores)
            .map(|(score, indicators)| CrisisSignal { score, indicators });
        let topics = aggregate::topics(&chunks, &topic_scores, self.topic_k);
        let embedding = aggregate::embedding(&embed_scores);

        if sentiment.is_none()
            && emotions.is_none()
            && crisis.is_none()
            && topics.is_none()
            && embedding.is_none()
        {
            let reason = failures
                .first()
                .map(|f| f.reason.clone())
                .unwrap_or_else(|| "no extractor produced a signal".to_string());
            return Err(AnalysisError::TotalFailure(reason));
        }

        Ok(SignalRecord {
            analysis_version: self.version.clone(),
            sentiment,
            emotions,
            crisis,
            topics,
            embedding,
            provenance: aggregate::provenance(&chunks),
            failures,
            analyzed_at: Utc::now(),
        })
    }
}
