//! The signal domain model: everything the analysis pipeline derives from a
//! piece of text, plus the fixed vocabularies it draws from.
//!
//! Two closed vocabularies live here on purpose. The emotion set and its
//! mapping onto the five-level mood scale must be total — a classifier
//! output that cannot be mapped is a bug, not a new label — and the crisis
//! indicator set is the contract between the extractor and whatever policy
//! layer consumes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::types::AnalysisVersion;

/// Floating-point tolerance for distribution normalization checks.
pub const DISTRIBUTION_EPSILON: f32 = 1e-3;

// ── Mood ──────────────────────────────────────────────────────────────────────

/// Five-level mood scale derived from sentiment and emotion signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoodLabel {
    VeryNegative,
    Negative,
    Neutral,
    Positive,
    VeryPositive,
}

impl MoodLabel {
    /// Derive a mood label from an aggregated sentiment score in `[-1, 1]`.
    ///
    /// Thresholds: ≤ -0.6 very_negative, ≤ -0.2 negative, < 0.2 neutral,
    /// < 0.6 positive, otherwise very_positive.
    pub fn from_score(score: f32) -> Self {
        if score <= -0.6 {
            MoodLabel::VeryNegative
        } else if score <= -0.2 {
            MoodLabel::Negative
        } else if score < 0.2 {
            MoodLabel::Neutral
        } else if score < 0.6 {
            MoodLabel::Positive
        } else {
            MoodLabel::VeryPositive
        }
    }

    /// Derive the final mood label from the aggregated sentiment score and,
    /// when available, the aggregated emotion distribution.
    ///
    /// The score decides the base label; a dominant emotion whose family
    /// disagrees with a `Neutral` base pulls the label one step toward that
    /// family. The emotion distribution never overrides a clearly signed
    /// score — it only breaks neutral ties.
    pub fn from_signals(score: f32, emotions: Option<&EmotionDistribution>) -> Self {
        let base = Self::from_score(score);
        if base != MoodLabel::Neutral {
            return base;
        }
        let Some(dist) = emotions else { return base };
        let Some((dominant, weight)) = dist.dominant() else {
            return base;
        };
        // A weakly dominant emotion is not evidence of anything.
        if weight < 0.35 {
            return base;
        }
        match dominant.family() {
            MoodFamily::Positive => MoodLabel::Positive,
            MoodFamily::Negative => MoodLabel::Negative,
            MoodFamily::Neutral => base,
        }
    }
}

impl fmt::Display for MoodLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MoodLabel::VeryNegative => "very_negative",
            MoodLabel::Negative => "negative",
            MoodLabel::Neutral => "neutral",
            MoodLabel::Positive => "positive",
            MoodLabel::VeryPositive => "very_positive",
        };
        write!(f, "{s}")
    }
}

impl FromStr for MoodLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "very_negative" => Ok(MoodLabel::VeryNegative),
            "negative" => Ok(MoodLabel::Negative),
            "neutral" => Ok(MoodLabel::Neutral),
            "positive" => Ok(MoodLabel::Positive),
            "very_positive" => Ok(MoodLabel::VeryPositive),
            other => Err(format!("unknown mood label: {other}")),
        }
    }
}

/// Coarse family a fine-grained emotion belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoodFamily {
    Positive,
    Negative,
    Neutral,
}

// ── Emotions ──────────────────────────────────────────────────────────────────

/// Closed fine-grained emotion vocabulary.
///
/// The mapping to [`MoodFamily`] is total; `Emotion::ALL` exists so a test
/// can enumerate every variant and prove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Joy,
    Gratitude,
    Love,
    Optimism,
    Relief,
    Surprise,
    Neutral,
    Confusion,
    Anger,
    Sadness,
    Fear,
    Disgust,
    Disappointment,
    Grief,
}

impl Emotion {
    pub const ALL: [Emotion; 14] = [
        Emotion::Joy,
        Emotion::Gratitude,
        Emotion::Love,
        Emotion::Optimism,
        Emotion::Relief,
        Emotion::Surprise,
        Emotion::Neutral,
        Emotion::Confusion,
        Emotion::Anger,
        Emotion::Sadness,
        Emotion::Fear,
        Emotion::Disgust,
        Emotion::Disappointment,
        Emotion::Grief,
    ];

    /// Total mapping from fine-grained emotion to mood family.
    ///
    /// joy/gratitude/love/optimism/relief → positive;
    /// anger/sadness/fear/disgust/disappointment/grief → negative;
    /// surprise/neutral/confusion → neutral.
    pub fn family(self) -> MoodFamily {
        match self {
            Emotion::Joy
            | Emotion::Gratitude
            | Emotion::Love
            | Emotion::Optimism
            | Emotion::Relief => MoodFamily::Positive,
            Emotion::Anger
            | Emotion::Sadness
            | Emotion::Fear
            | Emotion::Disgust
            | Emotion::Disappointment
            | Emotion::Grief => MoodFamily::Negative,
            Emotion::Surprise | Emotion::Neutral | Emotion::Confusion => MoodFamily::Neutral,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Joy => "joy",
            Emotion::Gratitude => "gratitude",
            Emotion::Love => "love",
            Emotion::Optimism => "optimism",
            Emotion::Relief => "relief",
            Emotion::Surprise => "surprise",
            Emotion::Neutral => "neutral",
            Emotion::Confusion => "confusion",
            Emotion::Anger => "anger",
            Emotion::Sadness => "sadness",
            Emotion::Fear => "fear",
            Emotion::Disgust => "disgust",
            Emotion::Disappointment => "disappointment",
            Emotion::Grief => "grief",
        }
    }
}

impl FromStr for Emotion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Emotion::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| format!("unknown emotion: {s}"))
    }
}

/// A probability distribution over the emotion vocabulary.
///
/// Stored as a map so serialization is stable; entries with zero mass are
/// omitted. `normalize` restores the sum-to-one invariant after weighted
/// aggregation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmotionDistribution(pub BTreeMap<Emotion, f32>);

impl EmotionDistribution {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn add(&mut self, emotion: Emotion, weight: f32) {
        *self.0.entry(emotion).or_insert(0.0) += weight;
    }

    /// Rescale so probabilities sum to 1. A zero-mass distribution collapses
    /// to pure `Neutral` rather than dividing by zero.
    pub fn normalize(&mut self) {
        let total: f32 = self.0.values().sum();
        if total <= f32::EPSILON {
            self.0.clear();
            self.0.insert(Emotion::Neutral, 1.0);
            return;
        }
        for v in self.0.values_mut() {
            *v /= total;
        }
    }

    /// True when probabilities sum to 1 within `DISTRIBUTION_EPSILON`.
    pub fn is_normalized(&self) -> bool {
        let total: f32 = self.0.values().sum();
        (total - 1.0).abs() <= DISTRIBUTION_EPSILON
    }

    /// The highest-probability emotion, if any mass is present.
    pub fn dominant(&self) -> Option<(Emotion, f32)> {
        self.0
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(e, p)| (*e, *p))
    }
}

// ── Crisis ────────────────────────────────────────────────────────────────────

/// Closed vocabulary of crisis indicator tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrisisIndicator {
    SelfHarm,
    SuicidalIdeation,
    Hopelessness,
    Isolation,
    Worthlessness,
    SubstanceUse,
    Panic,
    SevereAnxiety,
}

impl CrisisIndicator {
    pub const ALL: [CrisisIndicator; 8] = [
        CrisisIndicator::SelfHarm,
        CrisisIndicator::SuicidalIdeation,
        CrisisIndicator::Hopelessness,
        CrisisIndicator::Isolation,
        CrisisIndicator::Worthlessness,
        CrisisIndicator::SubstanceUse,
        CrisisIndicator::Panic,
        CrisisIndicator::SevereAnxiety,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CrisisIndicator::SelfHarm => "self_harm",
            CrisisIndicator::SuicidalIdeation => "suicidal_ideation",
            CrisisIndicator::Hopelessness => "hopelessness",
            CrisisIndicator::Isolation => "isolation",
            CrisisIndicator::Worthlessness => "worthlessness",
            CrisisIndicator::SubstanceUse => "substance_use",
            CrisisIndicator::Panic => "panic",
            CrisisIndicator::SevereAnxiety => "severe_anxiety",
        }
    }
}

impl FromStr for CrisisIndicator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CrisisIndicator::ALL
            .iter()
            .copied()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| format!("unknown crisis indicator: {s}"))
    }
}

// ── Signal parts ──────────────────────────────────────────────────────────────

/// Aggregated sentiment for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentSignal {
    /// Weighted mean over chunks, saturated to `[-1, 1]`.
    pub score: f32,
    /// Derived once from the aggregated score and emotion distribution.
    pub mood: MoodLabel,
}

/// Aggregated crisis assessment for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrisisSignal {
    /// Weighted mean over chunks, saturated to `[0, 1]`.
    pub score: f32,
    pub indicators: BTreeSet<CrisisIndicator>,
}

/// A single topic tag with the confidence it aggregated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicTag {
    pub tag: String,
    pub confidence: f32,
}

/// Provenance of one chunk that contributed to an aggregated signal.
///
/// Offsets and lengths are byte positions into the original document so the
/// chunking can be audited after the fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkProvenance {
    pub offset: usize,
    pub length: usize,
    pub weight: f32,
}

/// Why an extractor produced no signal for a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorFailure {
    /// Extractor name, e.g. `"crisis"`.
    pub extractor: String,
    pub reason: String,
}

/// The full analytic record derived from one entry or message.
///
/// Any part may be absent when its extractor was unavailable for every chunk;
/// `failures` records why. Consumers must treat an absent part as "not
/// known", never as neutral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub analysis_version: AnalysisVersion,
    pub sentiment: Option<SentimentSignal>,
    pub emotions: Option<EmotionDistribution>,
    pub crisis: Option<CrisisSignal>,
    pub topics: Option<Vec<TopicTag>>,
    /// Unit-norm embedding; dimension is fixed per deployment.
    pub embedding: Option<Vec<f32>>,
    pub provenance: Vec<ChunkProvenance>,
    pub failures: Vec<ExtractorFailure>,
    pub analyzed_at: DateTime<Utc>,
}

impl SignalRecord {
    /// True when at least one extractor was unavailable.
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mood_thresholds_cover_the_scale() {
        assert_eq!(MoodLabel::from_score(-1.0), MoodLabel::VeryNegative);
        assert_eq!(MoodLabel::from_score(-0.6), MoodLabel::VeryNegative);
        assert_eq!(MoodLabel::from_score(-0.3), MoodLabel::Negative);
        assert_eq!(MoodLabel::from_score(0.0), MoodLabel::Neutral);
        assert_eq!(MoodLabel::from_score(0.3), MoodLabel::Positive);
        assert_eq!(MoodLabel::from_score(0.6), MoodLabel::VeryPositive);
        assert_eq!(MoodLabel::from_score(1.0), MoodLabel::VeryPositive);
    }

    /// Every emotion in the vocabulary must map to a family — a new variant
    /// without a mapping should fail here, not at runtime.
    #[test]
    fn emotion_to_mood_mapping_is_total() {
        for emotion in Emotion::ALL {
            // family() is a total match; calling it per variant is the proof.
            let _ = emotion.family();
            // Round-trip through the string form used in stored JSON.
            let parsed: Emotion = emotion.as_str().parse().unwrap();
            assert_eq!(parsed, emotion);
        }
        assert_eq!(Emotion::Joy.family(), MoodFamily::Positive);
        assert_eq!(Emotion::Sadness.family(), MoodFamily::Negative);
        assert_eq!(Emotion::Surprise.family(), MoodFamily::Neutral);
    }

    #[test]
    fn dominant_negative_emotion_breaks_neutral_tie() {
        let mut dist = EmotionDistribution::new();
        dist.add(Emotion::Sadness, 0.6);
        dist.add(Emotion::Neutral, 0.4);
        assert_eq!(
            MoodLabel::from_signals(0.05, Some(&dist)),
            MoodLabel::Negative
        );
        // A clearly signed score is never overridden by emotions.
        assert_eq!(
            MoodLabel::from_signals(0.5, Some(&dist)),
            MoodLabel::Positive
        );
    }

    #[test]
    fn normalize_restores_unit_mass() {
        let mut dist = EmotionDistribution::new();
        dist.add(Emotion::Joy, 2.0);
        dist.add(Emotion::Fear, 6.0);
        dist.normalize();
        assert!(dist.is_normalized());
        assert_eq!(dist.dominant().unwrap().0, Emotion::Fear);
    }

    #[test]
    fn empty_distribution_normalizes_to_neutral() {
        let mut dist = EmotionDistribution::new();
        dist.normalize();
        assert!(dist.is_normalized());
        assert_eq!(dist.dominant().unwrap().0, Emotion::Neutral);
    }
}
