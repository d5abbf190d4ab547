//! Deterministic in-process backends.
//!
//! These are intentionally rough models: keyword and phrase lexicons tuned
//! for journaling prose, a hash-projection embedder, and a template
//! responder. They exist so the engine runs (and tests run) with no external
//! inference server, and so that every pipeline test is reproducible. Given
//! identical input they produce identical output; none of them reads mutable
//! state.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::backend::{
    GeneratedText, InferenceBackend, LabelScore, ModelError, ModelInput, ModelOutput,
};
use crate::estimate::estimate_tokens;

fn text_input<'a>(input: &'a ModelInput, backend: &str) -> Result<&'a str, ModelError> {
    match input {
        ModelInput::Text(t) => Ok(t),
        ModelInput::Chat(_) => Err(ModelError::Unavailable(format!(
            "{backend} serves text inputs, not chat prompts"
        ))),
    }
}

/// Lowercased alphanumeric word stream shared by all lexicon scorers.
fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(|w| w.trim_matches('\'').to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

const NEGATIONS: &[&str] = &["not", "no", "never", "without", "can't", "cannot", "don't"];

/// True when a negation token appears in the two words before index `i`.
fn negated(tokens: &[String], i: usize) -> bool {
    tokens[i.saturating_sub(2)..i]
        .iter()
        .any(|w| NEGATIONS.contains(&w.as_str()))
}

// ── Sentiment ─────────────────────────────────────────────────────────────────

const POSITIVE_WORDS: &[&str] = &[
    "calm", "peaceful", "grateful", "thankful", "happy", "joyful", "content", "proud",
    "productive", "hopeful", "relieved", "excited", "loved", "rested", "energized",
    "accomplished", "wonderful", "great", "good", "better", "improving", "progress",
    "enjoyed", "laughing", "smiled", "confident", "optimistic", "serene", "refreshed",
];

const NEGATIVE_WORDS: &[&str] = &[
    "sad", "angry", "anxious", "worried", "stressed", "tired", "exhausted", "lonely",
    "afraid", "scared", "hopeless", "worthless", "miserable", "awful", "terrible",
    "wrong", "failed", "failure", "crying", "hurt", "pain", "overwhelmed", "numb",
    "empty", "guilty", "ashamed", "frustrated", "irritated", "dread", "despair",
];

/// Keyword valence scorer.
///
/// Returns a three-way label distribution (`positive`/`negative`/`neutral`)
/// derived from a valence score in `[-1, 1]`: positive mass is `max(v, 0)`,
/// negative mass `max(-v, 0)`, neutral the remainder. A two-word negation
/// window flips the polarity of a hit at reduced weight.
pub struct SentimentLexicon;

impl SentimentLexicon {
    fn valence(text: &str) -> f32 {
        let tokens = words(text);
        let mut score: f32 = 0.0;
        for (i, word) in tokens.iter().enumerate() {
            let flip = negated(&tokens, i);
            if POSITIVE_WORDS.contains(&word.as_str()) {
                score += if flip { -0.10 } else { 0.15 };
            } else if NEGATIVE_WORDS.contains(&word.as_str()) {
                score += if flip { 0.10 } else { -0.15 };
            }
        }
        score.clamp(-1.0, 1.0)
    }
}

#[async_trait]
impl InferenceBackend for SentimentLexicon {
    fn name(&self) -> &str {
        "lexicon-sentiment"
    }

    async fn infer(&self, input: &ModelInput) -> Result<ModelOutput, ModelError> {
        let text = text_input(input, self.name())?;
        let v = Self::valence(text);
        Ok(ModelOutput::Labels(vec![
            LabelScore::new("positive", v.max(0.0)),
            LabelScore::new("negative", (-v).max(0.0)),
            LabelScore::new("neutral", 1.0 - v.abs()),
        ]))
    }
}

// ── Emotion ───────────────────────────────────────────────────────────────────

/// (emotion label, keywords) — labels match the engine's closed vocabulary.
const EMOTION_KEYWORDS: &[(&str, &[&str])] = &[
    ("joy", &["happy", "joyful", "delighted", "fun", "laughing", "smiled", "wonderful"]),
    ("gratitude", &["grateful", "thankful", "appreciate", "blessed", "gratitude"]),
    ("love", &["love", "loved", "caring", "affection", "close", "warmth"]),
    ("optimism", &["hopeful", "optimistic", "looking", "forward", "improving", "progress"]),
    ("relief", &["relieved", "relief", "finally", "calmer", "settled", "peace"]),
    ("surprise", &["surprised", "unexpected", "suddenly", "shocked"]),
    ("confusion", &["confused", "unsure", "uncertain", "lost", "foggy"]),
    ("anger", &["angry", "furious", "irritated", "frustrated", "resentful", "rage"]),
    ("sadness", &["sad", "crying", "tears", "down", "blue", "miserable", "unhappy"]),
    ("fear", &["afraid", "scared", "anxious", "panic", "terrified", "dread", "worried"]),
    ("disgust", &["disgusted", "gross", "repulsed", "sickened"]),
    ("disappointment", &["disappointed", "letdown", "failed", "failure", "regret"]),
    ("grief", &["grief", "mourning", "miss", "missing", "gone", "funeral"]),
];

/// Keyword emotion classifier over the closed vocabulary. Hits accumulate per
/// emotion and the result is normalized; no hits yields pure `neutral`.
pub struct EmotionLexicon;

#[async_trait]
impl InferenceBackend for EmotionLexicon {
    fn name(&self) -> &str {
        "lexicon-emotion"
    }

    async fn infer(&self, input: &ModelInput) -> Result<ModelOutput, ModelError> {
        let text = text_input(input, self.name())?;
        let tokens = words(text);
        let mut scores: Vec<LabelScore> = Vec::new();
        let mut total = 0.0f32;
        for (label, keywords) in EMOTION_KEYWORDS {
            let hits = tokens
                .iter()
                .enumerate()
                .filter(|(i, w)| keywords.contains(&w.as_str()) && !negated(&tokens, *i))
                .count();
            if hits > 0 {
                let mass = hits as f32;
                total += mass;
                scores.push(LabelScore::new(*label, mass));
            }
        }
        if total <= f32::EPSILON {
            return Ok(ModelOutput::Labels(vec![LabelScore::new("neutral", 1.0)]));
        }
        for s in &mut scores {
            s.score /= total;
        }
        Ok(ModelOutput::Labels(scores))
    }
}

// ── Crisis ────────────────────────────────────────────────────────────────────

/// Multi-word phrases that strongly indicate an indicator; checked against
/// the lowercased raw text so word order matters.
const CRISIS_PHRASES: &[(&str, &str, f32)] = &[
    ("suicidal_ideation", "don't want to be here", 0.8),
    ("suicidal_ideation", "want to die", 0.9),
    ("suicidal_ideation", "end it all", 0.85),
    ("suicidal_ideation", "better off without me", 0.8),
    ("self_harm", "hurt myself", 0.85),
    ("self_harm", "cut myself", 0.9),
    ("hopelessness", "no point anymore", 0.7),
    ("hopelessness", "nothing will change", 0.6),
    ("worthlessness", "i'm worthless", 0.7),
    ("worthlessness", "i am worthless", 0.7),
    ("isolation", "no one cares", 0.6),
    ("isolation", "completely alone", 0.6),
    ("panic", "can't breathe", 0.6),
    ("panic", "panic attack", 0.7),
];

/// Single keywords with weaker weights.
const CRISIS_KEYWORDS: &[(&str, &[&str], f32)] = &[
    ("hopelessness", &["hopeless", "pointless", "trapped"], 0.45),
    ("worthlessness", &["worthless", "burden"], 0.45),
    ("isolation", &["alone", "isolated", "abandoned"], 0.35),
    ("substance_use", &["drunk", "drinking", "pills", "overdose"], 0.4),
    ("panic", &["panic", "panicking"], 0.4),
    ("severe_anxiety", &["terrified", "unbearable", "spiraling"], 0.35),
];

/// Phrase-and-keyword crisis scorer.
///
/// Produces a score per indicator; an indicator's score is the maximum of
/// its phrase and keyword evidence, so repeated mentions don't stack past
/// the strongest single signal.
pub struct CrisisLexicon;

#[async_trait]
impl InferenceBackend for CrisisLexicon {
    fn name(&self) -> &str {
        "lexicon-crisis"
    }

    async fn infer(&self, input: &ModelInput) -> Result<ModelOutput, ModelError> {
        let text = text_input(input, self.name())?;
        let lower = text.to_lowercase();
        let tokens = words(text);

        let mut scores: Vec<LabelScore> = Vec::new();
        let mut bump = |label: &str, score: f32| {
            match scores.iter_mut().find(|s| s.label == label) {
                Some(existing) => existing.score = existing.score.max(score),
                None => scores.push(LabelScore::new(label, score)),
            }
        };

        for (label, phrase, weight) in CRISIS_PHRASES {
            if lower.contains(phrase) {
                bump(label, *weight);
            }
        }
        for (label, keywords, weight) in CRISIS_KEYWORDS {
            if tokens.iter().any(|w| keywords.contains(&w.as_str())) {
                bump(label, *weight);
            }
        }
        Ok(ModelOutput::Labels(scores))
    }
}

// ── Topics ────────────────────────────────────────────────────────────────────

const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    ("sleep", &["sleep", "insomnia", "awake", "tired", "bed", "nightmare", "rest"]),
    ("work", &["work", "job", "boss", "meeting", "deadline", "office", "career"]),
    ("relationships", &["friend", "partner", "relationship", "argument", "talked", "date"]),
    ("family", &["family", "mother", "father", "mom", "dad", "sister", "brother", "kids"]),
    ("health", &["doctor", "sick", "pain", "headache", "therapy", "medication", "health"]),
    ("anxiety", &["anxious", "anxiety", "worry", "worried", "nervous", "panic"]),
    ("exercise", &["run", "running", "gym", "workout", "walk", "yoga", "exercise"]),
    ("finances", &["money", "rent", "bills", "debt", "budget", "savings"]),
    ("creativity", &["writing", "painting", "music", "drawing", "project", "idea"]),
];

/// Keyword topic tagger: per-topic hit counts normalized by document length.
pub struct TopicLexicon;

#[async_trait]
impl InferenceBackend for TopicLexicon {
    fn name(&self) -> &str {
        "lexicon-topics"
    }

    async fn infer(&self, input: &ModelInput) -> Result<ModelOutput, ModelError> {
        let text = text_input(input, self.name())?;
        let tokens = words(text);
        if tokens.is_empty() {
            return Ok(ModelOutput::Labels(Vec::new()));
        }
        let mut scores: Vec<LabelScore> = Vec::new();
        for (topic, keywords) in TOPIC_KEYWORDS {
            let hits = tokens.iter().filter(|w| keywords.contains(&w.as_str())).count();
            if hits > 0 {
                // Saturating confidence: one hit is a weak tag, three is strong.
                let confidence = (hits as f32 * 0.35).min(1.0);
                scores.push(LabelScore::new(*topic, confidence));
            }
        }
        scores.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(ModelOutput::Labels(scores))
    }
}

// ── Embedding ─────────────────────────────────────────────────────────────────

/// Hash-projection embedder: each word hashes to a bucket with a signed
/// contribution, the bucket vector is l2-normalized. Purely lexical — shared
/// words produce similar vectors — but deterministic, dimension-stable and
/// dependency-free.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl InferenceBackend for HashEmbedder {
    fn name(&self) -> &str {
        "hash-embedding"
    }

    async fn infer(&self, input: &ModelInput) -> Result<ModelOutput, ModelError> {
        let text = text_input(input, self.name())?;
        let mut vector = vec![0.0f32; self.dimension];
        for word in words(text) {
            let digest = Sha256::digest(word.as_bytes());
            let bucket = u64::from_le_bytes(digest[0..8].try_into().unwrap_or_default())
                as usize
                % self.dimension;
            // Second hash byte decides the sign so buckets can cancel.
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm <= f32::EPSILON {
            vector[0] = 1.0;
        } else {
            for x in &mut vector {
                *x /= norm;
            }
        }
        Ok(ModelOutput::Embedding(vector))
    }
}

// ── Generation ────────────────────────────────────────────────────────────────

/// Offline generation fallback: reflects the user's last turn back with a
/// supportive framing. Not a language model — a deterministic stand-in that
/// keeps the conversation loop testable without an inference server.
pub struct TemplateResponder;

#[async_trait]
impl InferenceBackend for TemplateResponder {
    fn name(&self) -> &str {
        "template-generation"
    }

    async fn infer(&self, input: &ModelInput) -> Result<ModelOutput, ModelError> {
        let prompt = match input {
            ModelInput::Chat(p) => p,
            ModelInput::Text(_) => {
                return Err(ModelError::Unavailable(
                    "template-generation serves chat prompts, not raw text".to_string(),
                ))
            }
        };
        let last = prompt
            .turns
            .iter()
            .rev()
            .find(|t| matches!(t.role, crate::backend::ChatRole::User))
            .map(|t| t.content.as_str())
            .unwrap_or("");
        let snippet: String = last.chars().take(120).collect();
        let content = format!(
            "Thank you for sharing that. I hear you saying: \"{}\". \
             What feels most important about this for you right now?",
            snippet.trim()
        );
        let tokens_in: u32 = prompt
            .turns
            .iter()
            .map(|t| estimate_tokens(&t.content) as u32)
            .sum();
        let tokens_out = estimate_tokens(&content) as u32;
        Ok(ModelOutput::Generation(GeneratedText {
            content,
            tokens_in,
            tokens_out,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ChatPrompt, ChatRole, ChatTurn};

    fn text(s: &str) -> ModelInput {
        ModelInput::Text(s.to_string())
    }

    async fn labels(backend: &dyn InferenceBackend, s: &str) -> Vec<LabelScore> {
        match backend.infer(&text(s)).await.unwrap() {
            ModelOutput::Labels(l) => l,
            other => panic!("expected labels, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn calm_morning_scores_positive() {
        let out = labels(&SentimentLexicon, "I had a calm and productive morning.").await;
        let pos = out.iter().find(|l| l.label == "positive").unwrap().score;
        let neg = out.iter().find(|l| l.label == "negative").unwrap().score;
        assert!(pos - neg >= 0.2, "expected clearly positive, got {out:?}");
    }

    #[tokio::test]
    async fn negation_flips_polarity() {
        let happy = labels(&SentimentLexicon, "I felt happy today").await;
        let not_happy = labels(&SentimentLexicon, "I did not feel happy today").await;
        let score = |ls: &[LabelScore]| {
            ls.iter().find(|l| l.label == "positive").unwrap().score
                - ls.iter().find(|l| l.label == "negative").unwrap().score
        };
        assert!(score(&happy) > 0.0);
        assert!(score(&not_happy) < score(&happy));
    }

    #[tokio::test]
    async fn emotion_classifier_finds_gratitude() {
        let out = labels(&EmotionLexicon, "I'm so grateful and thankful for my friends").await;
        assert_eq!(out[0].label, "gratitude");
        let total: f32 = out.iter().map(|l| l.score).sum();
        assert!((total - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn emotion_classifier_defaults_to_neutral() {
        let out = labels(&EmotionLexicon, "The meeting is at three").await;
        assert_eq!(out, vec![LabelScore::new("neutral", 1.0)]);
    }

    #[tokio::test]
    async fn crisis_phrase_detection() {
        let out = labels(&CrisisLexicon, "I don't want to be here anymore.").await;
        let ideation = out
            .iter()
            .find(|l| l.label == "suicidal_ideation")
            .expect("expected suicidal_ideation indicator");
        assert!(ideation.score >= 0.7);
    }

    #[tokio::test]
    async fn crisis_scores_do_not_stack_past_strongest_signal() {
        let out = labels(
            &CrisisLexicon,
            "hopeless, hopeless, everything is hopeless and pointless",
        )
        .await;
        let hopeless = out.iter().find(|l| l.label == "hopelessness").unwrap();
        assert!(hopeless.score <= 0.7);
    }

    #[tokio::test]
    async fn topics_rank_by_hit_density() {
        let out = labels(
            &TopicLexicon,
            "Couldn't sleep again. Lay awake in bed worrying about work.",
        )
        .await;
        assert_eq!(out[0].label, "sleep");
        assert!(out.iter().any(|l| l.label == "work"));
    }

    #[tokio::test]
    async fn embeddings_are_unit_norm_and_deterministic() {
        let embedder = HashEmbedder::new(64);
        let a = match embedder.infer(&text("can't sleep, insomnia again")).await.unwrap() {
            ModelOutput::Embedding(v) => v,
            _ => unreachable!(),
        };
        let b = match embedder.infer(&text("can't sleep, insomnia again")).await.unwrap() {
            ModelOutput::Embedding(v) => v,
            _ => unreachable!(),
        };
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn shared_words_embed_closer_than_disjoint_text() {
        let embedder = HashEmbedder::new(128);
        async fn embed(embedder: &HashEmbedder, s: &str) -> Vec<f32> {
            match embedder.infer(&ModelInput::Text(s.to_string())).await.unwrap() {
                ModelOutput::Embedding(v) => v,
                _ => unreachable!(),
            }
        }
        let a = embed(&embedder, "insomnia kept me awake all night").await;
        let b = embed(&embedder, "another night of insomnia, lying awake").await;
        let c = embed(&embedder, "budget review and quarterly planning meeting").await;
        let dot = |x: &[f32], y: &[f32]| x.iter().zip(y).map(|(a, b)| a * b).sum::<f32>();
        assert!(dot(&a, &b) > dot(&a, &c));
    }

    #[tokio::test]
    async fn template_responder_reflects_last_user_turn() {
        let prompt = ChatPrompt {
            system: "Be supportive.".to_string(),
            turns: vec![ChatTurn {
                role: ChatRole::User,
                content: "I still can't sleep.".to_string(),
            }],
        };
        let out = TemplateResponder
            .infer(&ModelInput::Chat(prompt))
            .await
            .unwrap();
        match out {
            ModelOutput::Generation(g) => {
                assert!(g.content.contains("can't sleep"));
                assert!(g.tokens_out > 0);
            }
            other => panic!("expected generation, got {other:?}"),
        }
    }
}
