//! Weighted aggregation from per-chunk signals to a per-document signal.
//!
//! Per-chunk weight is the chunk's weight hint (unique span) times the
//! extractor's confidence. Scalars take the weighted mean and saturate to
//! their declared range; distributions take the weighted sum and
//! renormalize; embeddings take the plain mean and renormalize. Chunks whose
//! extractor call failed simply drop out of the fold.

use std::collections::{BTreeMap, BTreeSet};

use reverie_core::signal::{
    ChunkProvenance, CrisisIndicator, EmotionDistribution, TopicTag,
};

use crate::chunker::Chunk;
use crate::extract::ChunkScore;

/// Weighted mean of per-chunk scalar scores, saturated to `[lo, hi]`.
///
/// `scores` is aligned with `chunks`; `None` marks a failed chunk. Returns
/// `None` when every chunk failed.
pub fn scalar(
    chunks: &[Chunk],
    scores: &[Option<ChunkScore<f32>>],
    lo: f32,
    hi: f32,
) -> Option<f32> {
    let mut weighted = 0.0f32;
    let mut total = 0.0f32;
    for (chunk, score) in chunks.iter().zip(scores) {
        let Some(score) = score else { continue };
        let w = chunk.weight_hint * score.confidence;
        weighted += w * score.value;
        total += w;
    }
    if total <= f32::EPSILON {
        return None;
    }
    Some((weighted / total).clamp(lo, hi))
}

/// Weighted sum of per-chunk emotion distributions, renormalized.
pub fn emotions(
    chunks: &[Chunk],
    scores: &[Option<ChunkScore<EmotionDistribution>>],
) -> Option<EmotionDistribution> {
    let mut merged = EmotionDistribution::new();
    let mut any = false;
    for (chunk, score) in chunks.iter().zip(scores) {
        let Some(score) = score else { continue };
        let w = chunk.weight_hint * score.confidence;
        if w <= f32::EPSILON {
            continue;
        }
        any = true;
        for (emotion, p) in &score.value.0 {
            merged.add(*emotion, w * p);
        }
    }
    if !any {
        return None;
    }
    merged.normalize();
    Some(merged)
}

/// Weighted mean of per-chunk crisis scores plus the union of indicator tags
/// from all contributing chunks.
pub fn crisis(
    chunks: &[Chunk],
    scores: &[Option<ChunkScore<(f32, BTreeSet<CrisisIndicator>)>>],
) -> Option<(f32, BTreeSet<CrisisIndicator>)> {
    let scalar_scores: Vec<Option<ChunkScore<f32>>> = scores
        .iter()
        .map(|s| {
            s.as_ref().map(|cs| ChunkScore {
                value: cs.value.0,
                confidence: cs.confidence,
            })
        })
        .collect();
    let score = scalar(chunks, &scalar_scores, 0.0, 1.0)?;
    let indicators = scores
        .iter()
        .flatten()
        .flat_map(|cs| cs.value.1.iter().copied())
        .collect();
    Some((score, indicators))
}

/// Weighted per-tag confidence across chunks, top-K by aggregated weight.
///
/// A tag's aggregated confidence is the weighted mean of its per-chunk
/// confidences over all contributing chunks (absent = 0), so a tag present
/// in one small chunk of a long document ranks below one present throughout.
pub fn topics(
    chunks: &[Chunk],
    scores: &[Option<ChunkScore<Vec<TopicTag>>>],
    top_k: usize,
) -> Option<Vec<TopicTag>> {
    let mut weighted: BTreeMap<String, f32> = BTreeMap::new();
    let mut total = 0.0f32;
    let mut any = false;
    for (chunk, score) in chunks.iter().zip(scores) {
        let Some(score) = score else { continue };
        any = true;
        let w = chunk.weight_hint * score.confidence;
        total += w;
        for tag in &score.value {
            *weighted.entry(tag.tag.clone()).or_insert(0.0) += w * tag.confidence;
        }
    }
    if !any || total <= f32::EPSILON {
        return if any { Some(Vec::new()) } else { None };
    }
    let mut tags: Vec<TopicTag> = weighted
        .into_iter()
        .map(|(tag, mass)| TopicTag {
            tag,
            confidence: (mass / total).clamp(0.0, 1.0),
        })
        .collect();
    tags.sort_by(|a, b| b.confidence.total_cmp(&a.confidence).then(a.tag.cmp(&b.tag)));
    tags.truncate(top_k);
    Some(tags)
}

/// Plain mean of per-chunk embeddings, renormalized to unit length.
pub fn embedding(scores: &[Option<ChunkScore<Vec<f32>>>]) -> Option<Vec<f32>> {
    let vectors: Vec<&Vec<f32>> = scores.iter().flatten().map(|cs| &cs.value).collect();
    let first = vectors.first()?;
    let dim = first.len();
    let mut mean = vec![0.0f32; dim];
    let mut count = 0usize;
    for v in &vectors {
        if v.len() != dim {
            continue; // dimension drift within one run indicates a bug upstream
        }
        for (m, x) in mean.iter_mut().zip(v.iter()) {
            *m += x;
        }
        count += 1;
    }
    if count == 0 {
        return None;
    }
    for m in &mut mean {
        *m /= count as f32;
    }
    let norm: f32 = mean.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        mean[0] = 1.0;
    } else {
        for m in &mut mean {
            *m /= norm;
        }
    }
    Some(mean)
}

/// Chunk provenance with weights normalized to sum to one.
pub fn provenance(chunks: &[Chunk]) -> Vec<ChunkProvenance> {
    let total: f32 = chunks.iter().map(|c| c.weight_hint).sum();
    chunks
        .iter()
        .map(|c| ChunkProvenance {
            offset: c.offset,
            length: c.length,
            weight: if total > f32::EPSILON {
                c.weight_hint / total
            } else {
                0.0
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverie_core::signal::Emotion;

    fn chunk(weight: f32) -> Chunk {
        Chunk {
            offset: 0,
            length: 0,
            text: String::new(),
            estimated_tokens: 0,
            weight_hint: weight,
            unique_len: 0,
        }
    }

    fn score<T>(value: T, confidence: f32) -> Option<ChunkScore<T>> {
        Some(ChunkScore { value, confidence })
    }

    #[test]
    fn scalar_is_a_confidence_weighted_mean() {
        let chunks = vec![chunk(1.0), chunk(1.0)];
        // Equal weights, opposite scores: cancels to zero.
        let out = scalar(&chunks, &[score(0.8, 1.0), score(-0.8, 1.0)], -1.0, 1.0).unwrap();
        assert!(out.abs() < 1e-6);

        // Confidence skews the mean toward the confident chunk.
        let out = scalar(&chunks, &[score(0.8, 1.0), score(-0.8, 0.25)], -1.0, 1.0).unwrap();
        assert!(out > 0.0);
    }

    #[test]
    fn scalar_saturates_to_the_declared_range() {
        let chunks = vec![chunk(1.0)];
        let out = scalar(&chunks, &[score(7.5, 1.0)], -1.0, 1.0).unwrap();
        assert_eq!(out, 1.0);
    }

    #[test]
    fn scalar_with_all_chunks_failed_is_none() {
        let chunks = vec![chunk(1.0), chunk(1.0)];
        assert!(scalar(&chunks, &[None, None], -1.0, 1.0).is_none());
    }

    #[test]
    fn emotions_renormalize_after_weighted_merge() {
        let chunks = vec![chunk(3.0), chunk(1.0)];
        let mut joyful = EmotionDistribution::new();
        joyful.add(Emotion::Joy, 1.0);
        let mut sad = EmotionDistribution::new();
        sad.add(Emotion::Sadness, 1.0);

        let merged = emotions(&chunks, &[score(joyful, 1.0), score(sad, 1.0)]).unwrap();
        assert!(merged.is_normalized());
        // The heavier chunk dominates 3:1.
        assert_eq!(merged.dominant().unwrap().0, Emotion::Joy);
        assert!((merged.0[&Emotion::Joy] - 0.75).abs() < 1e-4);
    }

    #[test]
    fn crisis_unions_indicators_across_chunks() {
        let chunks = vec![chunk(1.0), chunk(1.0)];
        let a = score(
            (0.8, BTreeSet::from([CrisisIndicator::Hopelessness])),
            1.0,
        );
        let b = score((0.4, BTreeSet::from([CrisisIndicator::Isolation])), 1.0);
        let (s, indicators) = crisis(&chunks, &[a, b]).unwrap();
        assert!((s - 0.6).abs() < 1e-4);
        assert!(indicators.contains(&CrisisIndicator::Hopelessness));
        assert!(indicators.contains(&CrisisIndicator::Isolation));
    }

    #[test]
    fn topics_keep_top_k_by_aggregated_weight() {
        let chunks = vec![chunk(1.0), chunk(1.0)];
        let tag = |t: &str, c: f32| TopicTag {
            tag: t.to_string(),
            confidence: c,
        };
        let a = score(vec![tag("sleep", 0.9), tag("work", 0.3)], 1.0);
        let b = score(vec![tag("sleep", 0.8), tag("health", 0.2)], 1.0);
        let out = topics(&chunks, &[a, b], 2).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].tag, "sleep");
        assert!(out[0].confidence > out[1].confidence);
    }

    #[test]
    fn embedding_mean_is_unit_norm() {
        let a = score(vec![1.0, 0.0], 1.0);
        let b = score(vec![0.0, 1.0], 1.0);
        let out = embedding(&[a, b]).unwrap();
        let norm: f32 = out.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!((out[0] - out[1]).abs() < 1e-6);
    }

    #[test]
    fn provenance_weights_sum_to_one() {
        let chunks = vec![chunk(100.0), chunk(60.0), chunk(40.0)];
        let prov = provenance(&chunks);
        let total: f32 = prov.iter().map(|p| p.weight).sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert!(prov[0].weight > prov[2].weight);
    }
}
