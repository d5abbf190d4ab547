//! Overlapping character windows sized to a tokenizer's hard limit.
//!
//! Fixed character windows are the simplest faithful approximation when a
//! precise token count would require loading the tokenizer itself; the model
//! runner re-validates every window with its own length guard, so an
//! estimate drifting low here cannot push an over-budget input into a model.

use reverie_core::config::ChunkConfig;
use reverie_models::estimate::estimate_tokens;

use crate::error::AnalysisError;

/// One window of a document.
///
/// `offset`/`length` are byte positions into the original text. The unique
/// span of a window is the part not shared with its predecessor; unique
/// spans concatenate, in order, to exactly the original document.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub offset: usize,
    pub length: usize,
    pub text: String,
    pub estimated_tokens: usize,
    /// Proportional to the window's unique (non-overlap) span; the
    /// aggregator multiplies this with extractor confidence.
    pub weight_hint: f32,
    /// Byte length of the unique span, kept for provenance.
    pub unique_len: usize,
}

/// Splits documents into ordered overlapping windows.
#[derive(Debug, Clone)]
pub struct Chunker {
    /// Character budget per window.
    size: usize,
    /// Character overlap between adjacent windows.
    overlap: usize,
}

impl Chunker {
    pub fn new(size: usize, overlap: usize) -> Result<Self, AnalysisError> {
        if size == 0 {
            return Err(AnalysisError::InvalidChunking(
                "window size must be > 0".to_string(),
            ));
        }
        if overlap >= size {
            return Err(AnalysisError::InvalidChunking(format!(
                "overlap ({overlap}) must be smaller than window size ({size})"
            )));
        }
        Ok(Self { size, overlap })
    }

    pub fn from_config(config: &ChunkConfig) -> Result<Self, AnalysisError> {
        Self::new(config.size, config.overlap)
    }

    /// Split `text` into ordered windows.
    ///
    /// Empty text yields an empty list; text within one window's budget
    /// yields exactly one unpadded window. Windows always split on char
    /// boundaries.
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        if text.is_empty() {
            return Vec::new();
        }

        // Char-index → byte-offset table, with a sentinel for the text end.
        let mut boundaries: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
        boundaries.push(text.len());
        let total_chars = boundaries.len() - 1;

        let stride = self.size - self.overlap;
        let mut chunks = Vec::new();
        let mut start = 0usize; // char index
        let mut prev_end_byte = 0usize;

        loop {
            let end = (start + self.size).min(total_chars);
            let start_byte = boundaries[start];
            let end_byte = boundaries[end];
            let window = &text[start_byte..end_byte];
            let unique_len = end_byte - prev_end_byte;
            // Unique char span: everything for the first window, everything
            // past the overlap for the rest.
            let unique_chars = if chunks.is_empty() {
                end
            } else {
                end - (start + self.overlap)
            };

            chunks.push(Chunk {
                offset: start_byte,
                length: end_byte - start_byte,
                text: window.to_string(),
                estimated_tokens: estimate_tokens(window),
                weight_hint: unique_chars as f32,
                unique_len,
            });

            prev_end_byte = end_byte;
            if end == total_chars {
                break;
            }
            start += stride;
        }
        chunks
    }

    /// Reassemble the original text from the unique spans, in order.
    /// Exists for tests and for auditing stored provenance.
    pub fn reconstruct(text: &str, chunks: &[Chunk]) -> String {
        let mut out = String::with_capacity(text.len());
        let mut covered = 0usize;
        for chunk in chunks {
            let unique_start = chunk.offset + chunk.length - chunk.unique_len;
            debug_assert_eq!(unique_start, covered);
            out.push_str(&text[covered..chunk.offset + chunk.length]);
            covered = chunk.offset + chunk.length;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize) -> Chunker {
        Chunker::new(size, overlap).unwrap()
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunker(100, 10).chunk("").is_empty());
    }

    #[test]
    fn short_text_yields_one_unpadded_window() {
        let chunks = chunker(100, 10).chunk("hello world");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello world");
        assert_eq!(chunks[0].offset, 0);
        assert_eq!(chunks[0].length, 11);
    }

    #[test]
    fn text_at_exactly_the_budget_is_one_window() {
        let text = "x".repeat(100);
        let chunks = chunker(100, 10).chunk(&text);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn one_char_over_budget_splits_into_two_reconstructable_windows() {
        let text: String = ('a'..='z').cycle().take(101).collect();
        let chunks = chunker(100, 10).chunk(&text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(Chunker::reconstruct(&text, &chunks), text);
        // The second window honors the overlap at its left edge.
        assert_eq!(chunks[1].offset, 90);
    }

    #[test]
    fn unique_spans_reconstruct_long_documents() {
        let text: String = "The quick brown fox jumps over the lazy dog. "
            .chars()
            .cycle()
            .take(4000)
            .collect();
        let chunks = chunker(1200, 200).chunk(&text);
        assert!(chunks.len() >= 3, "expected >= 3 chunks, got {}", chunks.len());
        assert_eq!(Chunker::reconstruct(&text, &chunks), text);
    }

    #[test]
    fn windows_never_exceed_the_budget() {
        let text = "y".repeat(5000);
        for chunk in chunker(1200, 200).chunk(&text) {
            assert!(chunk.text.chars().count() <= 1200);
        }
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let text = "héllo wörld ".repeat(40);
        let chunks = chunker(100, 20).chunk(&text);
        assert!(chunks.len() > 1);
        assert_eq!(Chunker::reconstruct(&text, &chunks), text);
        for chunk in &chunks {
            // Slicing at a non-boundary would have panicked during chunking;
            // double-check the reported offsets line up too.
            assert!(text.is_char_boundary(chunk.offset));
            assert!(text.is_char_boundary(chunk.offset + chunk.length));
        }
    }

    #[test]
    fn weight_hints_track_unique_spans() {
        let text = "z".repeat(250);
        let chunks = chunker(100, 20).chunk(&text);
        // First window is all unique; later windows are unique past the overlap.
        assert_eq!(chunks[0].weight_hint, 100.0);
        assert_eq!(chunks[1].weight_hint, 80.0);
        let unique_total: usize = chunks.iter().map(|c| c.unique_len).sum();
        assert_eq!(unique_total, 250);
    }

    #[test]
    fn overlap_must_stay_below_size() {
        assert!(Chunker::new(100, 100).is_err());
        assert!(Chunker::new(0, 0).is_err());
    }
}
