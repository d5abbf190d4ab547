//! Retrieval context assembly for a conversation turn.
//!
//! Candidate entries come from the vector index scored by similarity,
//! re-ranked with a recency component weighted per session type, then merged
//! with the session's recent messages under a single token budget. Entries
//! feed the system prompt's context block; recent messages become the
//! conversation turns.

use chrono::{DateTime, Utc};
use reverie_models::estimate::estimate_tokens;
use reverie_store::{EntryRecord, MessageRecord};
use std::collections::HashSet;

/// One entry selected for the context block.
#[derive(Debug, Clone)]
pub struct RetrievedEntry {
    pub entry: EntryRecord,
    pub score: f32,
}

/// The assembled context for one turn, already within budget.
#[derive(Debug, Clone, Default)]
pub struct TurnContext {
    pub entries: Vec<RetrievedEntry>,
    pub recent: Vec<MessageRecord>,
}

/// Recency score with a ~3-day half-life, matching journaling cadence.
fn recency_score(now: DateTime<Utc>, created_at: DateTime<Utc>) -> f32 {
    let age_hours = (now - created_at).num_seconds().max(0) as f32 / 3600.0;
    1.0 / (1.0 + age_hours / 72.0)
}

/// Merge similarity-ranked entries and recent messages under `token_budget`.
///
/// Entries are re-ranked by `sim_weight * similarity + rec_weight * recency`
/// and admitted best-first; recent messages are admitted newest-first with
/// whatever budget remains (at least the latest message always fits —
/// a conversation with no visible last turn is useless). Duplicated text is
/// dropped.
pub fn assemble(
    candidates: Vec<(EntryRecord, f32)>,
    recent: Vec<MessageRecord>,
    sim_weight: f32,
    rec_weight: f32,
    token_budget: usize,
) -> TurnContext {
    let now = Utc::now();
    let mut scored: Vec<RetrievedEntry> = candidates
        .into_iter()
        .map(|(entry, similarity)| {
            let score =
                sim_weight * similarity + rec_weight * recency_score(now, entry.created_at);
            RetrievedEntry { entry, score }
        })
        .collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut seen: HashSet<String> = HashSet::new();
    let mut used_tokens = 0usize;

    // Recent messages get the first claim on half the budget so a long
    // matching entry cannot starve the conversation itself.
    let message_budget = token_budget / 2;
    let mut kept_recent: Vec<MessageRecord> = Vec::new();
    for message in recent.iter().rev() {
        let tokens = estimate_tokens(&message.content);
        if !kept_recent.is_empty() && used_tokens + tokens > message_budget {
            break;
        }
        if !seen.insert(message.content.clone()) {
            continue;
        }
        used_tokens += tokens;
        kept_recent.push(message.clone());
    }
    kept_recent.reverse();

    let mut kept_entries: Vec<RetrievedEntry> = Vec::new();
    for item in scored {
        let tokens = estimate_tokens(&item.entry.content);
        if used_tokens + tokens > token_budget {
            continue;
        }
        if !seen.insert(item.entry.content.clone()) {
            continue;
        }
        used_tokens += tokens;
        kept_entries.push(item);
    }

    TurnContext {
        entries: kept_entries,
        recent: kept_recent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use reverie_core::types::{AnalysisVersion, EntryId, Fingerprint, MessageId, MessageRole, SessionId, UserId};

    fn entry(id: &str, content: &str, age_hours: i64) -> EntryRecord {
        let now = Utc::now();
        EntryRecord {
            id: EntryId::from(id),
            user_id: UserId::from("u1"),
            topic_id: None,
            content: content.to_string(),
            word_count: content.split_whitespace().count(),
            char_count: content.chars().count(),
            analysis_version: AnalysisVersion("v3".to_string()),
            content_fingerprint: Fingerprint(format!("fp-{id}")),
            created_at: now - Duration::hours(age_hours),
            updated_at: now,
            deleted_at: None,
        }
    }

    fn message(seq: u64, content: &str) -> MessageRecord {
        MessageRecord {
            id: MessageId::new(),
            session_id: SessionId::from("s1"),
            user_id: UserId::from("u1"),
            role: MessageRole::User,
            seq,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn similarity_weight_favors_matching_entries() {
        let candidates = vec![
            (entry("old-match", "insomnia again", 24 * 30), 0.95),
            (entry("recent-weak", "groceries list", 1), 0.10),
        ];
        let ctx = assemble(candidates, vec![], 0.7, 0.3, 10_000);
        assert_eq!(ctx.entries[0].entry.id, EntryId::from("old-match"));
    }

    #[test]
    fn recency_weight_can_override_similarity() {
        let candidates = vec![
            (entry("old-match", "insomnia again", 24 * 60), 0.6),
            (entry("fresh", "slept a bit better", 1), 0.4),
        ];
        let ctx = assemble(candidates, vec![], 0.2, 0.8, 10_000);
        assert_eq!(ctx.entries[0].entry.id, EntryId::from("fresh"));
    }

    #[test]
    fn token_budget_caps_the_merge_but_keeps_the_latest_message() {
        let long = "word ".repeat(400); // ~500 tokens
        let candidates = vec![(entry("big", &long, 1), 0.9)];
        let recent = vec![message(1, &long), message(2, "short reply")];
        let ctx = assemble(candidates, recent, 0.5, 0.5, 100);
        // The newest message always survives; everything else was too big.
        assert_eq!(ctx.recent.len(), 1);
        assert_eq!(ctx.recent[0].seq, 2);
        assert!(ctx.entries.is_empty());
    }

    #[test]
    fn duplicate_text_is_dropped() {
        let candidates = vec![
            (entry("a", "same words", 1), 0.9),
            (entry("b", "same words", 2), 0.8),
        ];
        let ctx = assemble(candidates, vec![], 1.0, 0.0, 10_000);
        assert_eq!(ctx.entries.len(), 1);
    }
}
