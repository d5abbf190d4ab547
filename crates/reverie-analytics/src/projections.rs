//! Pure projection functions over signal and message rows.
//!
//! Nothing here touches storage; the aggregator feeds these from the store
//! and caches the results. Keeping them pure keeps them trivially testable
//! and guarantees a projection can always be regenerated.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use reverie_core::signal::{MoodLabel, SignalRecord};
use reverie_core::types::{SessionId, SessionType};
use reverie_store::{EntryRecord, MessageRecord, SessionRecord};
use serde::{Deserialize, Serialize};

// ── Mood trend ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoodTrendPoint {
    pub date: NaiveDate,
    pub entry_count: usize,
    /// Entries that had a usable sentiment signal.
    pub analyzed_count: usize,
    pub average_sentiment: Option<f32>,
    pub mood_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoodTrend {
    pub days: Vec<MoodTrendPoint>,
    /// Fraction of in-window entries whose sentiment signal was available.
    pub coverage: f32,
}

pub fn mood_trend(
    rows: &[(EntryRecord, Option<SignalRecord>)],
    from: DateTime<Utc>,
    window_days: i64,
) -> MoodTrend {
    let mut by_day: BTreeMap<NaiveDate, Vec<&(EntryRecord, Option<SignalRecord>)>> =
        BTreeMap::new();
    for row in rows {
        by_day.entry(row.0.created_at.date_naive()).or_default().push(row);
    }

    let mut days = Vec::with_capacity(window_days as usize);
    for offset in 0..=window_days {
        let date = (from + Duration::days(offset)).date_naive();
        if date > Utc::now().date_naive() {
            break;
        }
        let rows_for_day = by_day.get(&date).map(Vec::as_slice).unwrap_or(&[]);
        let mut sum = 0.0f32;
        let mut analyzed = 0usize;
        let mut mood_counts: BTreeMap<String, usize> = BTreeMap::new();
        for (_, signal) in rows_for_day {
            if let Some(sentiment) = signal.as_ref().and_then(|s| s.sentiment.as_ref()) {
                sum += sentiment.score;
                analyzed += 1;
                *mood_counts.entry(sentiment.mood.to_string()).or_insert(0) += 1;
            }
        }
        days.push(MoodTrendPoint {
            date,
            entry_count: rows_for_day.len(),
            analyzed_count: analyzed,
            average_sentiment: (analyzed > 0).then(|| sum / analyzed as f32),
            mood_counts,
        });
    }

    let total = rows.len();
    let analyzed_total = rows
        .iter()
        .filter(|(_, s)| s.as_ref().is_some_and(|s| s.sentiment.is_some()))
        .count();
    MoodTrend {
        days,
        coverage: if total == 0 {
            1.0
        } else {
            analyzed_total as f32 / total as f32
        },
    }
}

// ── Writing statistics ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WritingStats {
    pub entry_count: usize,
    pub total_words: usize,
    pub average_words: f32,
    pub active_days: usize,
    pub entries_per_day: BTreeMap<NaiveDate, usize>,
    pub longest_streak_days: usize,
    /// Streak ending today (or yesterday, if today has no entry yet).
    pub current_streak_days: usize,
}

pub fn writing_stats(entries: &[EntryRecord], now: DateTime<Utc>) -> WritingStats {
    let mut per_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    let mut total_words = 0usize;
    for entry in entries {
        *per_day.entry(entry.created_at.date_naive()).or_insert(0) += 1;
        total_words += entry.word_count;
    }

    let mut longest = 0usize;
    let mut run = 0usize;
    let mut prev: Option<NaiveDate> = None;
    for date in per_day.keys() {
        run = match prev {
            Some(p) if *date == p + Duration::days(1) => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        prev = Some(*date);
    }

    let today = now.date_naive();
    let mut current = 0usize;
    let mut cursor = if per_day.contains_key(&today) {
        today
    } else {
        today - Duration::days(1)
    };
    while per_day.contains_key(&cursor) {
        current += 1;
        cursor = cursor - Duration::days(1);
    }

    WritingStats {
        entry_count: entries.len(),
        total_words,
        average_words: if entries.is_empty() {
            0.0
        } else {
            total_words as f32 / entries.len() as f32
        },
        active_days: per_day.len(),
        entries_per_day: per_day,
        longest_streak_days: longest,
        current_streak_days: current,
    }
}

// ── Topic distribution ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicShare {
    pub tag: String,
    /// Share of total topic mass, in [0, 1].
    pub share: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicDistribution {
    pub topics: Vec<TopicShare>,
    /// Fraction of in-window entries whose topic signal was available.
    pub coverage: f32,
}

pub fn topic_distribution(rows: &[(EntryRecord, Option<SignalRecord>)]) -> TopicDistribution {
    let mut mass: BTreeMap<String, f32> = BTreeMap::new();
    let mut covered = 0usize;
    for (_, signal) in rows {
        let Some(topics) = signal.as_ref().and_then(|s| s.topics.as_ref()) else {
            continue;
        };
        covered += 1;
        for tag in topics {
            *mass.entry(tag.tag.clone()).or_insert(0.0) += tag.confidence;
        }
    }
    let total: f32 = mass.values().sum();
    let mut topics: Vec<TopicShare> = mass
        .into_iter()
        .map(|(tag, m)| TopicShare {
            tag,
            share: if total > f32::EPSILON { m / total } else { 0.0 },
        })
        .collect();
    topics.sort_by(|a, b| b.share.total_cmp(&a.share).then(a.tag.cmp(&b.tag)));

    TopicDistribution {
        topics,
        coverage: if rows.is_empty() {
            1.0
        } else {
            covered as f32 / rows.len() as f32
        },
    }
}

// ── Signal coverage ───────────────────────────────────────────────────────────

/// Per-extractor availability over a window of entries. Surfaces partial
/// signals honestly: a crisis extractor that was down shows up here as
/// `crisis < 1.0`, not as a wall of zeros in some other metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalCoverage {
    pub entry_count: usize,
    pub analyzed_count: usize,
    pub sentiment: f32,
    pub emotions: f32,
    pub crisis: f32,
    pub topics: f32,
    pub embedding: f32,
}

pub fn signal_coverage(rows: &[(EntryRecord, Option<SignalRecord>)]) -> SignalCoverage {
    let total = rows.len();
    let fraction = |n: usize| {
        if total == 0 {
            1.0
        } else {
            n as f32 / total as f32
        }
    };
    let count = |f: fn(&SignalRecord) -> bool| {
        rows.iter()
            .filter(|(_, s)| s.as_ref().is_some_and(f))
            .count()
    };
    SignalCoverage {
        entry_count: total,
        analyzed_count: rows.iter().filter(|(_, s)| s.is_some()).count(),
        sentiment: fraction(count(|s| s.sentiment.is_some())),
        emotions: fraction(count(|s| s.emotions.is_some())),
        crisis: fraction(count(|s| s.crisis.is_some())),
        topics: fraction(count(|s| s.topics.is_some())),
        embedding: fraction(count(|s| s.embedding.is_some())),
    }
}

// ── Cross-session patterns ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternSummary {
    pub session_count: usize,
    pub user_message_count: usize,
    pub messages_by_type: BTreeMap<String, usize>,
    pub average_sentiment: Option<f32>,
    pub mood_counts: BTreeMap<String, usize>,
    pub max_crisis_score: Option<f32>,
    /// Fraction of in-window user messages whose signal was available.
    pub coverage: f32,
}

pub fn patterns(
    messages: &[MessageRecord],
    signals: &[Option<SignalRecord>],
    sessions: &[SessionRecord],
) -> PatternSummary {
    let type_of: std::collections::HashMap<&SessionId, SessionType> = sessions
        .iter()
        .map(|s| (&s.id, s.session_type))
        .collect();

    let mut messages_by_type: BTreeMap<String, usize> = BTreeMap::new();
    let mut touched_sessions: std::collections::HashSet<&SessionId> = Default::default();
    for message in messages {
        touched_sessions.insert(&message.session_id);
        if let Some(session_type) = type_of.get(&message.session_id) {
            *messages_by_type
                .entry(session_type.as_str().to_string())
                .or_insert(0) += 1;
        }
    }

    let mut sum = 0.0f32;
    let mut analyzed = 0usize;
    let mut mood_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut max_crisis: Option<f32> = None;
    for signal in signals.iter().flatten() {
        if let Some(sentiment) = &signal.sentiment {
            sum += sentiment.score;
            analyzed += 1;
            *mood_counts.entry(sentiment.mood.to_string()).or_insert(0) += 1;
        }
        if let Some(crisis) = &signal.crisis {
            max_crisis = Some(max_crisis.map_or(crisis.score, |m: f32| m.max(crisis.score)));
        }
    }

    PatternSummary {
        session_count: touched_sessions.len(),
        user_message_count: messages.len(),
        messages_by_type,
        average_sentiment: (analyzed > 0).then(|| sum / analyzed as f32),
        mood_counts,
        max_crisis_score: max_crisis,
        coverage: if messages.is_empty() {
            1.0
        } else {
            analyzed as f32 / messages.len() as f32
        },
    }
}
