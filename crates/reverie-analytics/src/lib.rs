//! Derived analytics projections.
//!
//! Every projection is a pure function of the authoritative signal and
//! message data for one user and window, cache-backed with a short TTL and
//! regenerable at any time. A projection built over entries whose signals
//! were unavailable reports its `coverage` honestly instead of substituting
//! neutral values.

mod error;
mod projections;

pub use error::AnalyticsError;
pub use projections::{
    MoodTrend, MoodTrendPoint, PatternSummary, SignalCoverage, TopicDistribution, TopicShare,
    WritingStats,
};

use std::sync::Arc;

use chrono::{Duration, Utc};
use reverie_cache::keys::{CacheKey, Domain};
use reverie_cache::CacheLayer;
use reverie_core::types::UserId;
use reverie_store::Store;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument};

pub struct AnalyticsAggregator {
    store: Arc<Store>,
    cache: Arc<CacheLayer>,
}

impl AnalyticsAggregator {
    pub fn new(store: Arc<Store>, cache: Arc<CacheLayer>) -> Self {
        Self { store, cache }
    }

    /// Cache-or-compute scaffold shared by every projection. The bucket key
    /// includes the window end date, so projections roll over naturally at
    /// midnight UTC without explicit invalidation.
    fn cached<T, F>(
        &self,
        user_id: &UserId,
        metric: &str,
        window_days: i64,
        compute: F,
    ) -> Result<T, AnalyticsError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, AnalyticsError>,
    {
        let bucket = format!("{window_days}d:{}", Utc::now().date_naive());
        let key = CacheKey::analytics(metric, user_id, &bucket);
        match self.cache.get::<T>(&key) {
            Ok(Some(hit)) => {
                debug!(metric, %user_id, "projection cache hit");
                return Ok(hit);
            }
            Ok(None) => {}
            Err(e) => {
                // A broken cache degrades to recompute; the data source of
                // truth is the store.
                tracing::warn!(metric, error = %e, "projection cache read failed");
            }
        }
        let value = compute()?;
        self.cache.put(&key, &value, Domain::Analytics);
        if let Ok(json) = serde_json::to_value(&value) {
            let _ = self.store.put_projection(user_id, metric, &bucket, &json);
        }
        Ok(value)
    }

    /// Per-day mood trend over the trailing window.
    #[instrument(skip(self))]
    pub fn mood_trend(
        &self,
        user_id: &UserId,
        window_days: i64,
    ) -> Result<MoodTrend, AnalyticsError> {
        self.cached(user_id, "mood_trend", window_days, || {
            let to = Utc::now();
            let from = to - Duration::days(window_days);
            let rows = self.store.entries_with_signals_between(user_id, &from, &to)?;
            Ok(projections::mood_trend(&rows, from, window_days))
        })
    }

    /// Writing-frequency statistics over the trailing window.
    #[instrument(skip(self))]
    pub fn writing_stats(
        &self,
        user_id: &UserId,
        window_days: i64,
    ) -> Result<WritingStats, AnalyticsError> {
        self.cached(user_id, "writing_stats", window_days, || {
            let to = Utc::now();
            let from = to - Duration::days(window_days);
            let entries = self.store.entries_between(user_id, &from, &to)?;
            Ok(projections::writing_stats(&entries, to))
        })
    }

    /// Aggregated topic distribution over the trailing window.
    #[instrument(skip(self))]
    pub fn topic_distribution(
        &self,
        user_id: &UserId,
        window_days: i64,
    ) -> Result<TopicDistribution, AnalyticsError> {
        self.cached(user_id, "topics", window_days, || {
            let to = Utc::now();
            let from = to - Duration::days(window_days);
            let rows = self.store.entries_with_signals_between(user_id, &from, &to)?;
            Ok(projections::topic_distribution(&rows))
        })
    }

    /// Per-extractor signal availability over the trailing window.
    #[instrument(skip(self))]
    pub fn signal_coverage(
        &self,
        user_id: &UserId,
        window_days: i64,
    ) -> Result<SignalCoverage, AnalyticsError> {
        self.cached(user_id, "coverage", window_days, || {
            let to = Utc::now();
            let from = to - Duration::days(window_days);
            let rows = self.store.entries_with_signals_between(user_id, &from, &to)?;
            Ok(projections::signal_coverage(&rows))
        })
    }

    /// Cross-session conversation patterns over the trailing window.
    #[instrument(skip(self))]
    pub fn patterns(
        &self,
        user_id: &UserId,
        window_days: i64,
    ) -> Result<PatternSummary, AnalyticsError> {
        self.cached(user_id, "patterns", window_days, || {
            let to = Utc::now();
            let from = to - Duration::days(window_days);
            let messages = self.store.messages_between(user_id, &from, &to)?;
            let sessions = self.store.list_sessions(user_id, usize::MAX / 2)?;
            let mut signals = Vec::with_capacity(messages.len());
            for message in &messages {
                signals.push(self.store.get_message_signal(user_id, &message.id)?);
            }
            Ok(projections::patterns(&messages, &signals, &sessions))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reverie_core::config::CacheConfig;
    use reverie_core::signal::{MoodLabel, SentimentSignal, SignalRecord, TopicTag};
    use reverie_core::types::{AnalysisVersion, Fingerprint};

    fn record(score: f32, topics: Option<Vec<TopicTag>>) -> SignalRecord {
        SignalRecord {
            analysis_version: AnalysisVersion("v3".to_string()),
            sentiment: Some(SentimentSignal {
                score,
                mood: MoodLabel::from_score(score),
            }),
            emotions: None,
            crisis: None,
            topics,
            embedding: Some(vec![1.0]),
            provenance: Vec::new(),
            failures: Vec::new(),
            analyzed_at: Utc::now(),
        }
    }

    fn fixture() -> (AnalyticsAggregator, Arc<Store>, UserId, tempfile::TempDir) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(
            CacheLayer::open_at(&dir.path().join("cache.redb"), &CacheConfig::default()).unwrap(),
        );
        let user = store.create_user("Ada").unwrap().id;
        (
            AnalyticsAggregator::new(store.clone(), cache),
            store,
            user,
            dir,
        )
    }

    fn add_entry(store: &Store, user: &UserId, text: &str, signal: Option<SignalRecord>) {
        let entry = store
            .create_entry(
                user,
                text,
                None,
                &Fingerprint(format!("fp-{text}")),
                &AnalysisVersion("v3".to_string()),
            )
            .unwrap();
        if let Some(signal) = signal {
            store
                .persist_entry_signal(user, &entry.id, &signal, || Ok::<(), String>(()))
                .unwrap();
        }
    }

    #[test]
    fn mood_trend_reports_partial_coverage() {
        let (analytics, store, user, _dir) = fixture();
        add_entry(&store, &user, "good day", Some(record(0.6, None)));
        add_entry(&store, &user, "bad day", Some(record(-0.6, None)));
        add_entry(&store, &user, "unanalyzed day", None);

        let trend = analytics.mood_trend(&user, 7).unwrap();
        assert!((trend.coverage - 2.0 / 3.0).abs() < 1e-5);
        let today = trend.days.last().unwrap();
        assert_eq!(today.entry_count, 3);
        assert_eq!(today.analyzed_count, 2);
        assert!(today.average_sentiment.unwrap().abs() < 1e-5);
    }

    #[test]
    fn writing_stats_count_words_and_streaks() {
        let (analytics, store, user, _dir) = fixture();
        add_entry(&store, &user, "one two three", None);
        add_entry(&store, &user, "four five", None);

        let stats = analytics.writing_stats(&user, 30).unwrap();
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.total_words, 5);
        assert_eq!(stats.active_days, 1);
        assert_eq!(stats.current_streak_days, 1);
    }

    #[test]
    fn topic_distribution_aggregates_tags() {
        let (analytics, store, user, _dir) = fixture();
        let tags = |t: &str| {
            Some(vec![TopicTag {
                tag: t.to_string(),
                confidence: 0.8,
            }])
        };
        add_entry(&store, &user, "a", Some(record(0.0, tags("sleep"))));
        add_entry(&store, &user, "b", Some(record(0.0, tags("sleep"))));
        add_entry(&store, &user, "c", Some(record(0.0, tags("work"))));

        let dist = analytics.topic_distribution(&user, 7).unwrap();
        assert_eq!(dist.topics[0].tag, "sleep");
        assert!(dist.topics[0].share > dist.topics[1].share);
        assert!((dist.coverage - 1.0).abs() < 1e-5);
    }

    #[test]
    fn projections_are_cached_per_bucket() {
        let (analytics, store, user, _dir) = fixture();
        add_entry(&store, &user, "one entry", None);
        let first = analytics.writing_stats(&user, 7).unwrap();

        // New data lands, but the cached bucket still answers.
        add_entry(&store, &user, "another entry", None);
        let second = analytics.writing_stats(&user, 7).unwrap();
        assert_eq!(first.entry_count, second.entry_count);
    }
}
