//! Signal persistence for entries and messages.
//!
//! The entry path implements the atomic commit protocol: open a relational
//! transaction, write the signal row, run the caller's vector-index write,
//! then commit. A failed index write rolls everything back so a signal is
//! never observable without its vector record; a crash between relational
//! commit and an external index would be healed by the startup
//! reconciliation sweep rebuilding from `signals_for_rebuild`.

use reverie_core::signal::SignalRecord;
use reverie_core::types::{EntryId, MessageId, UserId};
use tracing::{debug, instrument};

use crate::row::{self, from_json, optional, to_json};
use crate::types::EntryRecord;
use crate::{Result, Store, StoreError};

impl Store {
    /// Persist an entry's signal and the matching vector-index record
    /// atomically from the caller's perspective.
    #[instrument(skip(self, record, index_write), fields(user = %user_id, entry = %entry_id))]
    pub fn persist_entry_signal<F, E>(
        &self,
        user_id: &UserId,
        entry_id: &EntryId,
        record: &SignalRecord,
        index_write: F,
    ) -> Result<()>
    where
        F: FnOnce() -> std::result::Result<(), E>,
        E: std::fmt::Display,
    {
        let json = to_json(record)?;
        let now = row::now();
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let entry_version: Option<String> = optional(tx.query_row(
            "SELECT analysis_version FROM entries
             WHERE id = ?1 AND user_id = ?2 AND deleted_at IS NULL",
            rusqlite::params![entry_id.as_str(), user_id.as_str()],
            |r| r.get(0),
        ))?;
        let Some(entry_version) = entry_version else {
            return Err(StoreError::not_found("entry", entry_id.as_str()));
        };
        // A signal may only exist while its version matches the entry's; a
        // mismatch means the entry was edited or re-versioned mid-analysis.
        if entry_version != record.analysis_version.as_str() {
            return Err(StoreError::Conflict(format!(
                "entry version '{entry_version}' no longer matches signal version '{}'",
                record.analysis_version
            )));
        }

        tx.execute(
            "INSERT OR REPLACE INTO entry_signals
             (entry_id, user_id, analysis_version, mood, sentiment_score,
              crisis_score, record, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                entry_id.as_str(),
                user_id.as_str(),
                record.analysis_version.as_str(),
                record.sentiment.as_ref().map(|s| s.mood.to_string()),
                record.sentiment.as_ref().map(|s| s.score as f64),
                record.crisis.as_ref().map(|c| c.score as f64),
                json,
                now,
            ],
        )?;

        // Vector write inside the transaction window: failure rolls back.
        index_write().map_err(|e| StoreError::IndexWrite(e.to_string()))?;

        tx.commit()?;
        debug!(entry = %entry_id, "signal persisted");
        Ok(())
    }

    /// Read an entry's signal. The version-match invariant is enforced in
    /// the query itself: a stale signal row is treated as absent.
    pub fn get_entry_signal(
        &self,
        user_id: &UserId,
        entry_id: &EntryId,
    ) -> Result<Option<SignalRecord>> {
        let conn = self.lock();
        let json: Option<String> = optional(conn.query_row(
            "SELECT s.record FROM entry_signals s
             JOIN entries e ON e.id = s.entry_id
             WHERE s.entry_id = ?1 AND s.user_id = ?2
               AND e.deleted_at IS NULL
               AND s.analysis_version = e.analysis_version",
            rusqlite::params![entry_id.as_str(), user_id.as_str()],
            |r| r.get(0),
        ))?;
        json.map(|j| from_json(&j)).transpose()
    }

    pub fn save_message_signal(
        &self,
        user_id: &UserId,
        message_id: &MessageId,
        record: &SignalRecord,
    ) -> Result<()> {
        let json = to_json(record)?;
        let now = row::now();
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO message_signals
             (message_id, user_id, analysis_version, mood, sentiment_score,
              crisis_score, record, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                message_id.as_str(),
                user_id.as_str(),
                record.analysis_version.as_str(),
                record.sentiment.as_ref().map(|s| s.mood.to_string()),
                record.sentiment.as_ref().map(|s| s.score as f64),
                record.crisis.as_ref().map(|c| c.score as f64),
                json,
                now,
            ],
        )?;
        Ok(())
    }

    pub fn get_message_signal(
        &self,
        user_id: &UserId,
        message_id: &MessageId,
    ) -> Result<Option<SignalRecord>> {
        let conn = self.lock();
        let json: Option<String> = optional(conn.query_row(
            "SELECT record FROM message_signals WHERE message_id = ?1 AND user_id = ?2",
            rusqlite::params![message_id.as_str(), user_id.as_str()],
            |r| r.get(0),
        ))?;
        json.map(|j| from_json(&j)).transpose()
    }

    /// Everything the vector index needs to rebuild itself: live entries
    /// whose current-version signal carries an embedding.
    pub fn signals_for_rebuild(&self) -> Result<Vec<(UserId, EntryId, SignalRecord)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT s.user_id, s.entry_id, s.record FROM entry_signals s
             JOIN entries e ON e.id = s.entry_id
             WHERE e.deleted_at IS NULL
               AND s.analysis_version = e.analysis_version",
        )?;
        let rows: Vec<(String, String, String)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        drop(conn);

        let mut out = Vec::with_capacity(rows.len());
        for (user, entry, json) in rows {
            let record: SignalRecord = from_json(&json)?;
            if record.embedding.is_some() {
                out.push((UserId(user), EntryId(entry), record));
            }
        }
        Ok(out)
    }

    /// Live entries in `[from, to)` paired with their current-version signal
    /// (if any) — the analytics source scan in one query.
    pub fn entries_with_signals_between(
        &self,
        user_id: &UserId,
        from: &chrono::DateTime<chrono::Utc>,
        to: &chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<(EntryRecord, Option<SignalRecord>)>> {
        let entries = self.entries_between(user_id, from, to)?;
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let signal = self.get_entry_signal(user_id, &entry.id)?;
            out.push((entry, signal));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reverie_core::signal::{MoodLabel, SentimentSignal};
    use reverie_core::types::{AnalysisVersion, Fingerprint};

    fn record(version: &str) -> SignalRecord {
        SignalRecord {
            analysis_version: AnalysisVersion(version.to_string()),
            sentiment: Some(SentimentSignal {
                score: 0.4,
                mood: MoodLabel::Positive,
            }),
            emotions: None,
            crisis: None,
            topics: None,
            embedding: Some(vec![0.6, 0.8]),
            provenance: Vec::new(),
            failures: Vec::new(),
            analyzed_at: Utc::now(),
        }
    }

    fn setup() -> (Store, UserId, EntryId) {
        let store = Store::open_in_memory().unwrap();
        let user = store.create_user("Ada").unwrap();
        let entry = store
            .create_entry(
                &user.id,
                "a calm day",
                None,
                &Fingerprint("fp".to_string()),
                &AnalysisVersion("v3".to_string()),
            )
            .unwrap();
        (store, user.id, entry.id)
    }

    #[test]
    fn signal_round_trip() {
        let (store, user, entry) = setup();
        store
            .persist_entry_signal(&user, &entry, &record("v3"), || Ok::<(), String>(()))
            .unwrap();
        let back = store.get_entry_signal(&user, &entry).unwrap().unwrap();
        assert_eq!(back.sentiment.as_ref().unwrap().mood, MoodLabel::Positive);
        assert_eq!(back.embedding.as_deref(), Some(&[0.6, 0.8][..]));
    }

    #[test]
    fn version_mismatch_is_a_conflict() {
        let (store, user, entry) = setup();
        let err = store
            .persist_entry_signal(&user, &entry, &record("v2"), || Ok::<(), String>(()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.get_entry_signal(&user, &entry).unwrap().is_none());
    }

    #[test]
    fn failed_index_write_rolls_the_signal_back() {
        let (store, user, entry) = setup();
        let err = store
            .persist_entry_signal(&user, &entry, &record("v3"), || {
                Err::<(), _>("vector store offline")
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::IndexWrite(_)));
        assert!(
            store.get_entry_signal(&user, &entry).unwrap().is_none(),
            "signal must not be visible after a rolled-back commit"
        );
    }

    #[test]
    fn stale_signal_is_invisible_after_content_edit() {
        let (store, user, entry) = setup();
        store
            .persist_entry_signal(&user, &entry, &record("v3"), || Ok::<(), String>(()))
            .unwrap();
        store
            .update_entry_content(
                &user,
                &entry,
                "different words now",
                &Fingerprint("fp2".to_string()),
                &AnalysisVersion("v3".to_string()),
            )
            .unwrap();
        assert!(store.get_entry_signal(&user, &entry).unwrap().is_none());
    }

    #[test]
    fn rebuild_scan_returns_only_live_current_signals() {
        let (store, user, entry) = setup();
        store
            .persist_entry_signal(&user, &entry, &record("v3"), || Ok::<(), String>(()))
            .unwrap();
        assert_eq!(store.signals_for_rebuild().unwrap().len(), 1);

        store.soft_delete_entry(&user, &entry).unwrap();
        assert!(store.signals_for_rebuild().unwrap().is_empty());
    }
}
