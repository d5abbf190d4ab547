use reverie_core::types::{AnalysisVersion, EntryId, Fingerprint, TopicId, UserId};
use tracing::{debug, instrument};

use crate::row::{self, optional, parse_ts, parse_ts_opt};
use crate::types::EntryRecord;
use crate::{Result, Store, StoreError};

const ENTRY_COLUMNS: &str = "id, user_id, topic_id, content, word_count, char_count,
     analysis_version, content_fingerprint, created_at, updated_at, deleted_at";

impl Store {
    /// Create an entry. Word and char counts are derived here and kept in
    /// lockstep with content on every subsequent write.
    #[instrument(skip(self, content), fields(user = %user_id, len = content.len()))]
    pub fn create_entry(
        &self,
        user_id: &UserId,
        content: &str,
        topic_id: Option<&TopicId>,
        fingerprint: &Fingerprint,
        version: &AnalysisVersion,
    ) -> Result<EntryRecord> {
        if content.trim().is_empty() {
            return Err(StoreError::InvalidInput(
                "entry content must not be empty".to_string(),
            ));
        }
        if let Some(topic) = topic_id {
            if self.get_topic(user_id, topic)?.is_none() {
                return Err(StoreError::not_found("topic", topic.as_str()));
            }
        }

        let id = EntryId::new();
        let now = row::now();
        let conn = self.lock();
        conn.execute(
            "INSERT INTO entries
             (id, user_id, topic_id, content, word_count, char_count,
              analysis_version, content_fingerprint, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            rusqlite::params![
                id.as_str(),
                user_id.as_str(),
                topic_id.map(|t| t.as_str()),
                content,
                word_count(content),
                char_count(content),
                version.as_str(),
                fingerprint.as_str(),
                now,
            ],
        )?;
        let rowid = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO entries_fts(rowid, content) VALUES (?1, ?2)",
            rusqlite::params![rowid, content],
        )?;
        debug!(entry = %id, "entry created");
        self.get_entry_locked(&conn, user_id, &id)?
            .ok_or_else(|| StoreError::not_found("entry", id.as_str()))
    }

    /// Fetch one live entry. Soft-deleted entries and other users' entries
    /// are both invisible.
    pub fn get_entry(&self, user_id: &UserId, entry_id: &EntryId) -> Result<Option<EntryRecord>> {
        let conn = self.lock();
        self.get_entry_locked(&conn, user_id, entry_id)
    }

    fn get_entry_locked(
        &self,
        conn: &rusqlite::Connection,
        user_id: &UserId,
        entry_id: &EntryId,
    ) -> Result<Option<EntryRecord>> {
        optional(conn.query_row(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM entries
                 WHERE id = ?1 AND user_id = ?2 AND deleted_at IS NULL"
            ),
            rusqlite::params![entry_id.as_str(), user_id.as_str()],
            row_to_entry,
        ))
    }

    /// Replace an entry's content: counts recomputed, fingerprint swapped,
    /// the stale signal dropped in the same transaction, FTS resynced.
    #[instrument(skip(self, content), fields(user = %user_id, entry = %entry_id))]
    pub fn update_entry_content(
        &self,
        user_id: &UserId,
        entry_id: &EntryId,
        content: &str,
        fingerprint: &Fingerprint,
        version: &AnalysisVersion,
    ) -> Result<EntryRecord> {
        if content.trim().is_empty() {
            return Err(StoreError::InvalidInput(
                "entry content must not be empty".to_string(),
            ));
        }
        let now = row::now();
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let old: Option<(i64, String)> = optional(tx.query_row(
            "SELECT rowid, content FROM entries
             WHERE id = ?1 AND user_id = ?2 AND deleted_at IS NULL",
            rusqlite::params![entry_id.as_str(), user_id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        ))?;
        let Some((rowid, old_content)) = old else {
            return Err(StoreError::not_found("entry", entry_id.as_str()));
        };

        tx.execute(
            "UPDATE entries SET content = ?1, word_count = ?2, char_count = ?3,
                 content_fingerprint = ?4, analysis_version = ?5, updated_at = ?6
             WHERE id = ?7",
            rusqlite::params![
                content,
                word_count(content),
                char_count(content),
                fingerprint.as_str(),
                version.as_str(),
                now,
                entry_id.as_str(),
            ],
        )?;
        // Prior derived signals are invalid the moment content changes.
        tx.execute(
            "DELETE FROM entry_signals WHERE entry_id = ?1",
            rusqlite::params![entry_id.as_str()],
        )?;
        tx.execute(
            "INSERT INTO entries_fts(entries_fts, rowid, content) VALUES('delete', ?1, ?2)",
            rusqlite::params![rowid, old_content],
        )?;
        tx.execute(
            "INSERT INTO entries_fts(rowid, content) VALUES (?1, ?2)",
            rusqlite::params![rowid, content],
        )?;
        tx.commit()?;

        self.get_entry_locked(&conn, user_id, entry_id)?
            .ok_or_else(|| StoreError::not_found("entry", entry_id.as_str()))
    }

    /// Soft-delete: the entry disappears from reads, search and analytics
    /// but the row is retained. The signal row is dropped.
    #[instrument(skip(self), fields(user = %user_id, entry = %entry_id))]
    pub fn soft_delete_entry(&self, user_id: &UserId, entry_id: &EntryId) -> Result<()> {
        let now = row::now();
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let old: Option<(i64, String)> = optional(tx.query_row(
            "SELECT rowid, content FROM entries
             WHERE id = ?1 AND user_id = ?2 AND deleted_at IS NULL",
            rusqlite::params![entry_id.as_str(), user_id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        ))?;
        let Some((rowid, old_content)) = old else {
            return Err(StoreError::not_found("entry", entry_id.as_str()));
        };

        tx.execute(
            "UPDATE entries SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2",
            rusqlite::params![now, entry_id.as_str()],
        )?;
        tx.execute(
            "DELETE FROM entry_signals WHERE entry_id = ?1",
            rusqlite::params![entry_id.as_str()],
        )?;
        tx.execute(
            "INSERT INTO entries_fts(entries_fts, rowid, content) VALUES('delete', ?1, ?2)",
            rusqlite::params![rowid, old_content],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Most recent live entries, newest first.
    pub fn list_entries(&self, user_id: &UserId, limit: usize) -> Result<Vec<EntryRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries
             WHERE user_id = ?1 AND deleted_at IS NULL
             ORDER BY created_at DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![user_id.as_str(), limit as i64],
            row_to_entry,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Per-user full-text search over entry content, ranked by relevance.
    pub fn search_entries(
        &self,
        user_id: &UserId,
        query: &str,
        limit: usize,
    ) -> Result<Vec<EntryRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT e.id, e.user_id, e.topic_id, e.content, e.word_count, e.char_count,
                    e.analysis_version, e.content_fingerprint, e.created_at, e.updated_at,
                    e.deleted_at
             FROM entries e
             JOIN entries_fts f ON e.rowid = f.rowid
             WHERE e.user_id = ?1 AND e.deleted_at IS NULL AND entries_fts MATCH ?2
             ORDER BY rank LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![user_id.as_str(), query, limit as i64],
            row_to_entry,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Live entries created inside `[from, to)`, oldest first — the
    /// analytics source scan.
    pub fn entries_between(
        &self,
        user_id: &UserId,
        from: &chrono::DateTime<chrono::Utc>,
        to: &chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<EntryRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries
             WHERE user_id = ?1 AND deleted_at IS NULL
               AND created_at >= ?2 AND created_at < ?3
             ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![user_id.as_str(), from.to_rfc3339(), to.to_rfc3339()],
            row_to_entry,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

pub(crate) fn word_count(content: &str) -> usize {
    content.split_whitespace().count()
}

pub(crate) fn char_count(content: &str) -> usize {
    content.chars().count()
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRecord> {
    Ok(EntryRecord {
        id: EntryId(row.get(0)?),
        user_id: UserId(row.get(1)?),
        topic_id: row.get::<_, Option<String>>(2)?.map(TopicId),
        content: row.get(3)?,
        word_count: row.get::<_, i64>(4)? as usize,
        char_count: row.get::<_, i64>(5)? as usize,
        analysis_version: AnalysisVersion(row.get(6)?),
        content_fingerprint: Fingerprint(row.get(7)?),
        created_at: parse_ts(&row.get::<_, String>(8)?)?,
        updated_at: parse_ts(&row.get::<_, String>(9)?)?,
        deleted_at: parse_ts_opt(row.get::<_, Option<String>>(10)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(s: &str) -> Fingerprint {
        Fingerprint(format!("fp-{s}"))
    }

    fn version() -> AnalysisVersion {
        AnalysisVersion("v3".to_string())
    }

    fn store_with_user() -> (Store, UserId) {
        let store = Store::open_in_memory().unwrap();
        let user = store.create_user("Ada").unwrap();
        (store, user.id)
    }

    #[test]
    fn round_trip_preserves_counts_and_fingerprint() {
        let (store, user) = store_with_user();
        let entry = store
            .create_entry(&user, "Two short sentences. Nine words in total here.", None, &fp("a"), &version())
            .unwrap();
        assert_eq!(entry.word_count, 8);
        assert_eq!(entry.char_count, 46);

        let back = store.get_entry(&user, &entry.id).unwrap().unwrap();
        assert_eq!(back.content, entry.content);
        assert_eq!(back.word_count, entry.word_count);
        assert_eq!(back.char_count, entry.char_count);
        assert_eq!(back.content_fingerprint, entry.content_fingerprint);
    }

    #[test]
    fn empty_content_is_rejected() {
        let (store, user) = store_with_user();
        let err = store
            .create_entry(&user, "  \n", None, &fp("a"), &version())
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }

    #[test]
    fn update_recomputes_counts_and_swaps_fingerprint() {
        let (store, user) = store_with_user();
        let entry = store
            .create_entry(&user, "old words", None, &fp("old"), &version())
            .unwrap();
        let updated = store
            .update_entry_content(&user, &entry.id, "three new words", &fp("new"), &version())
            .unwrap();
        assert_eq!(updated.word_count, 3);
        assert_eq!(updated.content_fingerprint, fp("new"));
        assert!(updated.updated_at >= entry.updated_at);
    }

    #[test]
    fn soft_deleted_entries_vanish_from_reads_and_search() {
        let (store, user) = store_with_user();
        let entry = store
            .create_entry(&user, "insomnia again tonight", None, &fp("a"), &version())
            .unwrap();
        assert_eq!(store.search_entries(&user, "insomnia", 10).unwrap().len(), 1);

        store.soft_delete_entry(&user, &entry.id).unwrap();
        assert!(store.get_entry(&user, &entry.id).unwrap().is_none());
        assert!(store.search_entries(&user, "insomnia", 10).unwrap().is_empty());
        assert!(store.list_entries(&user, 10).unwrap().is_empty());
    }

    #[test]
    fn entries_are_invisible_across_users() {
        let (store, user) = store_with_user();
        let other = store.create_user("Grace").unwrap();
        let entry = store
            .create_entry(&user, "private thoughts", None, &fp("a"), &version())
            .unwrap();
        assert!(store.get_entry(&other.id, &entry.id).unwrap().is_none());
        assert!(store
            .search_entries(&other.id, "private", 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn search_matches_stemmed_terms() {
        let (store, user) = store_with_user();
        store
            .create_entry(&user, "I was sleeping badly all week", None, &fp("a"), &version())
            .unwrap();
        // porter stemming: "sleep" matches "sleeping"
        assert_eq!(store.search_entries(&user, "sleep", 10).unwrap().len(), 1);
    }
}
