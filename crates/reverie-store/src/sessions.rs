//! Chat sessions and their gapless message sequences.
//!
//! The per-session counter lives in the session row (`next_seq`) and is
//! allocated inside the same transaction as the message insert, so sequence
//! numbers are gapless and strictly ordered no matter how many writers race.
//! Callers compose prompts *outside* this path; nothing here ever waits on a
//! model.

use reverie_core::types::{MessageId, MessageRole, SessionId, SessionStatus, SessionType, UserId};
use tracing::{debug, instrument};

use crate::row::{self, optional, parse_ts, to_json};
use crate::types::{MessageRecord, SessionRecord};
use crate::{Result, Store, StoreError};

impl Store {
    #[instrument(skip(self, theme), fields(user = %user_id, r#type = %session_type))]
    pub fn create_session(
        &self,
        user_id: &UserId,
        session_type: SessionType,
        theme: Option<serde_json::Value>,
    ) -> Result<SessionRecord> {
        let id = SessionId::new();
        let now = row::now();
        let theme_json = theme.as_ref().map(to_json).transpose()?;
        let conn = self.lock();
        conn.execute(
            "INSERT INTO chat_sessions
             (id, user_id, session_type, status, theme, next_seq, started_at, last_activity)
             VALUES (?1, ?2, ?3, 'active', ?4, 1, ?5, ?5)",
            rusqlite::params![
                id.as_str(),
                user_id.as_str(),
                session_type.as_str(),
                theme_json,
                now
            ],
        )?;
        debug!(session = %id, "session created");
        self.get_session_locked(&conn, user_id, &id)?
            .ok_or_else(|| StoreError::not_found("session", id.as_str()))
    }

    pub fn get_session(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<Option<SessionRecord>> {
        let conn = self.lock();
        self.get_session_locked(&conn, user_id, session_id)
    }

    fn get_session_locked(
        &self,
        conn: &rusqlite::Connection,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<Option<SessionRecord>> {
        optional(conn.query_row(
            "SELECT id, user_id, session_type, status, theme, started_at, last_activity
             FROM chat_sessions WHERE id = ?1 AND user_id = ?2",
            rusqlite::params![session_id.as_str(), user_id.as_str()],
            row_to_session,
        ))
    }

    pub fn list_sessions(&self, user_id: &UserId, limit: usize) -> Result<Vec<SessionRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, session_type, status, theme, started_at, last_activity
             FROM chat_sessions WHERE user_id = ?1
             ORDER BY last_activity DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![user_id.as_str(), limit as i64],
            row_to_session,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Close a session; further appends are rejected.
    #[instrument(skip(self), fields(user = %user_id, session = %session_id))]
    pub fn close_session(&self, user_id: &UserId, session_id: &SessionId) -> Result<()> {
        let conn = self.lock();
        let n = conn.execute(
            "UPDATE chat_sessions SET status = 'closed', last_activity = ?1
             WHERE id = ?2 AND user_id = ?3",
            rusqlite::params![row::now(), session_id.as_str(), user_id.as_str()],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("session", session_id.as_str()));
        }
        Ok(())
    }

    /// Append one message under the session's sequence lock.
    ///
    /// The transaction reads `next_seq`, inserts the message with it, and
    /// bumps the counter — all-or-nothing. An assistant turn requires that
    /// the preceding message in the session is a user turn.
    #[instrument(skip(self, content), fields(user = %user_id, session = %session_id, role = ?role))]
    pub fn append_message(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        role: MessageRole,
        content: &str,
    ) -> Result<MessageRecord> {
        if content.is_empty() {
            return Err(StoreError::InvalidInput(
                "message content must not be empty".to_string(),
            ));
        }
        let id = MessageId::new();
        let now = row::now();
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let session: Option<(String, i64)> = optional(tx.query_row(
            "SELECT status, next_seq FROM chat_sessions WHERE id = ?1 AND user_id = ?2",
            rusqlite::params![session_id.as_str(), user_id.as_str()],
            |r| Ok((r.get(0)?, r.get(1)?)),
        ))?;
        let Some((status, seq)) = session else {
            return Err(StoreError::not_found("session", session_id.as_str()));
        };
        if status != "active" {
            return Err(StoreError::SessionClosed(session_id.as_str().to_string()));
        }

        if role == MessageRole::Assistant {
            let last_role: Option<String> = optional(tx.query_row(
                "SELECT role FROM chat_messages WHERE session_id = ?1
                 ORDER BY seq DESC LIMIT 1",
                rusqlite::params![session_id.as_str()],
                |r| r.get(0),
            ))?;
            if last_role.as_deref() != Some("user") {
                return Err(StoreError::InvalidInput(
                    "assistant message must follow a user message".to_string(),
                ));
            }
        }

        tx.execute(
            "INSERT INTO chat_messages (id, session_id, user_id, role, seq, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                id.as_str(),
                session_id.as_str(),
                user_id.as_str(),
                role.as_str(),
                seq,
                content,
                now
            ],
        )?;
        tx.execute(
            "UPDATE chat_sessions SET next_seq = ?1, last_activity = ?2 WHERE id = ?3",
            rusqlite::params![seq + 1, now, session_id.as_str()],
        )?;
        tx.commit()?;

        Ok(MessageRecord {
            id,
            session_id: session_id.clone(),
            user_id: user_id.clone(),
            role,
            seq: seq as u64,
            content: content.to_string(),
            created_at: parse_ts(&now).map_err(StoreError::Database)?,
        })
    }

    /// The last `limit` messages of a session, oldest first.
    pub fn recent_messages(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        limit: usize,
    ) -> Result<Vec<MessageRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, user_id, role, seq, content, created_at
             FROM chat_messages
             WHERE session_id = ?1 AND user_id = ?2
             ORDER BY seq DESC LIMIT ?3",
        )?;
        let mut messages: Vec<MessageRecord> = stmt
            .query_map(
                rusqlite::params![session_id.as_str(), user_id.as_str(), limit as i64],
                row_to_message,
            )?
            .filter_map(|r| r.ok())
            .collect();
        messages.reverse();
        Ok(messages)
    }

    /// Every sequence number in a session, ascending. Exists for invariant
    /// checks and tests; the set must always be `{1, 2, …, n}`.
    pub fn message_seqs(&self, user_id: &UserId, session_id: &SessionId) -> Result<Vec<u64>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT seq FROM chat_messages
             WHERE session_id = ?1 AND user_id = ?2 ORDER BY seq",
        )?;
        let seqs = stmt
            .query_map(
                rusqlite::params![session_id.as_str(), user_id.as_str()],
                |r| r.get::<_, i64>(0),
            )?
            .filter_map(|r| r.ok())
            .map(|s| s as u64)
            .collect();
        Ok(seqs)
    }

    /// User-role messages in `[from, to)` with their signal, across all of a
    /// user's sessions — the cross-session analytics scan.
    pub fn messages_between(
        &self,
        user_id: &UserId,
        from: &chrono::DateTime<chrono::Utc>,
        to: &chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<MessageRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, user_id, role, seq, content, created_at
             FROM chat_messages
             WHERE user_id = ?1 AND role = 'user'
               AND created_at >= ?2 AND created_at < ?3
             ORDER BY created_at",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![user_id.as_str(), from.to_rfc3339(), to.to_rfc3339()],
            row_to_message,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
    let type_str: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let theme_json: Option<String> = row.get(4)?;
    Ok(SessionRecord {
        id: SessionId(row.get(0)?),
        user_id: UserId(row.get(1)?),
        session_type: type_str.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?,
        status: status_str.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?,
        theme: theme_json.and_then(|t| serde_json::from_str(&t).ok()),
        started_at: parse_ts(&row.get::<_, String>(5)?)?,
        last_activity: parse_ts(&row.get::<_, String>(6)?)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    let role_str: String = row.get(3)?;
    Ok(MessageRecord {
        id: MessageId(row.get(0)?),
        session_id: SessionId(row.get(1)?),
        user_id: UserId(row.get(2)?),
        role: role_str.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?,
        seq: row.get::<_, i64>(4)? as u64,
        content: row.get(5)?,
        created_at: parse_ts(&row.get::<_, String>(6)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Store, UserId, SessionId) {
        let store = Store::open_in_memory().unwrap();
        let user = store.create_user("Ada").unwrap();
        let session = store
            .create_session(&user.id, SessionType::SupportiveListening, None)
            .unwrap();
        (store, user.id, session.id)
    }

    #[test]
    fn sequences_are_gapless_from_one() {
        let (store, user, session) = setup();
        store
            .append_message(&user, &session, MessageRole::User, "hello")
            .unwrap();
        store
            .append_message(&user, &session, MessageRole::Assistant, "hi")
            .unwrap();
        store
            .append_message(&user, &session, MessageRole::User, "again")
            .unwrap();
        assert_eq!(store.message_seqs(&user, &session).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn assistant_turn_requires_a_preceding_user_turn() {
        let (store, user, session) = setup();
        let err = store
            .append_message(&user, &session, MessageRole::Assistant, "hello?")
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));

        store
            .append_message(&user, &session, MessageRole::User, "hi")
            .unwrap();
        store
            .append_message(&user, &session, MessageRole::Assistant, "hello!")
            .unwrap();
        // Two assistant turns in a row are rejected too.
        let err = store
            .append_message(&user, &session, MessageRole::Assistant, "more")
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }

    #[test]
    fn closed_sessions_reject_appends() {
        let (store, user, session) = setup();
        store.close_session(&user, &session).unwrap();
        let err = store
            .append_message(&user, &session, MessageRole::User, "late")
            .unwrap_err();
        assert!(matches!(err, StoreError::SessionClosed(_)));
    }

    #[test]
    fn recent_messages_come_back_oldest_first() {
        let (store, user, session) = setup();
        for i in 0..5 {
            store
                .append_message(&user, &session, MessageRole::User, &format!("m{i}"))
                .unwrap();
            store
                .append_message(&user, &session, MessageRole::Assistant, &format!("r{i}"))
                .unwrap();
        }
        let recent = store.recent_messages(&user, &session, 4).unwrap();
        assert_eq!(recent.len(), 4);
        assert!(recent.windows(2).all(|w| w[0].seq < w[1].seq));
        assert_eq!(recent.last().unwrap().content, "r4");
    }

    #[test]
    fn sessions_are_invisible_across_users() {
        let (store, _user, session) = setup();
        let other = store.create_user("Grace").unwrap();
        assert!(store.get_session(&other.id, &session).unwrap().is_none());
        let err = store
            .append_message(&other.id, &session, MessageRole::User, "intruder")
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
