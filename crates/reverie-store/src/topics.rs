use reverie_core::types::{TopicId, UserId};
use tracing::instrument;

use crate::row::{self, optional, parse_ts};
use crate::types::TopicRecord;
use crate::{Result, Store, StoreError};

impl Store {
    /// Create a user-scoped topic. `(user, name)` is unique; a duplicate
    /// name surfaces as a conflict the caller can retry with another name.
    #[instrument(skip(self), fields(user = %user_id))]
    pub fn create_topic(
        &self,
        user_id: &UserId,
        name: &str,
        color: Option<&str>,
        description: Option<&str>,
    ) -> Result<TopicRecord> {
        if name.trim().is_empty() {
            return Err(StoreError::InvalidInput(
                "topic name must not be empty".to_string(),
            ));
        }
        let id = TopicId::new();
        let now = row::now();
        let conn = self.lock();
        conn.execute(
            "INSERT INTO topics (id, user_id, name, color, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![id.as_str(), user_id.as_str(), name, color, description, now],
        )
        .map_err(|e| {
            if StoreError::is_unique_violation(&e) {
                StoreError::Conflict(format!("topic '{name}' already exists for this user"))
            } else {
                StoreError::Database(e)
            }
        })?;
        optional(conn.query_row(
            "SELECT id, user_id, name, color, description, created_at
             FROM topics WHERE id = ?1",
            rusqlite::params![id.as_str()],
            row_to_topic,
        ))?
        .ok_or_else(|| StoreError::not_found("topic", id.as_str()))
    }

    pub fn get_topic(&self, user_id: &UserId, topic_id: &TopicId) -> Result<Option<TopicRecord>> {
        let conn = self.lock();
        optional(conn.query_row(
            "SELECT id, user_id, name, color, description, created_at
             FROM topics WHERE id = ?1 AND user_id = ?2",
            rusqlite::params![topic_id.as_str(), user_id.as_str()],
            row_to_topic,
        ))
    }

    pub fn list_topics(&self, user_id: &UserId) -> Result<Vec<TopicRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, name, color, description, created_at
             FROM topics WHERE user_id = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map(rusqlite::params![user_id.as_str()], row_to_topic)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Delete a topic; entries referencing it fall back to no topic.
    pub fn delete_topic(&self, user_id: &UserId, topic_id: &TopicId) -> Result<()> {
        let conn = self.lock();
        let n = conn.execute(
            "DELETE FROM topics WHERE id = ?1 AND user_id = ?2",
            rusqlite::params![topic_id.as_str(), user_id.as_str()],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("topic", topic_id.as_str()));
        }
        Ok(())
    }
}

fn row_to_topic(row: &rusqlite::Row<'_>) -> rusqlite::Result<TopicRecord> {
    Ok(TopicRecord {
        id: TopicId(row.get(0)?),
        user_id: UserId(row.get(1)?),
        name: row.get(2)?,
        color: row.get(3)?,
        description: row.get(4)?,
        created_at: parse_ts(&row.get::<_, String>(5)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_topic_name_is_a_conflict() {
        let store = Store::open_in_memory().unwrap();
        let user = store.create_user("Ada").unwrap();
        store
            .create_topic(&user.id, "sleep", Some("#3366ff"), None)
            .unwrap();
        let err = store
            .create_topic(&user.id, "sleep", None, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn same_name_for_different_users_is_fine() {
        let store = Store::open_in_memory().unwrap();
        let a = store.create_user("Ada").unwrap();
        let b = store.create_user("Grace").unwrap();
        store.create_topic(&a.id, "work", None, None).unwrap();
        store.create_topic(&b.id, "work", None, None).unwrap();
    }

    #[test]
    fn topics_are_user_scoped_on_read() {
        let store = Store::open_in_memory().unwrap();
        let a = store.create_user("Ada").unwrap();
        let b = store.create_user("Grace").unwrap();
        let topic = store.create_topic(&a.id, "health", None, None).unwrap();
        assert!(store.get_topic(&b.id, &topic.id).unwrap().is_none());
    }
}
