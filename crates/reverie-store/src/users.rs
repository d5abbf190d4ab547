use reverie_core::types::{EntryId, UserId};
use tracing::{info, instrument};

use crate::row::{self, optional};
use crate::types::UserRecord;
use crate::{Result, Store, StoreError};

impl Store {
    #[instrument(skip(self))]
    pub fn create_user(&self, display_name: &str) -> Result<UserRecord> {
        if display_name.trim().is_empty() {
            return Err(StoreError::InvalidInput(
                "display name must not be empty".to_string(),
            ));
        }
        let id = UserId::new();
        let now = row::now();
        let conn = self.lock();
        conn.execute(
            "INSERT INTO users (id, display_name, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![id.as_str(), display_name, now],
        )?;
        info!(user = %id, "user created");
        self.get_user_locked(&conn, &id)?
            .ok_or_else(|| StoreError::not_found("user", id.as_str()))
    }

    pub fn get_user(&self, user_id: &UserId) -> Result<Option<UserRecord>> {
        let conn = self.lock();
        self.get_user_locked(&conn, user_id)
    }

    fn get_user_locked(
        &self,
        conn: &rusqlite::Connection,
        user_id: &UserId,
    ) -> Result<Option<UserRecord>> {
        optional(conn.query_row(
            "SELECT id, display_name, created_at FROM users WHERE id = ?1",
            rusqlite::params![user_id.as_str()],
            row_to_user,
        ))
    }

    /// All entry ids belonging to a user, soft-deleted included. Used by the
    /// engine to purge the vector partition and cache keys before a cascade.
    pub fn entry_ids_for_user(&self, user_id: &UserId) -> Result<Vec<EntryId>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT id FROM entries WHERE user_id = ?1")?;
        let ids = stmt
            .query_map(rusqlite::params![user_id.as_str()], |row| {
                row.get::<_, String>(0)
            })?
            .filter_map(|r| r.ok())
            .map(EntryId::from)
            .collect();
        Ok(ids)
    }

    /// Delete a user and cascade through every user-scoped table.
    #[instrument(skip(self), fields(user = %user_id))]
    pub fn delete_user(&self, user_id: &UserId) -> Result<()> {
        let conn = self.lock();
        // FTS rows are external-content and do not cascade; clear them first
        // with the fts5 'delete' command.
        conn.execute(
            "INSERT INTO entries_fts(entries_fts, rowid, content)
                 SELECT 'delete', rowid, content FROM entries WHERE user_id = ?1",
            rusqlite::params![user_id.as_str()],
        )?;
        let n = conn.execute(
            "DELETE FROM users WHERE id = ?1",
            rusqlite::params![user_id.as_str()],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("user", user_id.as_str()));
        }
        info!(user = %user_id, "user deleted with cascade");
        Ok(())
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: UserId(row.get(0)?),
        display_name: row.get(1)?,
        created_at: crate::row::parse_ts(&row.get::<_, String>(2)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_read_back() {
        let store = Store::open_in_memory().unwrap();
        let user = store.create_user("Ada").unwrap();
        let found = store.get_user(&user.id).unwrap().unwrap();
        assert_eq!(found, user);
    }

    #[test]
    fn empty_display_name_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.create_user("  "),
            Err(StoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn deleting_a_missing_user_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        let err = store.delete_user(&UserId::new()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
