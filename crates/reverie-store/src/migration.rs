//! Append-only migration log.
//!
//! Records every schema/analysis-version transition; consulted at startup to
//! decide whether a reconciliation sweep is needed.

use tracing::info;

use crate::row::{self, parse_ts};
use crate::types::MigrationEntry;
use crate::{Result, Store};

impl Store {
    pub fn append_migration(
        &self,
        from_version: Option<&str>,
        to_version: &str,
        scope: &str,
        notes: Option<&str>,
    ) -> Result<MigrationEntry> {
        let now = row::now();
        let conn = self.lock();
        conn.execute(
            "INSERT INTO migration_log (timestamp, from_version, to_version, scope, notes)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![now, from_version, to_version, scope, notes],
        )?;
        info!(from = ?from_version, to = to_version, scope, "migration logged");
        Ok(MigrationEntry {
            timestamp: parse_ts(&now).map_err(crate::StoreError::Database)?,
            from_version: from_version.map(String::from),
            to_version: to_version.to_string(),
            scope: scope.to_string(),
            notes: notes.map(String::from),
        })
    }

    /// The analysis version recorded by the most recent migration of the
    /// given scope, if any.
    pub fn latest_migrated_version(&self, scope: &str) -> Result<Option<String>> {
        let conn = self.lock();
        crate::row::optional(conn.query_row(
            "SELECT to_version FROM migration_log WHERE scope = ?1
             ORDER BY id DESC LIMIT 1",
            rusqlite::params![scope],
            |r| r.get(0),
        ))
    }

    pub fn list_migrations(&self) -> Result<Vec<MigrationEntry>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT timestamp, from_version, to_version, scope, notes
             FROM migration_log ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(MigrationEntry {
                timestamp: parse_ts(&row.get::<_, String>(0)?)?,
                from_version: row.get(1)?,
                to_version: row.get(2)?,
                scope: row.get(3)?,
                notes: row.get(4)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_is_append_only_and_latest_wins() {
        let store = Store::open_in_memory().unwrap();
        assert!(store
            .latest_migrated_version("analysis")
            .unwrap()
            .is_none());

        store
            .append_migration(None, "v2", "analysis", Some("initial"))
            .unwrap();
        store
            .append_migration(Some("v2"), "v3", "analysis", None)
            .unwrap();

        assert_eq!(
            store.latest_migrated_version("analysis").unwrap().as_deref(),
            Some("v3")
        );
        assert_eq!(store.list_migrations().unwrap().len(), 2);
    }
}
