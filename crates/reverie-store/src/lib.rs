//! Authoritative relational persistence (SQLite).
//!
//! Everything user-visible lives here: users, topics, entries with their
//! signals, chat sessions with gapless message sequences, analytics
//! projections and the append-only migration log. Every read and write is
//! user-scoped; a query that does not filter by user is a bug.
//!
//! The store is a single connection behind a mutex — sufficient for the
//! single-process target — with thin per-entity modules composed over a
//! shared row-helper layer. Caches and the vector index are derived views;
//! this crate is the source of truth they rebuild from.

mod db;
mod entries;
mod error;
mod migration;
mod projections;
mod row;
mod sessions;
mod signals;
mod topics;
mod types;
mod users;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;

pub use error::StoreError;
pub use types::{
    EntryRecord, MessageRecord, MigrationEntry, ProjectionRecord, SessionRecord, TopicRecord,
    UserRecord,
};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Thread-safe handle over the authoritative SQLite database.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path` and initialise the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::InvalidInput(format!("cannot create db dir: {e}")))?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        db::init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        db::init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("store mutex poisoned")
    }
}
