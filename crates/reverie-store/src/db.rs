use rusqlite::Connection;

use crate::Result;

/// Initialise all tables and indexes. Safe to call on every startup — uses
/// `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_users(conn)?;
    create_topics(conn)?;
    create_entries(conn)?;
    create_entry_fts(conn)?;
    create_sessions(conn)?;
    create_signals(conn)?;
    create_projections(conn)?;
    create_migration_log(conn)?;
    Ok(())
}

fn create_users(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id           TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            created_at   TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn create_topics(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS topics (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            name        TEXT NOT NULL,
            color       TEXT,
            description TEXT,
            created_at  TEXT NOT NULL,
            UNIQUE(user_id, name)
        );
        CREATE INDEX IF NOT EXISTS idx_topics_user ON topics(user_id);",
    )?;
    Ok(())
}

fn create_entries(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS entries (
            id                  TEXT PRIMARY KEY,
            user_id             TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            topic_id            TEXT REFERENCES topics(id) ON DELETE SET NULL,
            content             TEXT NOT NULL,
            word_count          INTEGER NOT NULL,
            char_count          INTEGER NOT NULL,
            analysis_version    TEXT NOT NULL,
            content_fingerprint TEXT NOT NULL,
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL,
            deleted_at          TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_entries_user_time
            ON entries(user_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_entries_user_topic
            ON entries(user_id, topic_id);",
    )?;
    Ok(())
}

/// FTS5 external-content index over entry content — synced manually on every
/// entry write so per-user text search stays consistent. Soft-deleted
/// entries are removed from the index so search never surfaces them.
fn create_entry_fts(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS entries_fts
            USING fts5(content, content='entries', tokenize='porter');",
    )?;
    Ok(())
}

fn create_signals(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS entry_signals (
            entry_id         TEXT PRIMARY KEY REFERENCES entries(id) ON DELETE CASCADE,
            user_id          TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            analysis_version TEXT NOT NULL,
            mood             TEXT,
            sentiment_score  REAL,
            crisis_score     REAL,
            record           TEXT NOT NULL,
            created_at       TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_entry_signals_user
            ON entry_signals(user_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS message_signals (
            message_id       TEXT PRIMARY KEY REFERENCES chat_messages(id) ON DELETE CASCADE,
            user_id          TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            analysis_version TEXT NOT NULL,
            mood             TEXT,
            sentiment_score  REAL,
            crisis_score     REAL,
            record           TEXT NOT NULL,
            created_at       TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_message_signals_user
            ON message_signals(user_id, created_at DESC);",
    )?;
    Ok(())
}

fn create_sessions(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS chat_sessions (
            id            TEXT PRIMARY KEY,
            user_id       TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            session_type  TEXT NOT NULL,
            status        TEXT NOT NULL DEFAULT 'active',
            theme         TEXT,
            next_seq      INTEGER NOT NULL DEFAULT 1,
            started_at    TEXT NOT NULL,
            last_activity TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_user
            ON chat_sessions(user_id, last_activity DESC);

        CREATE TABLE IF NOT EXISTS chat_messages (
            id         TEXT PRIMARY KEY,
            session_id TEXT NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
            user_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            role       TEXT NOT NULL,
            seq        INTEGER NOT NULL,
            content    TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(session_id, seq)
        );
        CREATE INDEX IF NOT EXISTS idx_messages_session
            ON chat_messages(session_id, seq);
        CREATE INDEX IF NOT EXISTS idx_messages_user_time
            ON chat_messages(user_id, created_at DESC);",
    )?;
    Ok(())
}

fn create_projections(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS analytics_projections (
            user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            metric      TEXT NOT NULL,
            bucket      TEXT NOT NULL,
            payload     TEXT NOT NULL,
            computed_at TEXT NOT NULL,
            PRIMARY KEY (user_id, metric, bucket)
        );",
    )?;
    Ok(())
}

fn create_migration_log(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migration_log (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp    TEXT NOT NULL,
            from_version TEXT,
            to_version   TEXT NOT NULL,
            scope        TEXT NOT NULL,
            notes        TEXT
        );",
    )?;
    Ok(())
}
