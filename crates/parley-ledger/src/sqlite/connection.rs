//! Connection pool construction and schema migrations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use tracing::debug;

use crate::errors::Result;

/// Pooled connection manager alias.
pub type ConnectionPool = r2d2::Pool<SqliteConnectionManager>;
/// A connection checked out of the pool.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Pool and pragma configuration.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Maximum pool size.
    pub max_size: u32,
    /// SQLite busy timeout per connection.
    pub busy_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_size: 8,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

fn configure(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

/// Open a pooled connection to a database file. Enables WAL.
pub fn new_file(path: &str, config: &ConnectionConfig) -> Result<ConnectionPool> {
    let busy_timeout = config.busy_timeout;
    let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        configure(conn, busy_timeout)
    });
    let pool = r2d2::Pool::builder()
        .max_size(config.max_size)
        .build(manager)?;
    debug!(path, "opened ledger database");
    Ok(pool)
}

/// Open a pooled in-memory database (shared cache, unique per call) —
/// every connection in the pool sees the same data. Test-friendly.
pub fn new_in_memory(config: &ConnectionConfig) -> Result<ConnectionPool> {
    static MEMORY_DB_SEQ: AtomicU64 = AtomicU64::new(0);
    let n = MEMORY_DB_SEQ.fetch_add(1, Ordering::Relaxed);
    let uri = format!("file:parley_mem_{n}?mode=memory&cache=shared");
    let busy_timeout = config.busy_timeout;
    let manager = SqliteConnectionManager::file(uri)
        .with_flags(
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_init(move |conn| configure(conn, busy_timeout));
    let pool = r2d2::Pool::builder()
        .max_size(config.max_size)
        .build(manager)?;
    Ok(pool)
}

/// Full schema, applied idempotently.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chats (
    id          TEXT PRIMARY KEY,
    title       TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY,
    chat_id     TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
    role        TEXT NOT NULL,
    content     TEXT NOT NULL DEFAULT '',
    thought     TEXT,
    status      TEXT NOT NULL,
    metadata    TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_chat_created
    ON messages(chat_id, created_at);

CREATE TABLE IF NOT EXISTS tool_calls (
    id                  TEXT PRIMARY KEY,
    call_id             TEXT,
    chat_id             TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
    message_id          TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    server_id           TEXT,
    function_name       TEXT NOT NULL,
    function_args       TEXT,
    function_return     TEXT,
    status              TEXT NOT NULL,
    execution_start_at  TEXT,
    execution_end_at    TEXT,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tool_calls_chat ON tool_calls(chat_id);
CREATE INDEX IF NOT EXISTS idx_tool_calls_message ON tool_calls(message_id);

CREATE TABLE IF NOT EXISTS attachments (
    id          TEXT PRIMARY KEY,
    message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    file_name   TEXT NOT NULL,
    file_type   TEXT NOT NULL,
    file_size   INTEGER NOT NULL,
    content     BLOB,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_attachments_message ON attachments(message_id);

CREATE TABLE IF NOT EXISTS agents (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    instruction TEXT NOT NULL,
    llm_id      TEXT NOT NULL,
    is_main     INTEGER NOT NULL DEFAULT 0,
    styles      TEXT NOT NULL DEFAULT '[]',
    mcps        TEXT NOT NULL DEFAULT '[]',
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS settings (
    key     TEXT PRIMARY KEY,
    value   TEXT
);
";

/// Apply the schema. Safe to run on every startup.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_pool_shares_data_across_connections() {
        let pool = new_in_memory(&ConnectionConfig::default()).unwrap();
        {
            let conn = pool.get().unwrap();
            run_migrations(&conn).unwrap();
            let _ = conn
                .execute(
                    "INSERT INTO chats (id, title, created_at, updated_at) VALUES ('chat_x', NULL, 't', 't')",
                    [],
                )
                .unwrap();
        }
        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM chats", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn separate_in_memory_pools_are_isolated() {
        let a = new_in_memory(&ConnectionConfig::default()).unwrap();
        let b = new_in_memory(&ConnectionConfig::default()).unwrap();
        run_migrations(&a.get().unwrap()).unwrap();
        // Pool b never ran migrations — querying its chats table must fail.
        let res: rusqlite::Result<i64> =
            b.get()
                .unwrap()
                .query_row("SELECT COUNT(*) FROM chats", [], |row| row.get(0));
        assert!(res.is_err());
    }

    #[test]
    fn migrations_are_idempotent() {
        let pool = new_in_memory(&ConnectionConfig::default()).unwrap();
        let conn = pool.get().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
    }

    #[test]
    fn file_pool_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let path = path.to_str().unwrap();
        {
            let pool = new_file(path, &ConnectionConfig::default()).unwrap();
            let conn = pool.get().unwrap();
            run_migrations(&conn).unwrap();
        }
        let pool = new_file(path, &ConnectionConfig::default()).unwrap();
        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM chats", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
