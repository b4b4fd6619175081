//! Chat repository — CRUD for the `chats` table.

use parley_core::ids;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::errors::Result;
use crate::sqlite::rows::ChatRow;

/// Chat repository — stateless, every method takes `&Connection`.
pub struct ChatRepo;

impl ChatRepo {
    /// Create a new chat. Title stays `NULL` until back-filled.
    pub fn create(conn: &Connection, title: Option<&str>) -> Result<ChatRow> {
        let id = ids::chat_id();
        let now = ids::now_rfc3339();
        let _ = conn.execute(
            "INSERT INTO chats (id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, title, now, now],
        )?;
        Ok(ChatRow {
            id,
            title: title.map(String::from),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Get a chat by ID.
    pub fn get_by_id(conn: &Connection, chat_id: &str) -> Result<Option<ChatRow>> {
        let row = conn
            .query_row(
                "SELECT id, title, created_at, updated_at FROM chats WHERE id = ?1",
                params![chat_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// List chats, most recently active first.
    pub fn list(conn: &Connection, limit: u32, offset: u32) -> Result<Vec<ChatRow>> {
        let mut stmt = conn.prepare(
            "SELECT id, title, created_at, updated_at FROM chats
             ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt
            .query_map(params![limit, offset], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Bump the chat's last-activity timestamp.
    pub fn touch(conn: &Connection, chat_id: &str) -> Result<bool> {
        let now = ids::now_rfc3339();
        let changed = conn.execute(
            "UPDATE chats SET updated_at = ?1 WHERE id = ?2",
            params![now, chat_id],
        )?;
        Ok(changed > 0)
    }

    /// Set the chat title (summarization back-fill).
    pub fn set_title(conn: &Connection, chat_id: &str, title: &str) -> Result<bool> {
        let now = ids::now_rfc3339();
        let changed = conn.execute(
            "UPDATE chats SET title = ?1, updated_at = ?2 WHERE id = ?3",
            params![title, now, chat_id],
        )?;
        Ok(changed > 0)
    }

    /// Delete a chat; messages, tool calls, and attachments cascade.
    pub fn delete(conn: &Connection, chat_id: &str) -> Result<bool> {
        let changed = conn.execute("DELETE FROM chats WHERE id = ?1", params![chat_id])?;
        Ok(changed > 0)
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<ChatRow> {
        Ok(ChatRow {
            id: row.get(0)?,
            title: row.get(1)?,
            created_at: row.get(2)?,
            updated_at: row.get(3)?,
        })
    }
}
