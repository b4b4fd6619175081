//! Message repository — row access for the `messages` table.
//!
//! The ledger is append-only, so `rowid` order equals insertion order
//! equals `created_at` order; `rowid` is used as the unambiguous tiebreak
//! for "last message" and truncation queries.

use parley_core::ids;
use parley_core::types::{MessageRole, MessageStatus};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;

use crate::errors::Result;
use crate::sqlite::rows::MessageRow;

/// Fields for inserting a new message.
pub struct NewMessage<'a> {
    /// Owning chat.
    pub chat_id: &'a str,
    /// Author role.
    pub role: MessageRole,
    /// Text content (may be empty).
    pub content: &'a str,
    /// Reasoning trace.
    pub thought: Option<&'a str>,
    /// Lifecycle status.
    pub status: MessageStatus,
    /// Opaque metadata payload.
    pub metadata: Option<&'a Value>,
}

/// Message repository — stateless, every method takes `&Connection`.
pub struct MessageRepo;

const COLUMNS: &str =
    "id, chat_id, role, content, thought, status, metadata, created_at, updated_at";

impl MessageRepo {
    /// Insert a message row.
    pub fn insert(conn: &Connection, msg: &NewMessage<'_>) -> Result<MessageRow> {
        let id = ids::message_id();
        let now = ids::now_rfc3339();
        let metadata_json = msg.metadata.map(Value::to_string);
        let _ = conn.execute(
            "INSERT INTO messages (id, chat_id, role, content, thought, status, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                msg.chat_id,
                msg.role.as_str(),
                msg.content,
                msg.thought,
                msg.status.as_str(),
                metadata_json,
                now,
                now
            ],
        )?;
        Ok(MessageRow {
            id,
            chat_id: msg.chat_id.to_string(),
            role: msg.role,
            content: msg.content.to_string(),
            thought: msg.thought.map(String::from),
            status: msg.status,
            metadata: msg.metadata.cloned(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Get a message by ID.
    pub fn get_by_id(conn: &Connection, message_id: &str) -> Result<Option<MessageRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM messages WHERE id = ?1"),
                params![message_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Most recent message in a chat.
    pub fn last_in_chat(conn: &Connection, chat_id: &str) -> Result<Option<MessageRow>> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM messages WHERE chat_id = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT 1"
                ),
                params![chat_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Most recent message in a chat that is not in `error` status.
    pub fn last_non_error(conn: &Connection, chat_id: &str) -> Result<Option<MessageRow>> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM messages WHERE chat_id = ?1 AND status != 'error'
                     ORDER BY created_at DESC, rowid DESC LIMIT 1"
                ),
                params![chat_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// `rowid` of the most recent successful assistant message, if any.
    /// The truncation anchor: everything after it is a broken turn.
    pub fn last_success_assistant_rowid(conn: &Connection, chat_id: &str) -> Result<Option<i64>> {
        let rowid = conn
            .query_row(
                "SELECT rowid FROM messages
                 WHERE chat_id = ?1 AND role = 'assistant' AND status = 'success'
                 ORDER BY rowid DESC LIMIT 1",
                params![chat_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(rowid)
    }

    /// Delete every message in the chat with `rowid` greater than the
    /// anchor. Tool calls and attachments cascade. Returns count deleted.
    pub fn delete_after_rowid(conn: &Connection, chat_id: &str, rowid: i64) -> Result<usize> {
        let deleted = conn.execute(
            "DELETE FROM messages WHERE chat_id = ?1 AND rowid > ?2",
            params![chat_id, rowid],
        )?;
        Ok(deleted)
    }

    /// Delete all messages in a chat. Returns count deleted.
    pub fn delete_all_in_chat(conn: &Connection, chat_id: &str) -> Result<usize> {
        let deleted = conn.execute(
            "DELETE FROM messages WHERE chat_id = ?1",
            params![chat_id],
        )?;
        Ok(deleted)
    }

    /// Delete one message. Returns `true` if deleted.
    pub fn delete(conn: &Connection, message_id: &str) -> Result<bool> {
        let changed = conn.execute("DELETE FROM messages WHERE id = ?1", params![message_id])?;
        Ok(changed > 0)
    }

    /// All messages in a chat. `newest_first` matches the storage-layer
    /// display query; pass `false` for canonical turn order.
    pub fn list_by_chat(
        conn: &Connection,
        chat_id: &str,
        newest_first: bool,
    ) -> Result<Vec<MessageRow>> {
        let order = if newest_first { "DESC" } else { "ASC" };
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM messages WHERE chat_id = ?1
             ORDER BY created_at {order}, rowid {order}"
        ))?;
        let rows = stmt
            .query_map(params![chat_id], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Count messages in a chat.
    pub fn count_by_chat(conn: &Connection, chat_id: &str) -> Result<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE chat_id = ?1",
            params![chat_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Finalize a pending placeholder in place: set content, success status,
    /// metadata; keep the existing thought unless a new one is supplied.
    pub fn finalize(
        conn: &Connection,
        message_id: &str,
        content: &str,
        thought: Option<&str>,
        metadata: Option<&Value>,
    ) -> Result<bool> {
        let now = ids::now_rfc3339();
        let metadata_json = metadata.map(Value::to_string);
        let changed = conn.execute(
            "UPDATE messages
             SET content = ?1, status = 'success', metadata = ?2,
                 thought = COALESCE(?3, thought), updated_at = ?4
             WHERE id = ?5",
            params![content, metadata_json, thought, now, message_id],
        )?;
        Ok(changed > 0)
    }

    /// Update a message's status.
    pub fn set_status(conn: &Connection, message_id: &str, status: MessageStatus) -> Result<bool> {
        let now = ids::now_rfc3339();
        let changed = conn.execute(
            "UPDATE messages SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), now, message_id],
        )?;
        Ok(changed > 0)
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
        let role_str: String = row.get(2)?;
        let role = MessageRole::parse(&role_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                Type::Text,
                format!("unknown message role: {role_str}").into(),
            )
        })?;
        let status_str: String = row.get(5)?;
        let status = MessageStatus::parse(&status_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                Type::Text,
                format!("unknown message status: {status_str}").into(),
            )
        })?;
        let metadata: Option<String> = row.get(6)?;
        Ok(MessageRow {
            id: row.get(0)?,
            chat_id: row.get(1)?,
            role,
            content: row.get(3)?,
            thought: row.get(4)?,
            status,
            metadata: metadata.and_then(|s| serde_json::from_str(&s).ok()),
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}
