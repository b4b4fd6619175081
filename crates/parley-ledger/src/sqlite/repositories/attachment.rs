//! Attachment repository — row access for the `attachments` table.

use parley_core::ids;
use rusqlite::{Connection, Row, params};

use crate::errors::Result;
use crate::sqlite::rows::AttachmentRow;

/// Fields for inserting a new attachment.
#[derive(Clone, Debug)]
pub struct NewAttachment {
    /// Original file name.
    pub file_name: String,
    /// Sniffed file type label.
    pub file_type: String,
    /// Size in bytes.
    pub file_size: i64,
    /// Raw bytes, if stored inline.
    pub content: Option<Vec<u8>>,
}

/// Attachment repository — stateless, every method takes `&Connection`.
pub struct AttachmentRepo;

impl AttachmentRepo {
    /// Insert an attachment on a message.
    pub fn insert(
        conn: &Connection,
        message_id: &str,
        att: &NewAttachment,
    ) -> Result<AttachmentRow> {
        let id = ids::attachment_id();
        let now = ids::now_rfc3339();
        let _ = conn.execute(
            "INSERT INTO attachments (id, message_id, file_name, file_type, file_size, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                message_id,
                att.file_name,
                att.file_type,
                att.file_size,
                att.content,
                now
            ],
        )?;
        Ok(AttachmentRow {
            id,
            message_id: message_id.to_string(),
            file_name: att.file_name.clone(),
            file_type: att.file_type.clone(),
            file_size: att.file_size,
            content: att.content.clone(),
            created_at: now,
        })
    }

    /// Attachments on one message, creation order.
    pub fn list_by_message(conn: &Connection, message_id: &str) -> Result<Vec<AttachmentRow>> {
        let mut stmt = conn.prepare(
            "SELECT id, message_id, file_name, file_type, file_size, content, created_at
             FROM attachments WHERE message_id = ?1 ORDER BY rowid ASC",
        )?;
        let rows = stmt
            .query_map(params![message_id], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<AttachmentRow> {
        Ok(AttachmentRow {
            id: row.get(0)?,
            message_id: row.get(1)?,
            file_name: row.get(2)?,
            file_type: row.get(3)?,
            file_size: row.get(4)?,
            content: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}
