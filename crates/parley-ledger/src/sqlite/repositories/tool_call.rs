//! Tool-call repository — row access for the `tool_calls` table.

use parley_core::ids;
use parley_core::types::ToolCallStatus;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;

use crate::errors::Result;
use crate::sqlite::rows::ToolCallRow;

/// Fields for inserting a new tool call.
pub struct NewToolCall<'a> {
    /// Owning chat.
    pub chat_id: &'a str,
    /// Hosting assistant message.
    pub message_id: &'a str,
    /// Provider-side correlation ID.
    pub call_id: Option<&'a str>,
    /// Resolved tool-server reference.
    pub server_id: Option<&'a str>,
    /// Function name without the server namespace.
    pub function_name: &'a str,
    /// Serialized arguments.
    pub function_args: Option<&'a Value>,
    /// Initial status (`pending_confirmation` or `ready_to_be_executed`).
    pub status: ToolCallStatus,
}

/// Tool-call repository — stateless, every method takes `&Connection`.
pub struct ToolCallRepo;

const COLUMNS: &str = "id, call_id, chat_id, message_id, server_id, function_name, \
     function_args, function_return, status, execution_start_at, execution_end_at, \
     created_at, updated_at";

impl ToolCallRepo {
    /// Insert a tool call row.
    pub fn insert(conn: &Connection, tc: &NewToolCall<'_>) -> Result<ToolCallRow> {
        let id = ids::tool_call_id();
        let now = ids::now_rfc3339();
        let args_json = tc.function_args.map(Value::to_string);
        let _ = conn.execute(
            "INSERT INTO tool_calls (id, call_id, chat_id, message_id, server_id,
                 function_name, function_args, function_return, status,
                 execution_start_at, execution_end_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, NULL, NULL, ?9, ?10)",
            params![
                id,
                tc.call_id,
                tc.chat_id,
                tc.message_id,
                tc.server_id,
                tc.function_name,
                args_json,
                tc.status.as_str(),
                now,
                now
            ],
        )?;
        Ok(ToolCallRow {
            id,
            call_id: tc.call_id.map(String::from),
            chat_id: tc.chat_id.to_string(),
            message_id: tc.message_id.to_string(),
            server_id: tc.server_id.map(String::from),
            function_name: tc.function_name.to_string(),
            function_args: tc.function_args.cloned(),
            function_return: None,
            status: tc.status,
            execution_start_at: None,
            execution_end_at: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Get a tool call by ID.
    pub fn get_by_id(conn: &Connection, tool_call_id: &str) -> Result<Option<ToolCallRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM tool_calls WHERE id = ?1"),
                params![tool_call_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Tool calls hosted by one message, creation order.
    pub fn list_by_message(conn: &Connection, message_id: &str) -> Result<Vec<ToolCallRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM tool_calls WHERE message_id = ?1 ORDER BY rowid ASC"
        ))?;
        let rows = stmt
            .query_map(params![message_id], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// All tool calls in a chat, creation order.
    pub fn list_by_chat(conn: &Connection, chat_id: &str) -> Result<Vec<ToolCallRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM tool_calls WHERE chat_id = ?1 ORDER BY rowid ASC"
        ))?;
        let rows = stmt
            .query_map(params![chat_id], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Tool calls in a chat still awaiting resolution.
    pub fn unresolved_by_chat(conn: &Connection, chat_id: &str) -> Result<Vec<ToolCallRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM tool_calls
             WHERE chat_id = ?1 AND status IN ('pending_confirmation', 'ready_to_be_executed')
             ORDER BY rowid ASC"
        ))?;
        let rows = stmt
            .query_map(params![chat_id], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Transition a tool call to a terminal status, recording the result
    /// payload and execution window.
    pub fn resolve(
        conn: &Connection,
        tool_call_id: &str,
        status: ToolCallStatus,
        function_return: Option<&Value>,
        execution_start_at: Option<&str>,
        execution_end_at: Option<&str>,
    ) -> Result<bool> {
        let now = ids::now_rfc3339();
        let return_json = function_return.map(Value::to_string);
        let changed = conn.execute(
            "UPDATE tool_calls
             SET status = ?1, function_return = ?2,
                 execution_start_at = ?3, execution_end_at = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                status.as_str(),
                return_json,
                execution_start_at,
                execution_end_at,
                now,
                tool_call_id
            ],
        )?;
        Ok(changed > 0)
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<ToolCallRow> {
        let status_str: String = row.get(8)?;
        let status = ToolCallStatus::parse(&status_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                8,
                Type::Text,
                format!("unknown tool call status: {status_str}").into(),
            )
        })?;
        let args: Option<String> = row.get(6)?;
        let ret: Option<String> = row.get(7)?;
        Ok(ToolCallRow {
            id: row.get(0)?,
            call_id: row.get(1)?,
            chat_id: row.get(2)?,
            message_id: row.get(3)?,
            server_id: row.get(4)?,
            function_name: row.get(5)?,
            function_args: args.and_then(|s| serde_json::from_str(&s).ok()),
            function_return: ret.and_then(|s| serde_json::from_str(&s).ok()),
            status,
            execution_start_at: row.get(9)?,
            execution_end_at: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }
}
