//! High-level `LedgerStore` API — the message-flow engine.
//!
//! Composes the repositories into chat-centric operations and enforces the
//! conversation ordering invariants. Chat-scoped writes run inside a single
//! transaction under a per-chat in-process lock; the attachment rollback in
//! [`LedgerStore::append_user_message`] is the one deliberate exception
//! (compensating delete instead of a transaction).

use rusqlite::Connection;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use metrics::counter;
use parley_core::types::{MessageRole, MessageStatus, ToolCallStatus};

use crate::errors::{LedgerError, Result};
use crate::sqlite::connection::{ConnectionPool, PooledConnection};
use crate::sqlite::repositories::agent::AgentRepo;
use crate::sqlite::repositories::attachment::AttachmentRepo;
use crate::sqlite::repositories::chat::ChatRepo;
use crate::sqlite::repositories::message::{MessageRepo, NewMessage};
use crate::sqlite::repositories::setting::SettingRepo;
use crate::sqlite::repositories::tool_call::{NewToolCall, ToolCallRepo};
use crate::sqlite::rows::{AgentRow, ChatRow, MessageRow, TimelineMessage, ToolCallRow};

pub use crate::sqlite::repositories::agent::CreateAgentOptions;
pub use crate::sqlite::repositories::attachment::NewAttachment;

/// Setting key gating model-based agent classification.
pub const AUTO_ROUTE_KEY: &str = "agent.auto_route";

/// Options for attaching a tool call to a chat.
pub struct AttachToolCallOptions<'a> {
    /// Owning chat.
    pub chat_id: &'a str,
    /// Provider-side correlation ID.
    pub call_id: Option<&'a str>,
    /// Resolved tool-server reference.
    pub server_id: Option<&'a str>,
    /// Function name without the server namespace.
    pub function_name: &'a str,
    /// Serialized arguments.
    pub function_args: Option<&'a Value>,
    /// `pending_confirmation` or `ready_to_be_executed`.
    pub status: ToolCallStatus,
}

/// How a tool call resolved.
#[derive(Clone, Debug)]
pub enum ToolCallResolution {
    /// The tool ran; `is_error` marks a failure payload.
    Completed {
        /// Result (or failure) payload, stored as `function_return`.
        output: Value,
        /// Whether the payload is an error marker.
        is_error: bool,
        /// RFC 3339 execution start.
        execution_start_at: String,
        /// RFC 3339 execution end.
        execution_end_at: String,
    },
    /// The user declined the call.
    Rejected,
}

/// High-level ledger store wrapping a connection pool and all repositories.
///
/// INVARIANT: chat-scoped writes are serialized per chat via in-process
/// mutex locks (`with_chat_write_lock`). Global mutations (chat creation,
/// agents, settings) use a separate global lock.
pub struct LedgerStore {
    pool: ConnectionPool,
    global_write_lock: Mutex<()>,
    chat_write_locks: Mutex<HashMap<String, Weak<Mutex<()>>>>,
}

impl LedgerStore {
    const SQLITE_BUSY_MAX_RETRIES: u32 = 32;

    /// Create a new `LedgerStore` with the given connection pool.
    pub fn new(pool: ConnectionPool) -> Self {
        Self {
            pool,
            global_write_lock: Mutex::new(()),
            chat_write_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Get the underlying pool (for maintenance tooling).
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    fn lock_global_write(&self) -> Result<MutexGuard<'_, ()>> {
        self.global_write_lock
            .lock()
            .map_err(|_| LedgerError::Internal("global write lock poisoned".into()))
    }

    fn acquire_chat_write_lock(&self, chat_id: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .chat_write_locks
            .lock()
            .map_err(|_| LedgerError::Internal("chat lock map poisoned".into()))?;

        // Opportunistically prune dead weak refs when the map grows.
        if locks.len() > 128 {
            locks.retain(|_, weak| weak.strong_count() > 0);
        }

        if let Some(existing) = locks.get(chat_id).and_then(Weak::upgrade) {
            return Ok(existing);
        }

        let lock = Arc::new(Mutex::new(()));
        let _ = locks.insert(chat_id.to_string(), Arc::downgrade(&lock));
        Ok(lock)
    }

    fn with_chat_write_lock<T>(
        &self,
        chat_id: &str,
        f: impl FnMut() -> Result<T>,
    ) -> Result<T> {
        let chat_lock = self.acquire_chat_write_lock(chat_id)?;
        let _guard = chat_lock
            .lock()
            .map_err(|_| LedgerError::Internal("chat write lock poisoned".into()))?;
        Self::retry_on_sqlite_busy(f)
    }

    fn with_global_write_lock<T>(&self, f: impl FnMut() -> Result<T>) -> Result<T> {
        let _guard = self.lock_global_write()?;
        Self::retry_on_sqlite_busy(f)
    }

    /// Retry an operation on `SQLite` BUSY/LOCKED with linear backoff + jitter.
    fn retry_on_sqlite_busy<T>(mut f: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempts = 0;

        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(err)
                    if Self::is_sqlite_busy_or_locked(&err)
                        && attempts < Self::SQLITE_BUSY_MAX_RETRIES =>
                {
                    attempts += 1;
                    let base_ms = u64::from(attempts).saturating_mul(10).min(500);
                    let jitter_range = base_ms / 4;
                    let jitter = if jitter_range > 0 {
                        rand::random::<u64>() % (jitter_range * 2 + 1)
                    } else {
                        0
                    };
                    let backoff_ms = base_ms.saturating_sub(jitter_range) + jitter;
                    std::thread::sleep(Duration::from_millis(backoff_ms));
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn is_sqlite_busy_or_locked(err: &LedgerError) -> bool {
        match err {
            LedgerError::Sqlite(rusqlite::Error::SqliteFailure(code, _)) => matches!(
                code.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    fn require_chat(conn: &Connection, chat_id: &str) -> Result<ChatRow> {
        ChatRepo::get_by_id(conn, chat_id)?
            .ok_or_else(|| LedgerError::ChatNotFound(chat_id.to_string()))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Chat lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Create a new chat.
    #[instrument(skip(self))]
    pub fn create_chat(&self, title: Option<&str>) -> Result<ChatRow> {
        self.with_global_write_lock(|| {
            let conn = self.conn()?;
            let chat = ChatRepo::create(&conn, title)?;
            debug!(chat_id = %chat.id, "chat created");
            Ok(chat)
        })
    }

    /// Get a chat by ID.
    pub fn get_chat(&self, chat_id: &str) -> Result<Option<ChatRow>> {
        let conn = self.conn()?;
        ChatRepo::get_by_id(&conn, chat_id)
    }

    /// List chats, most recently active first.
    pub fn list_chats(&self, limit: u32, offset: u32) -> Result<Vec<ChatRow>> {
        let conn = self.conn()?;
        ChatRepo::list(&conn, limit, offset)
    }

    /// Set a chat's title (summarization back-fill).
    #[instrument(skip(self, title))]
    pub fn set_chat_title(&self, chat_id: &str, title: &str) -> Result<bool> {
        self.with_chat_write_lock(chat_id, || {
            let conn = self.conn()?;
            ChatRepo::set_title(&conn, chat_id, title)
        })
    }

    /// Delete a chat and everything in it.
    #[instrument(skip(self))]
    pub fn delete_chat(&self, chat_id: &str) -> Result<bool> {
        self.with_global_write_lock(|| {
            let conn = self.conn()?;
            ChatRepo::delete(&conn, chat_id)
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Message flow
    // ─────────────────────────────────────────────────────────────────────

    /// Append a user message.
    ///
    /// Fails with [`LedgerError::BrokenFlow`] unless the chat is empty or
    /// its most recent non-error message is a successful assistant message.
    ///
    /// Attachments persist best-effort after the message insert; on failure
    /// the message is removed again (all-or-nothing turn input) and
    /// [`LedgerError::Attachment`] is returned.
    #[instrument(skip(self, content, attachments, metadata))]
    pub fn append_user_message(
        &self,
        chat_id: &str,
        content: &str,
        attachments: &[NewAttachment],
        metadata: Option<&Value>,
    ) -> Result<MessageRow> {
        self.with_chat_write_lock(chat_id, || {
            let conn = self.conn()?;
            let _ = Self::require_chat(&conn, chat_id)?;
            Self::check_user_append_invariant(&conn, chat_id)?;

            let tx = conn.unchecked_transaction()?;
            let message = MessageRepo::insert(
                &tx,
                &NewMessage {
                    chat_id,
                    role: MessageRole::User,
                    content,
                    thought: None,
                    status: MessageStatus::Success,
                    metadata,
                },
            )?;
            let _ = ChatRepo::touch(&tx, chat_id)?;
            tx.commit()?;

            // Attachments are persisted outside the transaction; a failure
            // rolls the message back with a compensating delete.
            for att in attachments {
                if let Err(e) = AttachmentRepo::insert(&conn, &message.id, att) {
                    warn!(message_id = %message.id, error = %e, "attachment insert failed, rolling back message");
                    let _ = MessageRepo::delete(&conn, &message.id)?;
                    return Err(LedgerError::Attachment(e.to_string()));
                }
            }

            debug!(chat_id, message_id = %message.id, "user message appended");
            Ok(message)
        })
    }

    fn check_user_append_invariant(conn: &Connection, chat_id: &str) -> Result<()> {
        match MessageRepo::last_non_error(conn, chat_id)? {
            None => Ok(()),
            Some(last)
                if last.role == MessageRole::Assistant
                    && last.status == MessageStatus::Success =>
            {
                Ok(())
            }
            Some(last) => {
                counter!("ledger_broken_flow_total").increment(1);
                Err(LedgerError::BrokenFlow(format!(
                    "cannot append user message after {} message with status {}",
                    last.role.as_str(),
                    last.status.as_str()
                )))
            }
        }
    }

    /// Open the assistant placeholder: an empty, pending assistant message
    /// holding a reasoning trace emitted before the final answer.
    #[instrument(skip(self, thought))]
    pub fn open_assistant_placeholder(&self, chat_id: &str, thought: &str) -> Result<MessageRow> {
        self.with_chat_write_lock(chat_id, || {
            let conn = self.conn()?;
            let _ = Self::require_chat(&conn, chat_id)?;

            if let Some(last) = MessageRepo::last_in_chat(&conn, chat_id)?
                && last.status == MessageStatus::Pending
            {
                counter!("ledger_broken_flow_total").increment(1);
                return Err(LedgerError::BrokenFlow(format!(
                    "chat already has an open assistant placeholder ({})",
                    last.id
                )));
            }

            let tx = conn.unchecked_transaction()?;
            let message = MessageRepo::insert(
                &tx,
                &NewMessage {
                    chat_id,
                    role: MessageRole::Assistant,
                    content: "",
                    thought: Some(thought),
                    status: MessageStatus::Pending,
                    metadata: None,
                },
            )?;
            let _ = ChatRepo::touch(&tx, chat_id)?;
            tx.commit()?;
            debug!(chat_id, message_id = %message.id, "assistant placeholder opened");
            Ok(message)
        })
    }

    /// Finalize the assistant turn.
    ///
    /// Merge rule: if the most recent message is a pending, content-empty
    /// assistant message, it is updated in place (thought → answer collapses
    /// into one row); otherwise a fresh success row is inserted.
    #[instrument(skip(self, content, thought, metadata))]
    pub fn finalize_assistant_message(
        &self,
        chat_id: &str,
        content: &str,
        thought: Option<&str>,
        metadata: Option<&Value>,
    ) -> Result<MessageRow> {
        self.with_chat_write_lock(chat_id, || {
            let conn = self.conn()?;
            let _ = Self::require_chat(&conn, chat_id)?;

            let last = MessageRepo::last_in_chat(&conn, chat_id)?;
            let placeholder = last.filter(|m| {
                m.role == MessageRole::Assistant
                    && m.status == MessageStatus::Pending
                    && m.content.is_empty()
            });

            let tx = conn.unchecked_transaction()?;
            let message = if let Some(placeholder) = placeholder {
                let _ = MessageRepo::finalize(&tx, &placeholder.id, content, thought, metadata)?;
                MessageRepo::get_by_id(&tx, &placeholder.id)?
                    .ok_or_else(|| LedgerError::MessageNotFound(placeholder.id.clone()))?
            } else {
                MessageRepo::insert(
                    &tx,
                    &NewMessage {
                        chat_id,
                        role: MessageRole::Assistant,
                        content,
                        thought,
                        status: MessageStatus::Success,
                        metadata,
                    },
                )?
            };
            let _ = ChatRepo::touch(&tx, chat_id)?;
            tx.commit()?;
            debug!(chat_id, message_id = %message.id, "assistant message finalized");
            Ok(message)
        })
    }

    /// Attach a tool call to the chat's current assistant turn.
    ///
    /// If the most recent message is not an assistant message, an empty
    /// successful assistant host is synthesized first. A pending placeholder
    /// is promoted to success — a tool call closes the thinking window.
    #[instrument(skip(self, opts), fields(chat_id = opts.chat_id, function = opts.function_name))]
    pub fn attach_tool_call(
        &self,
        opts: &AttachToolCallOptions<'_>,
    ) -> Result<(MessageRow, ToolCallRow)> {
        self.with_chat_write_lock(opts.chat_id, || {
            let conn = self.conn()?;
            let _ = Self::require_chat(&conn, opts.chat_id)?;

            let tx = conn.unchecked_transaction()?;
            let last = MessageRepo::last_in_chat(&tx, opts.chat_id)?;

            let host = match last {
                Some(m) if m.role == MessageRole::Assistant => {
                    if m.status == MessageStatus::Pending {
                        let _ = MessageRepo::set_status(&tx, &m.id, MessageStatus::Success)?;
                        MessageRepo::get_by_id(&tx, &m.id)?
                            .ok_or_else(|| LedgerError::MessageNotFound(m.id.clone()))?
                    } else {
                        m
                    }
                }
                _ => MessageRepo::insert(
                    &tx,
                    &NewMessage {
                        chat_id: opts.chat_id,
                        role: MessageRole::Assistant,
                        content: "",
                        thought: None,
                        status: MessageStatus::Success,
                        metadata: None,
                    },
                )?,
            };

            let tool_call = ToolCallRepo::insert(
                &tx,
                &NewToolCall {
                    chat_id: opts.chat_id,
                    message_id: &host.id,
                    call_id: opts.call_id,
                    server_id: opts.server_id,
                    function_name: opts.function_name,
                    function_args: opts.function_args,
                    status: opts.status,
                },
            )?;
            let _ = ChatRepo::touch(&tx, opts.chat_id)?;
            tx.commit()?;
            debug!(
                chat_id = opts.chat_id,
                tool_call_id = %tool_call.id,
                "tool call attached"
            );
            Ok((host, tool_call))
        })
    }

    /// Resolve a tool call to a terminal state.
    ///
    /// Only `pending_confirmation` / `ready_to_be_executed` calls may be
    /// resolved; anything else is a [`LedgerError::ToolCallState`] error.
    #[instrument(skip(self, resolution))]
    pub fn resolve_tool_call(
        &self,
        tool_call_id: &str,
        resolution: &ToolCallResolution,
    ) -> Result<ToolCallRow> {
        let conn = self.conn()?;
        let existing = ToolCallRepo::get_by_id(&conn, tool_call_id)?
            .ok_or_else(|| LedgerError::ToolCallNotFound(tool_call_id.to_string()))?;
        drop(conn);

        self.with_chat_write_lock(&existing.chat_id.clone(), || {
            let conn = self.conn()?;
            let current = ToolCallRepo::get_by_id(&conn, tool_call_id)?
                .ok_or_else(|| LedgerError::ToolCallNotFound(tool_call_id.to_string()))?;
            if !current.status.is_unresolved() {
                return Err(LedgerError::ToolCallState {
                    id: tool_call_id.to_string(),
                    status: current.status.as_str().to_string(),
                });
            }

            let changed = match resolution {
                ToolCallResolution::Completed {
                    output,
                    is_error,
                    execution_start_at,
                    execution_end_at,
                } => {
                    let status = if *is_error {
                        ToolCallStatus::Error
                    } else {
                        ToolCallStatus::Executed
                    };
                    ToolCallRepo::resolve(
                        &conn,
                        tool_call_id,
                        status,
                        Some(output),
                        Some(execution_start_at),
                        Some(execution_end_at),
                    )?
                }
                ToolCallResolution::Rejected => ToolCallRepo::resolve(
                    &conn,
                    tool_call_id,
                    ToolCallStatus::Rejected,
                    None,
                    None,
                    None,
                )?,
            };
            if !changed {
                return Err(LedgerError::ToolCallNotFound(tool_call_id.to_string()));
            }
            ToolCallRepo::get_by_id(&conn, tool_call_id)?
                .ok_or_else(|| LedgerError::ToolCallNotFound(tool_call_id.to_string()))
        })
    }

    /// Tool calls in a chat still awaiting confirmation or execution.
    pub fn pending_tool_calls(&self, chat_id: &str) -> Result<Vec<ToolCallRow>> {
        let conn = self.conn()?;
        ToolCallRepo::unresolved_by_chat(&conn, chat_id)
    }

    /// Get one tool call.
    pub fn get_tool_call(&self, tool_call_id: &str) -> Result<Option<ToolCallRow>> {
        let conn = self.conn()?;
        ToolCallRepo::get_by_id(&conn, tool_call_id)
    }

    /// The recovery primitive: delete every message (tool calls cascade)
    /// strictly after the most recent successful assistant message,
    /// restoring the append invariant before a retry. Returns the number
    /// of messages deleted.
    #[instrument(skip(self))]
    pub fn truncate_to_last_success(&self, chat_id: &str) -> Result<usize> {
        self.with_chat_write_lock(chat_id, || {
            let conn = self.conn()?;
            let _ = Self::require_chat(&conn, chat_id)?;
            let tx = conn.unchecked_transaction()?;
            let deleted =
                match MessageRepo::last_success_assistant_rowid(&tx, chat_id)? {
                    Some(anchor) => MessageRepo::delete_after_rowid(&tx, chat_id, anchor)?,
                    None => MessageRepo::delete_all_in_chat(&tx, chat_id)?,
                };
            tx.commit()?;
            if deleted > 0 {
                debug!(chat_id, deleted, "truncated to last success");
            }
            Ok(deleted)
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────

    /// Most recent message in a chat.
    pub fn last_message(&self, chat_id: &str) -> Result<Option<MessageRow>> {
        let conn = self.conn()?;
        MessageRepo::last_in_chat(&conn, chat_id)
    }

    /// Count messages in a chat.
    pub fn count_messages(&self, chat_id: &str) -> Result<i64> {
        let conn = self.conn()?;
        MessageRepo::count_by_chat(&conn, chat_id)
    }

    /// Full timeline with nested tool calls and attachments, canonical
    /// (oldest-first) order. The storage query runs newest-first and the
    /// result is reversed, matching the display-layer contract.
    pub fn timeline(&self, chat_id: &str) -> Result<Vec<TimelineMessage>> {
        let conn = self.conn()?;
        let mut messages = MessageRepo::list_by_chat(&conn, chat_id, true)?;
        messages.reverse();
        messages
            .into_iter()
            .map(|message| {
                let tool_calls = ToolCallRepo::list_by_message(&conn, &message.id)?;
                let attachments = AttachmentRepo::list_by_message(&conn, &message.id)?;
                Ok(TimelineMessage {
                    message,
                    tool_calls,
                    attachments,
                })
            })
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Agents & settings
    // ─────────────────────────────────────────────────────────────────────

    /// Insert an agent.
    #[instrument(skip(self, opts), fields(name = %opts.name))]
    pub fn insert_agent(&self, opts: &CreateAgentOptions) -> Result<AgentRow> {
        self.with_global_write_lock(|| {
            let conn = self.conn()?;
            AgentRepo::create(&conn, opts)
        })
    }

    /// The full agent roster, creation order.
    pub fn list_agents(&self) -> Result<Vec<AgentRow>> {
        let conn = self.conn()?;
        AgentRepo::list(&conn)
    }

    /// Get one agent.
    pub fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRow>> {
        let conn = self.conn()?;
        AgentRepo::get_by_id(&conn, agent_id)
    }

    /// The main (default) agent.
    pub fn main_agent(&self) -> Result<Option<AgentRow>> {
        let conn = self.conn()?;
        AgentRepo::main(&conn)
    }

    /// Get a setting value.
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        SettingRepo::get(&conn, key)
    }

    /// Set a setting value.
    #[instrument(skip(self, value))]
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.with_global_write_lock(|| {
            let conn = self.conn()?;
            SettingRepo::set(&conn, key, value)
        })
    }

    /// Whether model-based agent classification is enabled.
    pub fn auto_route_enabled(&self) -> Result<bool> {
        Ok(self.get_setting(AUTO_ROUTE_KEY)?.as_deref() == Some("true"))
    }
}
