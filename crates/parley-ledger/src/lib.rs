//! # parley-ledger
//!
//! The durable chat ledger: an append-only record of messages and tool calls
//! per chat, stored in SQLite, plus the message-flow engine that enforces
//! the ordering invariants of a conversation:
//!
//! - messages within a chat are canonically ordered by creation time;
//! - a user message may only be appended to an empty chat or after a
//!   successful assistant message;
//! - at most one assistant message per chat is `pending` (the open turn).
//!
//! ## Layering
//!
//! - [`sqlite`]: connection pool, migrations, and stateless row repositories
//!   (every method takes `&Connection`).
//! - [`store::LedgerStore`]: the high-level API. Serializes writes per chat,
//!   retries on `SQLITE_BUSY`, and implements the flow operations
//!   (append / placeholder / finalize-merge / tool-call attach / truncate).
//!
//! ## Crate Position
//!
//! Depends on: parley-core. Depended on by: parley-runtime.

#![deny(unsafe_code)]

pub mod errors;
pub mod sqlite;
pub mod store;

pub use errors::{LedgerError, Result};
pub use sqlite::connection::{ConnectionConfig, ConnectionPool, new_file, new_in_memory, run_migrations};
pub use sqlite::rows::{
    AgentRow, AttachmentRow, ChatRow, McpBinding, MessageRow, StyleDescriptor, StyleKind,
    TimelineMessage, ToolCallRow, ToolSpec,
};
pub use store::ledger_store::{
    AttachToolCallOptions, CreateAgentOptions, LedgerStore, NewAttachment, ToolCallResolution,
};
