//! Ledger error types.

use thiserror::Error;

/// Errors produced by the ledger store and repositories.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// An append would violate the conversation ordering invariant.
    /// Programming or race bug — never retried, surfaced to the caller.
    #[error("broken conversation flow: {0}")]
    BrokenFlow(String),

    /// Chat does not exist.
    #[error("chat not found: {0}")]
    ChatNotFound(String),

    /// Message does not exist.
    #[error("message not found: {0}")]
    MessageNotFound(String),

    /// Tool call does not exist.
    #[error("tool call not found: {0}")]
    ToolCallNotFound(String),

    /// Tool call is not in a resolvable state (already resolved).
    #[error("tool call {id} cannot be resolved from status {status}")]
    ToolCallState {
        /// Tool call ID.
        id: String,
        /// Current status string.
        status: String,
    },

    /// Attachment persistence failed after the message insert; the message
    /// was rolled back with a compensating delete.
    #[error("attachment persistence failed: {0}")]
    Attachment(String),

    /// Underlying SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON (de)serialization error on a metadata column.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invariant violation inside the store itself.
    #[error("internal ledger error: {0}")]
    Internal(String),
}

/// Ledger result alias.
pub type Result<T> = std::result::Result<T, LedgerError>;
