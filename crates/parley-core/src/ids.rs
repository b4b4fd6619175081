//! Prefixed UUIDv7 string identifiers.
//!
//! Every row in the ledger is keyed by a time-ordered UUIDv7 with a short
//! type prefix, so an ID is self-describing in logs and foreign keys are
//! hard to mix up.

use uuid::Uuid;

/// Generate a chat ID (`chat_…`).
pub fn chat_id() -> String {
    format!("chat_{}", Uuid::now_v7())
}

/// Generate a message ID (`msg_…`).
pub fn message_id() -> String {
    format!("msg_{}", Uuid::now_v7())
}

/// Generate a tool-call ID (`tc_…`).
pub fn tool_call_id() -> String {
    format!("tc_{}", Uuid::now_v7())
}

/// Generate an attachment ID (`att_…`).
pub fn attachment_id() -> String {
    format!("att_{}", Uuid::now_v7())
}

/// Generate an agent ID (`agt_…`).
pub fn agent_id() -> String {
    format!("agt_{}", Uuid::now_v7())
}

/// Current time as an RFC 3339 string — the canonical timestamp format
/// for all ledger columns.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
