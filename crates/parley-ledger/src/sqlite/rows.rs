//! Materialized row types for the ledger tables.

use parley_core::types::{MessageRole, MessageStatus, ToolCallStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A chat row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatRow {
    /// Chat ID (`chat_…`).
    pub id: String,
    /// Title — `None` until the summarization back-fill completes.
    pub title: Option<String>,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// RFC 3339 last-activity time (bumped on every append).
    pub updated_at: String,
}

/// A message row. Canonical chat order is `created_at` ascending.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageRow {
    /// Message ID (`msg_…`).
    pub id: String,
    /// Owning chat.
    pub chat_id: String,
    /// Author role.
    pub role: MessageRole,
    /// Text content — may be empty (tool-call hosts, open placeholders).
    pub content: String,
    /// Side-channel reasoning trace.
    pub thought: Option<String>,
    /// Lifecycle status.
    pub status: MessageStatus,
    /// Opaque structured payload: long-text documents, search results,
    /// routing agent.
    pub metadata: Option<Value>,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// RFC 3339 last-update time.
    pub updated_at: String,
}

/// A tool call row, always attached to an assistant message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRow {
    /// Tool call ID (`tc_…`).
    pub id: String,
    /// Provider-side correlation ID, if the model supplied one.
    pub call_id: Option<String>,
    /// Owning chat.
    pub chat_id: String,
    /// Hosting assistant message.
    pub message_id: String,
    /// Resolved tool-server reference, if known.
    pub server_id: Option<String>,
    /// Function name (without the server namespace).
    pub function_name: String,
    /// Serialized arguments.
    pub function_args: Option<Value>,
    /// Serialized result — `None` until resolved.
    pub function_return: Option<Value>,
    /// Lifecycle status.
    pub status: ToolCallStatus,
    /// RFC 3339 execution start, set when the tool ran.
    pub execution_start_at: Option<String>,
    /// RFC 3339 execution end.
    pub execution_end_at: Option<String>,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// RFC 3339 last-update time.
    pub updated_at: String,
}

/// An attachment row (user-supplied file on a message).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRow {
    /// Attachment ID (`att_…`).
    pub id: String,
    /// Hosting message.
    pub message_id: String,
    /// Original file name.
    pub file_name: String,
    /// Sniffed file type label.
    pub file_type: String,
    /// Size in bytes.
    pub file_size: i64,
    /// Raw bytes — optional, large payloads may live elsewhere.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<u8>>,
    /// RFC 3339 creation time.
    pub created_at: String,
}

/// Style/tone preference attached to an agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleDescriptor {
    /// Descriptor name, e.g. "concise".
    pub name: String,
    /// Whether this shapes format or voice.
    pub kind: StyleKind,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Kind of style descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleKind {
    /// Response format preference.
    Style,
    /// Response voice preference.
    Tone,
}

/// A tool exposed by a bound MCP server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Function name as the server exposes it.
    pub name: String,
    /// Description shown to the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON-schema input description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// An agent's binding to one tool server: the selected tool subset plus
/// the tools allowed to run without user confirmation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct McpBinding {
    /// Tool-server reference.
    pub server_id: String,
    /// Display name of the server.
    pub server_name: String,
    /// Tools from this server the agent may use.
    pub selected_tools: Vec<ToolSpec>,
    /// Tool names that skip the confirmation step.
    #[serde(default)]
    pub confirmation_bypass: Vec<String>,
}

/// An agent row: instruction + model + tool set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentRow {
    /// Agent ID (`agt_…`).
    pub id: String,
    /// Display name (also the mention token, with spaces dashed).
    pub name: String,
    /// System prompt text.
    pub instruction: String,
    /// Model reference resolved through the model registry.
    pub llm_id: String,
    /// Whether this is the default agent. Exactly one per ledger.
    pub is_main: bool,
    /// Style/tone descriptors.
    pub styles: Vec<StyleDescriptor>,
    /// Tool-server bindings.
    pub mcps: Vec<McpBinding>,
    /// RFC 3339 creation time.
    pub created_at: String,
}

/// A message with its nested tool calls and attachments, as returned by
/// timeline queries and held in the session cache.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimelineMessage {
    /// The message itself.
    pub message: MessageRow,
    /// Tool calls hosted by this message, creation order.
    pub tool_calls: Vec<ToolCallRow>,
    /// Attachments on this message.
    pub attachments: Vec<AttachmentRow>,
}

impl TimelineMessage {
    /// Wrap a bare message with no relations.
    pub fn bare(message: MessageRow) -> Self {
        Self {
            message,
            tool_calls: Vec::new(),
            attachments: Vec::new(),
        }
    }
}
