//! Wire types for the OpenAI-compatible chat-completions API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A chat-completions request body.
#[derive(Debug, Serialize)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation transcript.
    pub messages: Vec<WireMessage>,
    /// Whether to stream the response as SSE.
    pub stream: bool,
    /// Tool definitions, omitted when empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<WireTool>>,
    /// Output token cap.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Structured-output constraint (`json_schema` response format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
}

/// One transcript entry on the wire.
#[derive(Debug, Serialize)]
pub struct WireMessage {
    /// `system`, `user`, or `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
}

/// A tool definition on the wire.
#[derive(Debug, Serialize)]
pub struct WireTool {
    /// Always `"function"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Function payload.
    pub function: WireFunction,
}

/// Function payload inside a [`WireTool`].
#[derive(Debug, Serialize)]
pub struct WireFunction {
    /// Namespaced function name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the arguments.
    pub parameters: Value,
}

// ── Streaming response ──────────────────────────────────────────────────

/// One parsed SSE chunk.
#[derive(Debug, Deserialize)]
pub struct ChatChunk {
    /// Per-choice deltas; only the first choice is used.
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    /// Grounding citations, sent by search-capable providers.
    #[serde(default)]
    pub search_results: Option<Vec<WireSearchResult>>,
}

/// Delta wrapper within a chunk.
#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    /// Incremental payload.
    #[serde(default)]
    pub delta: ChunkDelta,
    /// Terminal marker (`stop`, `tool_calls`, `length`).
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Incremental content within a choice.
#[derive(Debug, Default, Deserialize)]
pub struct ChunkDelta {
    /// Answer text fragment.
    #[serde(default)]
    pub content: Option<String>,
    /// Chain-of-thought fragment from reasoning models.
    #[serde(default)]
    pub reasoning: Option<String>,
    /// Tool-call fragments, merged by index across deltas.
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// One tool-call fragment.
#[derive(Debug, Deserialize)]
pub struct ToolCallDelta {
    /// Slot index for cross-delta merging.
    #[serde(default)]
    pub index: Option<u32>,
    /// Provider correlation ID, present on the first fragment.
    #[serde(default)]
    pub id: Option<String>,
    /// Function name/argument fragments.
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

/// Function fragment inside a [`ToolCallDelta`].
#[derive(Debug, Deserialize)]
pub struct FunctionDelta {
    /// Name fragment.
    #[serde(default)]
    pub name: Option<String>,
    /// Raw JSON argument text fragment.
    #[serde(default)]
    pub arguments: Option<String>,
}

/// A grounding citation on the wire.
#[derive(Debug, Deserialize)]
pub struct WireSearchResult {
    /// Page title.
    #[serde(default)]
    pub title: String,
    /// Page URL.
    #[serde(default)]
    pub url: String,
}

// ── Non-streaming response ──────────────────────────────────────────────

/// A non-streaming chat-completions response.
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    /// Completion choices; only the first is used.
    #[serde(default)]
    pub choices: Vec<ResponseChoice>,
}

/// One completion choice.
#[derive(Debug, Deserialize)]
pub struct ResponseChoice {
    /// The completed message.
    pub message: ResponseMessage,
}

/// Message body of a completion choice.
#[derive(Debug, Deserialize)]
pub struct ResponseMessage {
    /// Completion text.
    #[serde(default)]
    pub content: Option<String>,
}
