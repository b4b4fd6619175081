//! Model stream events.
//!
//! Emitted by a model while generating a reply. These are transient (never
//! persisted) and drive real-time UI updates; the orchestrator folds them
//! into the ledger when the stream ends.
//!
//! Chunks are **cumulative**: each [`StreamChunk::content`] carries the full
//! text generated so far, not a delta. The last chunk observed before the
//! stream ends is therefore the complete reply.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A web search hit surfaced by the model alongside its answer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Result title.
    pub title: String,
    /// Result URL.
    pub url: String,
}

/// One cumulative content snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Full content generated so far.
    pub content: String,
    /// Full reasoning trace generated so far, if the model emits one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    /// Search results, carried by the first chunk that observed them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_results: Option<Vec<SearchResult>>,
}

/// A tool invocation requested by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Provider-side call ID (used to correlate the result).
    pub id: String,
    /// Namespaced function name (`server__function`).
    pub name: String,
    /// Serialized arguments.
    pub arguments: Value,
}

/// Events emitted during model response streaming.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelEvent {
    /// Cumulative content snapshot.
    Chunk(StreamChunk),
    /// Fully-constructed tool call.
    ToolCall(ToolCallRequest),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chunk_serializes_tagged() {
        let event = ModelEvent::Chunk(StreamChunk {
            content: "hello".into(),
            thought: None,
            search_results: None,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "chunk");
        assert_eq!(json["content"], "hello");
        assert!(json.get("thought").is_none());
    }

    #[test]
    fn tool_call_round_trips() {
        let event = ModelEvent::ToolCall(ToolCallRequest {
            id: "call_1".into(),
            name: "srv__search".into(),
            arguments: json!({"query": "rust"}),
        });
        let json = serde_json::to_string(&event).unwrap();
        let back: ModelEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
