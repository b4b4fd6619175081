//! The [`Model`] trait — the seam between orchestration and backends.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use parley_core::events::ModelEvent;
use parley_core::prompt::PromptMessage;
use parley_core::tools::ToolDefinition;

use crate::errors::ModelResult;

/// Boxed stream of model events.
///
/// Chunk events carry cumulative content (the full text so far).
pub type ModelEventStream = Pin<Box<dyn Stream<Item = ModelResult<ModelEvent>> + Send>>;

/// A chat model backend.
#[async_trait]
pub trait Model: Send + Sync {
    /// Human-readable model name for logging and UI.
    fn display_name(&self) -> &str;

    /// Stream a response to the given prompt transcript.
    ///
    /// Backends observe `cancel` between events: once the token is
    /// cancelled the stream ends without yielding further items. The
    /// caller decides what to do with content already received.
    async fn stream_response(
        &self,
        messages: &[PromptMessage],
        tools: &[ToolDefinition],
        cancel: CancellationToken,
    ) -> ModelResult<ModelEventStream>;

    /// One-shot, non-streaming completion constrained to a JSON schema.
    ///
    /// Used for classification and title generation.
    async fn structured_response(
        &self,
        messages: &[PromptMessage],
        schema: &Value,
    ) -> ModelResult<Value>;
}
