//! Detached chat-title generation.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, warn};

use parley_core::prompt::PromptMessage;
use parley_llm::ModelRegistry;

use crate::events::RuntimeEvent;
use crate::orchestrator::turn::TurnOrchestrator;

/// Title used when summarization fails or no model is available.
pub const TITLE_FALLBACK: &str = "New Chat";

/// Kick off title generation detached from the turn. The result (or the
/// fallback) is stored and published as [`RuntimeEvent::TitleUpdated`];
/// a failure is never a turn failure.
pub(crate) fn spawn_title_generation(
    orchestrator: Arc<TurnOrchestrator>,
    chat_id: String,
    prompt: String,
) {
    let _handle = tokio::spawn(async move {
        let title = generate_title(orchestrator.registry(), &prompt).await;
        match orchestrator.ledger().set_chat_title(&chat_id, &title) {
            Ok(true) => {
                debug!(chat_id, title, "chat title back-filled");
                let _ = orchestrator
                    .emitter()
                    .emit(RuntimeEvent::TitleUpdated { chat_id, title });
            }
            Ok(false) => warn!(chat_id, "chat vanished before title was stored"),
            Err(e) => warn!(chat_id, error = %e, "failed to store chat title"),
        }
    });
}

/// One-shot structured summary against the default model.
pub(crate) async fn generate_title(registry: &ModelRegistry, prompt: &str) -> String {
    let Some(model) = registry.default_model() else {
        return TITLE_FALLBACK.to_string();
    };

    let schema = json!({
        "type": "object",
        "properties": { "title": { "type": "string" } },
        "required": ["title"],
        "additionalProperties": false
    });
    let messages = vec![
        PromptMessage::system(
            "Summarize the user's message as a chat title of at most six words. \
             Respond with the title only.",
        ),
        PromptMessage::user(prompt),
    ];

    match model.structured_response(&messages, &schema).await {
        Ok(value) => value
            .get("title")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map_or_else(|| TITLE_FALLBACK.to_string(), String::from),
        Err(e) => {
            warn!(error = %e, "title generation failed");
            TITLE_FALLBACK.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_llm::testutil::ScriptedModel;

    fn registry_with(model: ScriptedModel) -> ModelRegistry {
        let mut registry = ModelRegistry::new();
        registry.register("llm_default", Arc::new(model));
        registry
    }

    #[tokio::test]
    async fn uses_structured_title() {
        let model = ScriptedModel::new("m");
        model.push_structured(json!({"title": "  Rust questions  "}));
        let title = generate_title(&registry_with(model), "how do lifetimes work?").await;
        assert_eq!(title, "Rust questions");
    }

    #[tokio::test]
    async fn failure_degrades_to_fallback() {
        let model = ScriptedModel::new("m");
        model.push_structured_error("boom");
        let title = generate_title(&registry_with(model), "hello").await;
        assert_eq!(title, TITLE_FALLBACK);
    }

    #[tokio::test]
    async fn empty_title_degrades_to_fallback() {
        let model = ScriptedModel::new("m");
        model.push_structured(json!({"title": ""}));
        let title = generate_title(&registry_with(model), "hello").await;
        assert_eq!(title, TITLE_FALLBACK);
    }

    #[tokio::test]
    async fn empty_registry_degrades_to_fallback() {
        let registry = ModelRegistry::new();
        assert_eq!(generate_title(&registry, "hello").await, TITLE_FALLBACK);
    }
}
