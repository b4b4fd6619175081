//! Scripted in-memory [`Model`] for exercising orchestration without HTTP.

use std::collections::VecDeque;

use async_stream::stream;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use parley_core::events::ModelEvent;
use parley_core::prompt::PromptMessage;
use parley_core::tools::ToolDefinition;

use crate::errors::{ModelError, ModelResult};
use crate::model::{Model, ModelEventStream};

/// One scripted streaming turn.
enum ScriptedTurn {
    /// Emit these events, then end the stream. With `hold_open` set the
    /// stream stays alive after the last event until cancelled, which lets
    /// tests cancel at a deterministic point.
    Events {
        events: Vec<ModelEvent>,
        hold_open: bool,
    },
    /// Emit these events, then fail with a stream error.
    FailAfter {
        events: Vec<ModelEvent>,
        message: String,
    },
}

/// A model that replays pre-scripted turns.
///
/// Each `stream_response` call consumes the next scripted turn; each
/// `structured_response` call consumes the next scripted value. Prompts
/// are recorded for assertion.
pub struct ScriptedModel {
    name: String,
    turns: Mutex<VecDeque<ScriptedTurn>>,
    structured: Mutex<VecDeque<ModelResult<Value>>>,
    stream_prompts: Mutex<Vec<Vec<PromptMessage>>>,
    structured_prompts: Mutex<Vec<Vec<PromptMessage>>>,
}

impl ScriptedModel {
    /// Create a scripted model with the given display name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            turns: Mutex::new(VecDeque::new()),
            structured: Mutex::new(VecDeque::new()),
            stream_prompts: Mutex::new(Vec::new()),
            structured_prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue a turn that emits `events` and ends.
    pub fn push_turn(&self, events: Vec<ModelEvent>) {
        self.turns.lock().push_back(ScriptedTurn::Events {
            events,
            hold_open: false,
        });
    }

    /// Queue a turn that emits `events` and then blocks until cancelled.
    pub fn push_turn_hold_open(&self, events: Vec<ModelEvent>) {
        self.turns.lock().push_back(ScriptedTurn::Events {
            events,
            hold_open: true,
        });
    }

    /// Queue a turn that emits `events` and then yields a stream error.
    pub fn push_failing_turn(&self, events: Vec<ModelEvent>, message: impl Into<String>) {
        self.turns.lock().push_back(ScriptedTurn::FailAfter {
            events,
            message: message.into(),
        });
    }

    /// Queue a structured-completion result.
    pub fn push_structured(&self, value: Value) {
        self.structured.lock().push_back(Ok(value));
    }

    /// Queue a structured-completion failure.
    pub fn push_structured_error(&self, message: impl Into<String>) {
        self.structured
            .lock()
            .push_back(Err(ModelError::Stream(message.into())));
    }

    /// Prompts passed to `stream_response`, in call order.
    #[must_use]
    pub fn stream_prompts(&self) -> Vec<Vec<PromptMessage>> {
        self.stream_prompts.lock().clone()
    }

    /// Prompts passed to `structured_response`, in call order.
    #[must_use]
    pub fn structured_prompts(&self) -> Vec<Vec<PromptMessage>> {
        self.structured_prompts.lock().clone()
    }
}

#[async_trait]
impl Model for ScriptedModel {
    fn display_name(&self) -> &str {
        &self.name
    }

    async fn stream_response(
        &self,
        messages: &[PromptMessage],
        _tools: &[ToolDefinition],
        cancel: CancellationToken,
    ) -> ModelResult<ModelEventStream> {
        self.stream_prompts.lock().push(messages.to_vec());
        let turn = self.turns.lock().pop_front();

        let stream = stream! {
            match turn {
                None => {}
                Some(ScriptedTurn::Events { events, hold_open }) => {
                    for event in events {
                        if cancel.is_cancelled() {
                            return;
                        }
                        yield Ok(event);
                    }
                    if hold_open {
                        cancel.cancelled().await;
                    }
                }
                Some(ScriptedTurn::FailAfter { events, message }) => {
                    for event in events {
                        if cancel.is_cancelled() {
                            return;
                        }
                        yield Ok(event);
                    }
                    yield Err(ModelError::Stream(message));
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn structured_response(
        &self,
        messages: &[PromptMessage],
        _schema: &Value,
    ) -> ModelResult<Value> {
        self.structured_prompts.lock().push(messages.to_vec());
        self.structured
            .lock()
            .pop_front()
            .unwrap_or(Err(ModelError::EmptyCompletion))
    }
}
