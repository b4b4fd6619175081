//! OpenAI-compatible [`Model`] implementation.
//!
//! Speaks the chat-completions wire protocol with Bearer auth. Streamed
//! deltas are accumulated before emission so every chunk carries the
//! cumulative text; tool-call fragments are merged by slot index and
//! emitted as complete calls when the provider marks the turn terminal.

use async_stream::try_stream;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use metrics::counter;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};

use parley_core::events::{ModelEvent, SearchResult, StreamChunk, ToolCallRequest};
use parley_core::prompt::{PromptMessage, PromptRole};
use parley_core::tools::ToolDefinition;

use crate::errors::{ModelError, ModelResult};
use crate::model::{Model, ModelEventStream};

use super::types::{
    ChatChunk, ChatRequest, ChatResponse, WireFunction, WireMessage, WireTool,
};

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Configuration for an OpenAI-compatible backend.
#[derive(Clone, Debug)]
pub struct OpenAiCompatConfig {
    /// Model identifier sent on every request.
    pub model: String,
    /// Bearer token.
    pub api_key: String,
    /// API root override (for compatible providers and tests).
    pub base_url: Option<String>,
    /// Output token cap, provider default when unset.
    pub max_tokens: Option<u32>,
}

/// OpenAI-compatible chat model.
pub struct OpenAiCompatModel {
    config: OpenAiCompatConfig,
    client: reqwest::Client,
}

impl OpenAiCompatModel {
    /// Create a new backend.
    #[must_use]
    pub fn new(config: OpenAiCompatConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Create a new backend with a shared HTTP client.
    #[must_use]
    pub fn with_client(config: OpenAiCompatConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    fn build_headers(&self) -> ModelResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth_value = format!("Bearer {}", self.config.api_key);
        let _ = headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value)
                .map_err(|e| ModelError::Config(format!("invalid API key header: {e}")))?,
        );
        Ok(headers)
    }

    fn convert_messages(messages: &[PromptMessage]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    PromptRole::System => "system".to_string(),
                    PromptRole::User => "user".to_string(),
                    PromptRole::Assistant => "assistant".to_string(),
                },
                content: m.content.clone(),
            })
            .collect()
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Option<Vec<WireTool>> {
        if tools.is_empty() {
            return None;
        }
        Some(
            tools
                .iter()
                .map(|t| WireTool {
                    kind: "function".to_string(),
                    function: WireFunction {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    },
                })
                .collect(),
        )
    }

    fn endpoint(&self) -> String {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    async fn post(&self, request: &ChatRequest) -> ModelResult<reqwest::Response> {
        let response = self
            .client
            .post(self.endpoint())
            .headers(self.build_headers()?)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| {
                    v.pointer("/error/message")
                        .and_then(Value::as_str)
                        .map(String::from)
                })
                .unwrap_or(body);
            error!(status = status.as_u16(), "chat completions API error");
            counter!("model_api_errors_total").increment(1);
            return Err(ModelError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Model for OpenAiCompatModel {
    fn display_name(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn stream_response(
        &self,
        messages: &[PromptMessage],
        tools: &[ToolDefinition],
        cancel: CancellationToken,
    ) -> ModelResult<ModelEventStream> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: Self::convert_messages(messages),
            stream: true,
            tools: Self::convert_tools(tools),
            max_tokens: self.config.max_tokens,
            response_format: None,
        };
        debug!(
            message_count = request.messages.len(),
            has_tools = request.tools.is_some(),
            "starting stream"
        );
        counter!("model_stream_requests_total").increment(1);

        let response = self.post(&request).await?;
        let mut events = response.bytes_stream().eventsource();

        let stream = try_stream! {
            let mut acc = StreamAccumulator::default();
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let event = tokio::select! {
                    () = cancel.cancelled() => break,
                    next = events.next() => match next {
                        Some(event) => event,
                        None => break,
                    },
                };
                let event = event.map_err(|e| ModelError::Stream(e.to_string()))?;
                if event.data.trim() == "[DONE]" {
                    break;
                }
                let chunk: ChatChunk = serde_json::from_str(&event.data)?;
                if let Some(out) = acc.absorb(chunk) {
                    yield ModelEvent::Chunk(out);
                }
                if acc.turn_is_tool_calls {
                    for call in acc.take_tool_calls()? {
                        yield ModelEvent::ToolCall(call);
                    }
                }
            }
            // Drain calls the provider never marked terminal, unless the
            // stream was cut short by cancellation.
            if !cancel.is_cancelled() {
                for call in acc.take_tool_calls()? {
                    yield ModelEvent::ToolCall(call);
                }
            }
        };
        Ok(Box::pin(stream))
    }

    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn structured_response(
        &self,
        messages: &[PromptMessage],
        schema: &Value,
    ) -> ModelResult<Value> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: Self::convert_messages(messages),
            stream: false,
            tools: None,
            max_tokens: self.config.max_tokens,
            response_format: Some(json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "structured_output",
                    "strict": true,
                    "schema": schema,
                },
            })),
        };
        counter!("model_structured_requests_total").increment(1);

        let response = self.post(&request).await?;
        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .filter(|c| !c.is_empty())
            .ok_or(ModelError::EmptyCompletion)?;
        Ok(serde_json::from_str(content)?)
    }
}

/// Merges provider deltas into cumulative chunks and complete tool calls.
#[derive(Default)]
struct StreamAccumulator {
    content: String,
    thought: String,
    /// `(index, id, name, raw argument text)` per in-flight call.
    pending_calls: Vec<(u32, Option<String>, String, String)>,
    search_results: Option<Vec<SearchResult>>,
    search_results_emitted: bool,
    turn_is_tool_calls: bool,
}

impl StreamAccumulator {
    /// Absorb one chunk; returns a cumulative [`StreamChunk`] when the
    /// chunk carried visible progress (text, reasoning, or citations).
    fn absorb(&mut self, chunk: ChatChunk) -> Option<StreamChunk> {
        let mut progressed = false;

        if let Some(results) = chunk.search_results
            && self.search_results.is_none()
        {
            self.search_results = Some(
                results
                    .into_iter()
                    .map(|r| SearchResult {
                        title: r.title,
                        url: r.url,
                    })
                    .collect(),
            );
            progressed = true;
        }

        if let Some(choice) = chunk.choices.into_iter().next() {
            if let Some(content) = choice.delta.content
                && !content.is_empty()
            {
                self.content.push_str(&content);
                progressed = true;
            }
            if let Some(reasoning) = choice.delta.reasoning
                && !reasoning.is_empty()
            {
                self.thought.push_str(&reasoning);
                progressed = true;
            }
            if let Some(fragments) = choice.delta.tool_calls {
                for fragment in fragments {
                    self.merge_fragment(fragment);
                }
            }
            if choice.finish_reason.as_deref() == Some("tool_calls") {
                self.turn_is_tool_calls = true;
            }
        }

        if !progressed {
            return None;
        }

        let search_results = if self.search_results_emitted {
            None
        } else {
            self.search_results_emitted = self.search_results.is_some();
            self.search_results.clone()
        };

        Some(StreamChunk {
            content: self.content.clone(),
            thought: if self.thought.is_empty() {
                None
            } else {
                Some(self.thought.clone())
            },
            search_results,
        })
    }

    fn merge_fragment(&mut self, fragment: super::types::ToolCallDelta) {
        let index = fragment.index.unwrap_or(0);
        let (name_frag, args_frag) = fragment
            .function
            .map(|f| (f.name, f.arguments))
            .unwrap_or_default();

        if let Some((_, id, name, args)) = self
            .pending_calls
            .iter_mut()
            .find(|(idx, _, _, _)| *idx == index)
        {
            if fragment.id.is_some() {
                *id = fragment.id;
            }
            if let Some(n) = name_frag {
                name.push_str(&n);
            }
            if let Some(a) = args_frag {
                args.push_str(&a);
            }
        } else {
            self.pending_calls.push((
                index,
                fragment.id,
                name_frag.unwrap_or_default(),
                args_frag.unwrap_or_default(),
            ));
        }
    }

    /// Drain completed tool calls, parsing argument text into JSON.
    fn take_tool_calls(&mut self) -> ModelResult<Vec<ToolCallRequest>> {
        self.turn_is_tool_calls = false;
        let pending = std::mem::take(&mut self.pending_calls);
        pending
            .into_iter()
            .map(|(index, id, name, args)| {
                let arguments = if args.trim().is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(&args)?
                };
                Ok(ToolCallRequest {
                    id: id.unwrap_or_else(|| format!("call_{index}")),
                    name,
                    arguments,
                })
            })
            .collect()
    }
}
