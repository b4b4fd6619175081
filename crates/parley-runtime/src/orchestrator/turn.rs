//! The turn state machine.
//!
//! One turn covers a single user prompt (or a resume after tool
//! execution): route to an agent, stream the model's reply, persist the
//! outcome, and run or park any requested tool calls. Exactly one turn
//! may be active per chat; cancellation is cooperative and the partial
//! reply observed so far is always persisted.

use std::collections::HashMap;
use std::sync::Arc;

use async_stream::stream;
use futures::{Stream, StreamExt};
use metrics::gauge;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_core::events::{ModelEvent, SearchResult, ToolCallRequest};
use parley_core::types::{MessageRole, MessageStatus, ToolCallStatus};
use parley_ledger::{
    AttachToolCallOptions, LedgerStore, MessageRow, NewAttachment, TimelineMessage,
    ToolCallResolution, ToolCallRow,
};
use parley_llm::ModelRegistry;

use crate::errors::{Result, RuntimeError};
use crate::events::{EventEmitter, RuntimeEvent};
use crate::orchestrator::confirmation::ToolRunner;
use crate::orchestrator::title;
use crate::prompt::{LongTextDocument, build_prompt};
use crate::routing::{RoutingContext, parse_mentions, select_agent};
use crate::session_cache::SessionCache;
use crate::toolset::{resolve_tool, tool_definitions};

/// Input for one turn.
#[derive(Clone, Debug)]
pub struct TurnRequest {
    /// Target chat.
    pub chat_id: String,
    /// Raw user prompt. `None` resumes generation after tool execution.
    pub prompt: Option<String>,
    /// File attachments stored with the user message.
    pub attachments: Vec<NewAttachment>,
    /// Long pasted documents, sent to the model but kept out of the
    /// visible message content.
    pub long_text_documents: Vec<LongTextDocument>,
}

impl TurnRequest {
    /// A plain text turn.
    #[must_use]
    pub fn text(chat_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            prompt: Some(prompt.into()),
            attachments: Vec::new(),
            long_text_documents: Vec::new(),
        }
    }

    /// A resume turn: no new prompt, the transcript already ends with
    /// tool results.
    #[must_use]
    pub fn resume(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            prompt: None,
            attachments: Vec::new(),
            long_text_documents: Vec::new(),
        }
    }
}

/// Who is answering, attached to every streamed chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnMetadata {
    /// Display name of the selected agent.
    pub agent_name: String,
    /// Display name of the model generating the reply.
    pub model_name: String,
}

/// Events yielded while a turn runs.
#[derive(Clone, Debug)]
pub enum TurnEvent {
    /// Cumulative content snapshot.
    Chunk {
        /// Full reply text so far.
        content: String,
        /// Full reasoning trace so far, when the model emits one.
        thought: Option<String>,
        /// Search results observed during this turn, once captured.
        search_results: Option<Vec<SearchResult>>,
        /// Who is answering.
        metadata: TurnMetadata,
    },
    /// The assistant message as persisted.
    Finalized(MessageRow),
    /// A tool call was attached (pending confirmation or ready to run).
    ToolCall(ToolCallRow),
    /// A tool call finished (executed, failed, or rejected).
    ToolCallResolved(ToolCallRow),
}

/// Drives turns and owns the per-chat active-turn registry.
pub struct TurnOrchestrator {
    ledger: Arc<LedgerStore>,
    registry: Arc<ModelRegistry>,
    tools: Arc<dyn ToolRunner>,
    cache: Arc<SessionCache>,
    emitter: Arc<EventEmitter>,
    active_turns: Mutex<HashMap<String, CancellationToken>>,
}

/// Removes the active-turn entry when the turn's generator drops, so an
/// abandoned stream can never wedge its chat.
///
/// Only the registry entry is drop-guaranteed: dropping the stream
/// mid-generation without cancelling can leave a pending placeholder row
/// behind, which the next fresh turn's entry guard truncates.
struct TurnGuard {
    orchestrator: Arc<TurnOrchestrator>,
    chat_id: String,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.orchestrator.finish_turn(&self.chat_id);
    }
}

impl TurnOrchestrator {
    /// Create an orchestrator over the given collaborators.
    #[must_use]
    pub fn new(
        ledger: Arc<LedgerStore>,
        registry: Arc<ModelRegistry>,
        tools: Arc<dyn ToolRunner>,
        cache: Arc<SessionCache>,
    ) -> Self {
        Self {
            ledger,
            registry,
            tools,
            cache,
            emitter: Arc::new(EventEmitter::new()),
            active_turns: Mutex::new(HashMap::new()),
        }
    }

    /// The message ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<LedgerStore> {
        &self.ledger
    }

    /// The model registry.
    #[must_use]
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// The tool runner.
    #[must_use]
    pub fn tools(&self) -> &Arc<dyn ToolRunner> {
        &self.tools
    }

    /// The session cache.
    #[must_use]
    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    /// The out-of-band event emitter.
    #[must_use]
    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    /// Subscribe to out-of-band runtime events.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RuntimeEvent> {
        self.emitter.subscribe()
    }

    /// Whether a turn is currently running in the chat.
    #[must_use]
    pub fn has_active_turn(&self, chat_id: &str) -> bool {
        self.active_turns.lock().contains_key(chat_id)
    }

    /// Number of chats with a running turn.
    #[must_use]
    pub fn active_turn_count(&self) -> usize {
        self.active_turns.lock().len()
    }

    /// Request cooperative cancellation of the chat's active turn.
    /// Returns whether a turn was active.
    pub fn abort(&self, chat_id: &str) -> bool {
        let turns = self.active_turns.lock();
        match turns.get(chat_id) {
            Some(cancel) => {
                info!(chat_id, "turn cancellation requested");
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn begin_turn(&self, chat_id: &str) -> Result<CancellationToken> {
        let mut turns = self.active_turns.lock();
        if turns.contains_key(chat_id) {
            return Err(RuntimeError::TurnActive(chat_id.to_string()));
        }
        let cancel = CancellationToken::new();
        let _ = turns.insert(chat_id.to_string(), cancel.clone());
        gauge!("turns_active").set(turns.len() as f64);
        info!(chat_id, "turn started");
        Ok(cancel)
    }

    fn finish_turn(&self, chat_id: &str) {
        let mut turns = self.active_turns.lock();
        if turns.remove(chat_id).is_none() {
            return;
        }
        gauge!("turns_active").set(turns.len() as f64);
        drop(turns);
        debug!(chat_id, "turn finished");
        let _ = self.emitter.emit(RuntimeEvent::TurnFinished {
            chat_id: chat_id.to_string(),
        });
    }

    /// The agent that answered most recently, read off the cached
    /// timeline. Used on the resume path, where there is no prompt to
    /// route.
    fn resume_agent_id(&self, chat_id: &str) -> Option<String> {
        let timeline = self.cache.get(chat_id)?;
        timeline.iter().rev().find_map(|entry| {
            if entry.message.role == MessageRole::Assistant
                && entry.message.status == MessageStatus::Success
            {
                entry
                    .message
                    .metadata
                    .as_ref()?
                    .pointer("/agent/id")
                    .and_then(Value::as_str)
                    .map(String::from)
            } else {
                None
            }
        })
    }

    fn routing_context(&self) -> Result<RoutingContext> {
        Ok(RoutingContext {
            agents: self.ledger.list_agents()?,
            auto_route: self.ledger.auto_route_enabled()?,
        })
    }

    /// Run one turn, yielding events as they happen.
    ///
    /// The stream is lazy: nothing runs until polled. Yields
    /// [`TurnEvent::Chunk`] while streaming, then the persisted outcome.
    /// Cancellation and mid-stream errors both persist the content
    /// observed so far; an error is yielded as the final item after the
    /// partial reply is finalized.
    pub fn process_message(
        self: &Arc<Self>,
        request: TurnRequest,
    ) -> impl Stream<Item = Result<TurnEvent>> + Send + 'static {
        let this = Arc::clone(self);
        stream! {
            let chat_id = request.chat_id.clone();
            match this.ledger.get_chat(&chat_id) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    yield Err(RuntimeError::ChatNotFound(chat_id));
                    return;
                }
                Err(e) => {
                    yield Err(RuntimeError::Ledger(e));
                    return;
                }
            }

            let cancel = match this.begin_turn(&chat_id) {
                Ok(cancel) => cancel,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            let _guard = TurnGuard {
                orchestrator: Arc::clone(&this),
                chat_id: chat_id.clone(),
            };
            let _ = this.emitter.emit(RuntimeEvent::TurnStarted {
                chat_id: chat_id.clone(),
            });

            // Entry guards for fresh prompts: reject tool calls left
            // pending by an interrupted turn, then restore the append
            // invariant before anything else reads the timeline.
            if request.prompt.is_some() {
                match this.ledger.pending_tool_calls(&chat_id) {
                    Ok(dangling) => {
                        for call in dangling {
                            if let Err(e) = this
                                .ledger
                                .resolve_tool_call(&call.id, &ToolCallResolution::Rejected)
                            {
                                warn!(tool_call_id = %call.id, error = %e, "failed to reject dangling tool call");
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(RuntimeError::Ledger(e));
                        return;
                    }
                }
                match this.ledger.truncate_to_last_success(&chat_id) {
                    Ok(0) => {}
                    Ok(deleted) => {
                        warn!(chat_id, deleted, "dropped dangling rows from interrupted turn");
                        let _ = this.cache.evict(&chat_id);
                    }
                    Err(e) => {
                        yield Err(RuntimeError::Ledger(e));
                        return;
                    }
                }
            }

            if let Err(e) = this.cache.ensure_loaded(&this.ledger, &chat_id) {
                yield Err(RuntimeError::Ledger(e));
                return;
            }

            // Back-fill the chat title off-turn.
            match this.ledger.get_chat(&chat_id) {
                Ok(Some(chat)) => {
                    if chat.title.is_none()
                        && let Some(prompt) = request.prompt.as_deref()
                    {
                        title::spawn_title_generation(
                            Arc::clone(&this),
                            chat_id.clone(),
                            prompt.to_string(),
                        );
                    }
                }
                Ok(None) => {
                    yield Err(RuntimeError::ChatNotFound(chat_id.clone()));
                    return;
                }
                Err(e) => {
                    yield Err(RuntimeError::Ledger(e));
                    return;
                }
            }

            let ctx = match this.routing_context() {
                Ok(ctx) => ctx,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            // Route, then persist the (cleaned) user message. The history
            // snapshot is taken before the append so the current prompt is
            // never doubled in the first model call.
            let mut first_turn: Option<(Vec<TimelineMessage>, String)> = None;
            let agent = match request.prompt.as_deref() {
                Some(text) => {
                    let mention = parse_mentions(text, &ctx.agents);
                    let agent = match select_agent(
                        &this.registry,
                        &ctx,
                        mention.agent_id.as_deref(),
                        &mention.cleaned,
                    )
                    .await
                    {
                        Ok(agent) => agent.clone(),
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    };

                    let history = this.cache.get(&chat_id).unwrap_or_default();
                    let metadata = (!request.long_text_documents.is_empty()).then(|| {
                        json!({ "long_text_documents": request.long_text_documents })
                    });
                    match this.ledger.append_user_message(
                        &chat_id,
                        &mention.cleaned,
                        &request.attachments,
                        metadata.as_ref(),
                    ) {
                        Ok(message) => this.cache.append(&chat_id, TimelineMessage::bare(message)),
                        Err(e) => {
                            yield Err(RuntimeError::Ledger(e));
                            return;
                        }
                    }
                    first_turn = Some((history, mention.cleaned));
                    agent
                }
                None => {
                    let target = this
                        .resume_agent_id(&chat_id)
                        .or_else(|| ctx.main_agent().map(|a| a.id.clone()));
                    match select_agent(&this.registry, &ctx, target.as_deref(), "").await {
                        Ok(agent) => agent.clone(),
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            };

            let Some(model) = this.registry.resolve(Some(&agent.llm_id)) else {
                yield Err(RuntimeError::Configuration(format!(
                    "no model available for agent {}",
                    agent.name
                )));
                return;
            };
            let turn_metadata = TurnMetadata {
                agent_name: agent.name.clone(),
                model_name: model.display_name().to_string(),
            };
            let tool_defs = tool_definitions(&agent);

            loop {
                let (history, current) = match first_turn.take() {
                    Some((history, text)) => (history, Some(text)),
                    None => (this.cache.get(&chat_id).unwrap_or_default(), None),
                };
                let documents: &[LongTextDocument] = if current.is_some() {
                    &request.long_text_documents
                } else {
                    &[]
                };
                let prompt_messages =
                    build_prompt(&agent, &history, current.as_deref(), documents);

                let mut events = match model
                    .stream_response(&prompt_messages, &tool_defs, cancel.clone())
                    .await
                {
                    Ok(events) => events,
                    Err(e) => {
                        yield Err(RuntimeError::Generation(e));
                        return;
                    }
                };

                let mut content = String::new();
                let mut thought: Option<String> = None;
                let mut search_results: Option<Vec<SearchResult>> = None;
                let mut tool_requests: Vec<ToolCallRequest> = Vec::new();
                let mut placeholder_open = false;
                let mut stream_error: Option<RuntimeError> = None;

                while let Some(item) = events.next().await {
                    match item {
                        Ok(ModelEvent::Chunk(chunk)) => {
                            if search_results.is_none() && chunk.search_results.is_some() {
                                search_results = chunk.search_results;
                            }
                            // A reasoning trace arriving before any content
                            // surfaces the thought immediately via a pending
                            // placeholder row.
                            if !placeholder_open
                                && content.is_empty()
                                && chunk.content.is_empty()
                                && let Some(t) = chunk.thought.as_deref()
                            {
                                match this.ledger.open_assistant_placeholder(&chat_id, t) {
                                    Ok(row) => {
                                        this.cache.upsert_message(&chat_id, row);
                                        placeholder_open = true;
                                    }
                                    Err(e) => {
                                        warn!(chat_id, error = %e, "failed to open placeholder")
                                    }
                                }
                            }
                            content = chunk.content;
                            if chunk.thought.is_some() {
                                thought = chunk.thought;
                            }
                            yield Ok(TurnEvent::Chunk {
                                content: content.clone(),
                                thought: thought.clone(),
                                search_results: search_results.clone(),
                                metadata: turn_metadata.clone(),
                            });
                        }
                        Ok(ModelEvent::ToolCall(req)) => tool_requests.push(req),
                        Err(e) => {
                            stream_error = Some(RuntimeError::Generation(e));
                            break;
                        }
                    }
                }
                drop(events);

                // Finalize whatever was observed. Success, cancellation,
                // and mid-stream errors all take this path; only a pure
                // tool-call turn (nothing visible produced) skips it.
                let pure_tool_turn = content.is_empty()
                    && thought.is_none()
                    && !placeholder_open
                    && !tool_requests.is_empty()
                    && stream_error.is_none();
                if !pure_tool_turn {
                    let mut metadata = json!({
                        "agent": { "id": agent.id.clone(), "name": agent.name.clone() }
                    });
                    if let Some(results) = &search_results {
                        metadata["search_results"] = json!(results);
                    }
                    match this.ledger.finalize_assistant_message(
                        &chat_id,
                        &content,
                        thought.as_deref(),
                        Some(&metadata),
                    ) {
                        Ok(message) => {
                            this.cache.upsert_message(&chat_id, message.clone());
                            yield Ok(TurnEvent::Finalized(message));
                        }
                        Err(e) => {
                            yield Err(RuntimeError::Ledger(e));
                            return;
                        }
                    }
                }

                if let Some(e) = stream_error {
                    yield Err(e);
                    return;
                }
                if cancel.is_cancelled() || tool_requests.is_empty() {
                    return;
                }

                // Attach requested tool calls; bypassed ones run now.
                let mut executed_any = false;
                for req in tool_requests {
                    let resolved = resolve_tool(&agent, &req.name);
                    let status = if resolved.bypass {
                        ToolCallStatus::ReadyToBeExecuted
                    } else {
                        ToolCallStatus::PendingConfirmation
                    };
                    let opts = AttachToolCallOptions {
                        chat_id: &chat_id,
                        call_id: Some(&req.id),
                        server_id: resolved.server_id,
                        function_name: &resolved.function_name,
                        function_args: Some(&req.arguments),
                        status,
                    };
                    let (host, call) = match this.ledger.attach_tool_call(&opts) {
                        Ok(pair) => pair,
                        Err(e) => {
                            yield Err(RuntimeError::Ledger(e));
                            return;
                        }
                    };
                    this.cache.attach_tool_call(&chat_id, &host, call.clone());
                    let ready = call.status == ToolCallStatus::ReadyToBeExecuted;
                    let to_run = ready.then(|| call.clone());
                    yield Ok(TurnEvent::ToolCall(call));

                    if let Some(call) = to_run {
                        match this.execute_tool_call(&call).await {
                            Ok(row) => {
                                executed_any = true;
                                yield Ok(TurnEvent::ToolCallResolved(row));
                            }
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        }
                    }
                }

                let pending = match this.ledger.pending_tool_calls(&chat_id) {
                    Ok(pending) => pending,
                    Err(e) => {
                        yield Err(RuntimeError::Ledger(e));
                        return;
                    }
                };
                if executed_any && pending.is_empty() && !cancel.is_cancelled() {
                    // Every call settled without user input; hand the
                    // results back to the model.
                    continue;
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::confirmation::{ToolConfirmation, ToolOutcome};
    use async_trait::async_trait;
    use parley_core::events::StreamChunk;
    use parley_ledger::{
        ConnectionConfig, CreateAgentOptions, McpBinding, ToolSpec, new_in_memory, run_migrations,
    };
    use parley_llm::testutil::ScriptedModel;
    use std::time::Duration;

    struct StaticToolRunner {
        outcome: ToolOutcome,
    }

    #[async_trait]
    impl ToolRunner for StaticToolRunner {
        async fn call_tool(
            &self,
            _server_id: Option<&str>,
            _function: &str,
            _arguments: &Value,
        ) -> ToolOutcome {
            self.outcome.clone()
        }
    }

    fn chunk(content: &str) -> ModelEvent {
        ModelEvent::Chunk(StreamChunk {
            content: content.into(),
            thought: None,
            search_results: None,
        })
    }

    fn chunk_with_thought(content: &str, thought: &str) -> ModelEvent {
        ModelEvent::Chunk(StreamChunk {
            content: content.into(),
            thought: Some(thought.into()),
            search_results: None,
        })
    }

    fn tool_call(name: &str) -> ModelEvent {
        ModelEvent::ToolCall(ToolCallRequest {
            id: "call_1".into(),
            name: name.into(),
            arguments: json!({}),
        })
    }

    /// Orchestrator over an in-memory ledger with one main agent bound to
    /// a `list` tool on `srv_files`. The chat is pre-titled so title
    /// generation stays out of the way.
    fn harness(model: ScriptedModel, bypass: bool) -> (Arc<TurnOrchestrator>, String) {
        let pool = new_in_memory(&ConnectionConfig::default()).unwrap();
        run_migrations(&pool.get().unwrap()).unwrap();
        let ledger = Arc::new(LedgerStore::new(pool));
        let _ = ledger
            .insert_agent(&CreateAgentOptions {
                name: "Assistant".into(),
                instruction: "You are helpful.".into(),
                llm_id: "llm_default".into(),
                is_main: true,
                styles: vec![],
                mcps: vec![McpBinding {
                    server_id: "srv_files".into(),
                    server_name: "files".into(),
                    selected_tools: vec![ToolSpec {
                        name: "list".into(),
                        description: None,
                        input_schema: None,
                    }],
                    confirmation_bypass: if bypass { vec!["list".into()] } else { vec![] },
                }],
            })
            .unwrap();
        let _ = ledger
            .insert_agent(&CreateAgentOptions {
                name: "Echo".into(),
                instruction: "Repeat things.".into(),
                llm_id: "llm_default".into(),
                is_main: false,
                styles: vec![],
                mcps: vec![],
            })
            .unwrap();

        let mut registry = ModelRegistry::new();
        registry.register("llm_default", Arc::new(model));

        let orchestrator = Arc::new(TurnOrchestrator::new(
            Arc::clone(&ledger),
            Arc::new(registry),
            Arc::new(StaticToolRunner {
                outcome: ToolOutcome::success(json!({"files": ["a.txt"]})),
            }),
            Arc::new(SessionCache::new()),
        ));
        let chat = ledger.create_chat(Some("test chat")).unwrap();
        (orchestrator, chat.id)
    }

    async fn collect(
        stream: impl Stream<Item = Result<TurnEvent>>,
    ) -> Vec<Result<TurnEvent>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn streams_cumulative_chunks_and_persists_reply() {
        let model = ScriptedModel::new("m");
        model.push_turn(vec![chunk("Hel"), chunk("Hello")]);
        let (orch, chat_id) = harness(model, false);

        let events = collect(orch.process_message(TurnRequest::text(&chat_id, "hi"))).await;
        assert_eq!(events.len(), 3);
        match &events[0] {
            Ok(TurnEvent::Chunk { content, metadata, .. }) => {
                assert_eq!(content, "Hel");
                assert_eq!(metadata.agent_name, "Assistant");
                assert_eq!(metadata.model_name, "m");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match &events[2] {
            Ok(TurnEvent::Finalized(message)) => assert_eq!(message.content, "Hello"),
            other => panic!("unexpected event: {other:?}"),
        }

        let last = orch.ledger().last_message(&chat_id).unwrap().unwrap();
        assert_eq!(last.content, "Hello");
        assert_eq!(last.status, MessageStatus::Success);
        assert!(!orch.has_active_turn(&chat_id));
    }

    #[tokio::test]
    async fn cancel_mid_stream_persists_partial_reply() {
        let model = ScriptedModel::new("m");
        model.push_turn(vec![chunk("a"), chunk("ab"), chunk("abc")]);
        let (orch, chat_id) = harness(model, false);

        let mut stream = Box::pin(orch.process_message(TurnRequest::text(&chat_id, "hi")));
        let mut chunks_seen = 0;
        while let Some(item) = stream.next().await {
            if let Ok(TurnEvent::Chunk { .. }) = item {
                chunks_seen += 1;
                if chunks_seen == 2 {
                    assert!(orch.abort(&chat_id));
                }
            }
        }
        assert_eq!(chunks_seen, 2);

        let last = orch.ledger().last_message(&chat_id).unwrap().unwrap();
        assert_eq!(last.content, "ab");
        assert_eq!(last.status, MessageStatus::Success);
        assert_eq!(orch.ledger().count_messages(&chat_id).unwrap(), 2);
        assert!(!orch.has_active_turn(&chat_id));
    }

    #[tokio::test]
    async fn stream_error_persists_partial_then_surfaces() {
        let model = ScriptedModel::new("m");
        model.push_failing_turn(vec![chunk("par")], "boom");
        let (orch, chat_id) = harness(model, false);

        let events = collect(orch.process_message(TurnRequest::text(&chat_id, "hi"))).await;
        assert!(matches!(events[1], Ok(TurnEvent::Finalized(_))));
        assert!(matches!(
            events.last(),
            Some(Err(RuntimeError::Generation(_)))
        ));

        let last = orch.ledger().last_message(&chat_id).unwrap().unwrap();
        assert_eq!(last.content, "par");
        assert_eq!(last.status, MessageStatus::Success);
    }

    #[tokio::test]
    async fn second_turn_in_same_chat_is_rejected() {
        let model = ScriptedModel::new("m");
        model.push_turn_hold_open(vec![chunk("a")]);
        let (orch, chat_id) = harness(model, false);

        let mut first = Box::pin(orch.process_message(TurnRequest::text(&chat_id, "hi")));
        let _ = first.next().await;
        assert!(orch.has_active_turn(&chat_id));

        let second = collect(orch.process_message(TurnRequest::text(&chat_id, "again"))).await;
        assert_eq!(second.len(), 1);
        assert!(matches!(second[0], Err(RuntimeError::TurnActive(_))));

        orch.abort(&chat_id);
        while first.next().await.is_some() {}
        assert!(!orch.has_active_turn(&chat_id));
    }

    #[tokio::test]
    async fn unknown_chat_is_rejected() {
        let (orch, _) = harness(ScriptedModel::new("m"), false);
        let events = collect(orch.process_message(TurnRequest::text("chat_missing", "hi"))).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Err(RuntimeError::ChatNotFound(_))));
    }

    #[tokio::test]
    async fn dangling_rows_are_truncated_before_a_fresh_turn() {
        let model = ScriptedModel::new("m");
        model.push_turn(vec![chunk("answer")]);
        let (orch, chat_id) = harness(model, false);

        // Simulate a crashed turn: a user message with no reply.
        let _ = orch
            .ledger()
            .append_user_message(&chat_id, "orphan", &[], None)
            .unwrap();

        let events = collect(orch.process_message(TurnRequest::text(&chat_id, "hi"))).await;
        assert!(events.iter().all(Result::is_ok));

        let timeline = orch.ledger().timeline(&chat_id).unwrap();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].message.content, "hi");
        assert_eq!(timeline[1].message.content, "answer");
    }

    #[tokio::test]
    async fn dropped_stream_releases_chat_and_next_turn_truncates_placeholder() {
        let model = ScriptedModel::new("m");
        model.push_turn_hold_open(vec![chunk_with_thought("", "thinking")]);
        model.push_turn(vec![chunk("fresh")]);
        let (orch, chat_id) = harness(model, false);

        {
            let mut stream = Box::pin(orch.process_message(TurnRequest::text(&chat_id, "hi")));
            let _ = stream.next().await;
        }
        // The registry entry is released, but the placeholder row is not.
        assert!(!orch.has_active_turn(&chat_id));
        let orphan = orch.ledger().last_message(&chat_id).unwrap().unwrap();
        assert_eq!(orphan.status, MessageStatus::Pending);

        let events = collect(orch.process_message(TurnRequest::text(&chat_id, "again"))).await;
        assert!(events.iter().all(Result::is_ok));

        let timeline = orch.ledger().timeline(&chat_id).unwrap();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].message.content, "again");
        assert_eq!(timeline[1].message.content, "fresh");
    }

    #[tokio::test]
    async fn dangling_pending_tool_call_is_rejected_on_fresh_turn() {
        let model = ScriptedModel::new("m");
        model.push_turn(vec![chunk("ok")]);
        let (orch, chat_id) = harness(model, false);

        let (_, stale) = orch
            .ledger()
            .attach_tool_call(&AttachToolCallOptions {
                chat_id: &chat_id,
                call_id: None,
                server_id: Some("srv_files"),
                function_name: "list",
                function_args: None,
                status: ToolCallStatus::PendingConfirmation,
            })
            .unwrap();

        let events = collect(orch.process_message(TurnRequest::text(&chat_id, "hi"))).await;
        assert!(events.iter().all(Result::is_ok));

        let call = orch.ledger().get_tool_call(&stale.id).unwrap().unwrap();
        assert_eq!(call.status, ToolCallStatus::Rejected);
        assert!(orch.ledger().pending_tool_calls(&chat_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn bypassed_tool_call_executes_and_resumes_generation() {
        let model = ScriptedModel::new("m");
        model.push_turn(vec![chunk("Checking"), tool_call("srv_files__list")]);
        model.push_turn(vec![chunk("Done")]);
        let (orch, chat_id) = harness(model, true);

        let events = collect(orch.process_message(TurnRequest::text(&chat_id, "list my files")))
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect::<Vec<_>>();

        assert!(matches!(events[0], TurnEvent::Chunk { .. }));
        assert!(matches!(events[1], TurnEvent::Finalized(_)));
        let TurnEvent::ToolCall(call) = &events[2] else {
            panic!("expected tool call: {:?}", events[2]);
        };
        assert_eq!(call.status, ToolCallStatus::ReadyToBeExecuted);
        let TurnEvent::ToolCallResolved(resolved) = &events[3] else {
            panic!("expected resolution: {:?}", events[3]);
        };
        assert_eq!(resolved.status, ToolCallStatus::Executed);
        assert!(resolved.execution_start_at.is_some());
        assert!(resolved.function_return.is_some());
        assert!(matches!(events[5], TurnEvent::Finalized(_)));

        let last = orch.ledger().last_message(&chat_id).unwrap().unwrap();
        assert_eq!(last.content, "Done");
        assert!(orch.ledger().pending_tool_calls(&chat_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn pure_tool_call_turn_parks_without_finalizing() {
        let model = ScriptedModel::new("m");
        model.push_turn(vec![tool_call("srv_files__list")]);
        let (orch, chat_id) = harness(model, false);

        let events = collect(orch.process_message(TurnRequest::text(&chat_id, "list"))).await;
        assert_eq!(events.len(), 1);
        let Ok(TurnEvent::ToolCall(call)) = &events[0] else {
            panic!("expected tool call: {:?}", events[0]);
        };
        assert_eq!(call.status, ToolCallStatus::PendingConfirmation);

        // User message plus the synthesized host only.
        assert_eq!(orch.ledger().count_messages(&chat_id).unwrap(), 2);
        let host = orch.ledger().last_message(&chat_id).unwrap().unwrap();
        assert_eq!(host.role, MessageRole::Assistant);
        assert_eq!(host.content, "");
        assert!(!orch.has_active_turn(&chat_id));
    }

    #[tokio::test]
    async fn confirmation_executes_and_resumes() {
        let model = ScriptedModel::new("m");
        model.push_turn(vec![tool_call("srv_files__list")]);
        model.push_turn(vec![chunk("After")]);
        let (orch, chat_id) = harness(model, false);

        let events = collect(orch.process_message(TurnRequest::text(&chat_id, "list"))).await;
        let Ok(TurnEvent::ToolCall(call)) = &events[0] else {
            panic!("expected tool call");
        };

        let follow_up = collect(orch.process_tool_confirmation(ToolConfirmation {
            tool_call_id: call.id.clone(),
            confirmed: true,
        }))
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect::<Vec<_>>();

        let TurnEvent::ToolCallResolved(resolved) = &follow_up[0] else {
            panic!("expected resolution: {:?}", follow_up[0]);
        };
        assert_eq!(resolved.status, ToolCallStatus::Executed);
        assert!(matches!(follow_up[1], TurnEvent::Chunk { .. }));
        assert!(matches!(follow_up.last(), Some(TurnEvent::Finalized(_))));

        let last = orch.ledger().last_message(&chat_id).unwrap().unwrap();
        assert_eq!(last.content, "After");
    }

    #[tokio::test]
    async fn declined_confirmation_parks_the_turn() {
        let model = ScriptedModel::new("m");
        model.push_turn(vec![tool_call("srv_files__list")]);
        let (orch, chat_id) = harness(model, false);

        let events = collect(orch.process_message(TurnRequest::text(&chat_id, "list"))).await;
        let Ok(TurnEvent::ToolCall(call)) = &events[0] else {
            panic!("expected tool call");
        };

        let follow_up = collect(orch.process_tool_confirmation(ToolConfirmation {
            tool_call_id: call.id.clone(),
            confirmed: false,
        }))
        .await;
        assert_eq!(follow_up.len(), 1);
        let Ok(TurnEvent::ToolCallResolved(resolved)) = &follow_up[0] else {
            panic!("expected resolution: {:?}", follow_up[0]);
        };
        assert_eq!(resolved.status, ToolCallStatus::Rejected);

        // No resumed generation: only the original model call happened.
        let last = orch.ledger().last_message(&chat_id).unwrap().unwrap();
        assert_eq!(last.role, MessageRole::Assistant);
        assert_eq!(last.content, "");
    }

    #[tokio::test]
    async fn thought_opens_placeholder_that_merges_into_the_reply() {
        let model = ScriptedModel::new("m");
        model.push_turn(vec![chunk_with_thought("", "thinking"), chunk("answer")]);
        let (orch, chat_id) = harness(model, false);

        let events = collect(orch.process_message(TurnRequest::text(&chat_id, "hi"))).await;
        assert_eq!(events.len(), 3);

        assert_eq!(orch.ledger().count_messages(&chat_id).unwrap(), 2);
        let last = orch.ledger().last_message(&chat_id).unwrap().unwrap();
        assert_eq!(last.content, "answer");
        assert_eq!(last.thought.as_deref(), Some("thinking"));
        assert_eq!(last.status, MessageStatus::Success);
    }

    #[tokio::test]
    async fn search_results_are_forwarded_and_persisted() {
        let results = vec![SearchResult {
            title: "Rust".into(),
            url: "https://rust-lang.org".into(),
        }];
        let model = ScriptedModel::new("m");
        model.push_turn(vec![
            ModelEvent::Chunk(StreamChunk {
                content: "Ru".into(),
                thought: None,
                search_results: Some(results.clone()),
            }),
            chunk("Rust"),
        ]);
        let (orch, chat_id) = harness(model, false);

        let events = collect(orch.process_message(TurnRequest::text(&chat_id, "hi"))).await;
        for event in &events[..2] {
            match event {
                Ok(TurnEvent::Chunk { search_results, .. }) => {
                    assert_eq!(search_results.as_deref(), Some(&results[..]));
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }

        let last = orch.ledger().last_message(&chat_id).unwrap().unwrap();
        let metadata = last.metadata.unwrap();
        assert_eq!(
            metadata["search_results"][0]["url"],
            "https://rust-lang.org"
        );
        assert_eq!(metadata["agent"]["name"], "Assistant");
    }

    #[tokio::test]
    async fn mention_routes_and_strips_the_token() {
        let model = ScriptedModel::new("m");
        model.push_turn(vec![chunk("echoed")]);
        let (orch, chat_id) = harness(model, false);

        let events = collect(orch.process_message(TurnRequest::text(&chat_id, "@Echo hi"))).await;
        match &events[0] {
            Ok(TurnEvent::Chunk { metadata, .. }) => assert_eq!(metadata.agent_name, "Echo"),
            other => panic!("unexpected event: {other:?}"),
        }

        let timeline = orch.ledger().timeline(&chat_id).unwrap();
        assert_eq!(timeline[0].message.content, "hi");
        let reply = orch.ledger().last_message(&chat_id).unwrap().unwrap();
        assert_eq!(reply.metadata.unwrap()["agent"]["name"], "Echo");
    }

    #[tokio::test]
    async fn untitled_chat_gets_a_generated_title() {
        let model = ScriptedModel::new("m");
        model.push_structured(json!({"title": "Greeting"}));
        model.push_turn(vec![chunk("hello")]);
        let (orch, _) = harness(model, false);

        let chat = orch.ledger().create_chat(None).unwrap();
        let mut rx = orch.subscribe();
        let _ = collect(orch.process_message(TurnRequest::text(&chat.id, "hi"))).await;

        let title = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(RuntimeEvent::TitleUpdated { title, .. }) = rx.recv().await {
                    break title;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(title, "Greeting");
        let stored = orch.ledger().get_chat(&chat.id).unwrap().unwrap();
        assert_eq!(stored.title.as_deref(), Some("Greeting"));
    }

    #[tokio::test]
    async fn failed_tool_execution_is_recorded_and_resumes() {
        let model = ScriptedModel::new("m");
        model.push_turn(vec![tool_call("srv_files__list")]);
        model.push_turn(vec![chunk("Could not list files.")]);
        let (orch, chat_id) = harness(model, true);
        // Swap in a failing runner.
        let orch = Arc::new(TurnOrchestrator::new(
            Arc::clone(orch.ledger()),
            Arc::new({
                let mut registry = ModelRegistry::new();
                registry.register(
                    "llm_default",
                    orch.registry().resolve(None).unwrap(),
                );
                registry
            }),
            Arc::new(StaticToolRunner {
                outcome: ToolOutcome::error("permission denied"),
            }),
            Arc::new(SessionCache::new()),
        ));

        let events = collect(orch.process_message(TurnRequest::text(&chat_id, "list"))).await;
        let resolved = events
            .iter()
            .find_map(|e| match e {
                Ok(TurnEvent::ToolCallResolved(row)) => Some(row.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(resolved.status, ToolCallStatus::Error);
        assert!(events.iter().all(Result::is_ok));

        let last = orch.ledger().last_message(&chat_id).unwrap().unwrap();
        assert_eq!(last.content, "Could not list files.");
    }
}
