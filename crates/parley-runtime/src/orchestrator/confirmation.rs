//! Tool execution seam and the user-confirmation flow.

use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use metrics::counter;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use parley_core::ids;
use parley_ledger::{LedgerError, ToolCallResolution, ToolCallRow};

use crate::errors::{Result, RuntimeError};
use crate::orchestrator::turn::{TurnEvent, TurnOrchestrator, TurnRequest};

/// Result of running a tool.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutcome {
    /// Result payload (or failure description when `is_error`).
    pub content: Value,
    /// Whether the payload describes a failure.
    pub is_error: bool,
}

impl ToolOutcome {
    /// A successful outcome.
    #[must_use]
    pub fn success(content: Value) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    /// A failed outcome. Transport and protocol failures are reported
    /// this way too — tool failures never abort the turn.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: json!({ "message": message.into() }),
            is_error: true,
        }
    }
}

/// The tool execution collaborator (an MCP client in production).
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Invoke a tool. Failures are encoded in the outcome, not raised.
    async fn call_tool(
        &self,
        server_id: Option<&str>,
        function: &str,
        arguments: &Value,
    ) -> ToolOutcome;
}

/// A user's answer to a pending tool confirmation.
#[derive(Clone, Debug)]
pub struct ToolConfirmation {
    /// The tool call being answered.
    pub tool_call_id: String,
    /// `true` to run the tool, `false` to reject it.
    pub confirmed: bool,
}

impl TurnOrchestrator {
    /// Run one tool call, record execution timing, and resolve the row.
    #[instrument(skip(self, call), fields(tool_call_id = %call.id, function = %call.function_name))]
    pub(crate) async fn execute_tool_call(&self, call: &ToolCallRow) -> Result<ToolCallRow> {
        let arguments = call.function_args.clone().unwrap_or(Value::Null);
        let started = ids::now_rfc3339();
        let outcome = self
            .tools()
            .call_tool(call.server_id.as_deref(), &call.function_name, &arguments)
            .await;
        let ended = ids::now_rfc3339();

        if outcome.is_error {
            counter!("tool_executions_failed_total").increment(1);
            warn!(function = %call.function_name, "tool execution failed");
        } else {
            counter!("tool_executions_total").increment(1);
        }

        let resolution = ToolCallResolution::Completed {
            output: outcome.content,
            is_error: outcome.is_error,
            execution_start_at: started,
            execution_end_at: ended,
        };
        let row = self.ledger().resolve_tool_call(&call.id, &resolution)?;
        self.cache().update_tool_call(&call.chat_id, row.clone());
        Ok(row)
    }

    /// Answer a pending tool confirmation.
    ///
    /// Confirmed calls execute and resolve; declined calls resolve as
    /// rejected and the turn stays parked. Once no pending calls remain
    /// in the chat, generation resumes with the results in the history.
    pub fn process_tool_confirmation(
        self: &Arc<Self>,
        confirmation: ToolConfirmation,
    ) -> impl Stream<Item = Result<TurnEvent>> + Send + 'static {
        let this = Arc::clone(self);
        stream! {
            let call = match this.ledger().get_tool_call(&confirmation.tool_call_id) {
                Ok(Some(call)) => call,
                Ok(None) => {
                    yield Err(RuntimeError::Ledger(LedgerError::ToolCallNotFound(
                        confirmation.tool_call_id.clone(),
                    )));
                    return;
                }
                Err(e) => {
                    yield Err(RuntimeError::Ledger(e));
                    return;
                }
            };

            if !confirmation.confirmed {
                debug!(tool_call_id = %call.id, "tool call declined");
                match this.ledger().resolve_tool_call(&call.id, &ToolCallResolution::Rejected) {
                    Ok(row) => {
                        this.cache().update_tool_call(&call.chat_id, row.clone());
                        yield Ok(TurnEvent::ToolCallResolved(row));
                    }
                    Err(e) => yield Err(RuntimeError::Ledger(e)),
                }
                return;
            }

            match this.execute_tool_call(&call).await {
                Ok(row) => yield Ok(TurnEvent::ToolCallResolved(row)),
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }

            let pending = match this.ledger().pending_tool_calls(&call.chat_id) {
                Ok(pending) => pending,
                Err(e) => {
                    yield Err(RuntimeError::Ledger(e));
                    return;
                }
            };
            if pending.is_empty() {
                let mut resume =
                    Box::pin(this.process_message(TurnRequest::resume(call.chat_id.clone())));
                while let Some(item) = resume.next().await {
                    yield item;
                }
            }
        }
    }
}
