//! Prompt assembly: system preamble, serialized history, current turn.

use serde::{Deserialize, Serialize};

use parley_core::prompt::PromptMessage;
use parley_core::types::{MessageRole, MessageStatus};
use parley_ledger::{AgentRow, StyleKind, TimelineMessage};

use crate::toolset::namespaced_name;

/// A long pasted document sent alongside a prompt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongTextDocument {
    /// Display title.
    pub title: String,
    /// Full text.
    pub content: String,
}

/// Build the system preamble: agent instruction plus an
/// `<agent_configuration>` block describing styles, tones, and the
/// bound-tool roster.
#[must_use]
pub fn build_system_prompt(agent: &AgentRow) -> String {
    let mut out = agent.instruction.clone();
    let has_tools = agent.mcps.iter().any(|b| !b.selected_tools.is_empty());
    if agent.styles.is_empty() && !has_tools {
        return out;
    }

    out.push_str("\n\n<agent_configuration>\n");
    for style in &agent.styles {
        let label = match style.kind {
            StyleKind::Style => "style",
            StyleKind::Tone => "tone",
        };
        match &style.description {
            Some(description) => {
                out.push_str(&format!("{label}: {} — {description}\n", style.name));
            }
            None => out.push_str(&format!("{label}: {}\n", style.name)),
        }
    }
    for binding in &agent.mcps {
        for tool in &binding.selected_tools {
            let name = namespaced_name(binding, &tool.name);
            match &tool.description {
                Some(description) => out.push_str(&format!("tool: {name} — {description}\n")),
                None => out.push_str(&format!("tool: {name}\n")),
            }
        }
    }
    out.push_str("</agent_configuration>");
    out
}

/// Serialize prior turns into role-tagged prompt messages.
///
/// Pending and error rows are skipped; tool calls hosted by an assistant
/// message are serialized inline so the model sees what it invoked and
/// what came back.
#[must_use]
pub fn history_messages(history: &[TimelineMessage]) -> Vec<PromptMessage> {
    let mut out = Vec::with_capacity(history.len());
    for entry in history {
        if entry.message.status != MessageStatus::Success {
            continue;
        }
        let mut content = entry.message.content.clone();
        for call in &entry.tool_calls {
            let args = call
                .function_args
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "{}".to_string());
            let mut line = format!(
                "\n[tool call: {}({args}) — {}",
                call.function_name,
                call.status.as_str()
            );
            if let Some(ret) = &call.function_return {
                line.push_str(&format!(" → {ret}"));
            }
            line.push(']');
            content.push_str(&line);
        }
        if content.is_empty() {
            continue;
        }
        out.push(match entry.message.role {
            MessageRole::User => PromptMessage::user(content),
            MessageRole::Assistant => PromptMessage::assistant(content),
        });
    }
    out
}

/// Assemble the full prompt for a turn.
///
/// `current` is the cleaned user prompt; `None` on the resume path, where
/// the transcript already ends with serialized tool results.
#[must_use]
pub fn build_prompt(
    agent: &AgentRow,
    history: &[TimelineMessage],
    current: Option<&str>,
    documents: &[LongTextDocument],
) -> Vec<PromptMessage> {
    let mut messages = vec![PromptMessage::system(build_system_prompt(agent))];
    messages.extend(history_messages(history));

    if let Some(current) = current {
        let mut content = current.to_string();
        for doc in documents {
            content.push_str(&format!(
                "\n\n<document title=\"{}\">\n{}\n</document>",
                doc.title, doc.content
            ));
        }
        messages.push(PromptMessage::user(content));
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::prompt::PromptRole;
    use parley_core::types::ToolCallStatus;
    use parley_ledger::{McpBinding, MessageRow, StyleDescriptor, ToolCallRow, ToolSpec};
    use serde_json::json;

    fn agent() -> AgentRow {
        AgentRow {
            id: "agt_1".into(),
            name: "Assistant".into(),
            instruction: "You are helpful.".into(),
            llm_id: "llm_default".into(),
            is_main: true,
            styles: vec![StyleDescriptor {
                name: "concise".into(),
                kind: StyleKind::Style,
                description: Some("Short answers".into()),
            }],
            mcps: vec![McpBinding {
                server_id: "srv_files".into(),
                server_name: "files".into(),
                selected_tools: vec![ToolSpec {
                    name: "list".into(),
                    description: Some("List files".into()),
                    input_schema: None,
                }],
                confirmation_bypass: vec![],
            }],
            created_at: "2026-01-01T00:00:00+00:00".into(),
        }
    }

    fn message(role: MessageRole, content: &str, status: MessageStatus) -> TimelineMessage {
        TimelineMessage::bare(MessageRow {
            id: "msg_x".into(),
            chat_id: "chat_1".into(),
            role,
            content: content.into(),
            thought: None,
            status,
            metadata: None,
            created_at: "2026-01-01T00:00:00+00:00".into(),
            updated_at: "2026-01-01T00:00:00+00:00".into(),
        })
    }

    #[test]
    fn system_prompt_includes_configuration_block() {
        let prompt = build_system_prompt(&agent());
        assert!(prompt.starts_with("You are helpful."));
        assert!(prompt.contains("<agent_configuration>"));
        assert!(prompt.contains("style: concise — Short answers"));
        assert!(prompt.contains("tool: srv_files__list — List files"));
        assert!(prompt.ends_with("</agent_configuration>"));
    }

    #[test]
    fn bare_agent_gets_plain_instruction() {
        let mut bare = agent();
        bare.styles.clear();
        bare.mcps.clear();
        assert_eq!(build_system_prompt(&bare), "You are helpful.");
    }

    #[test]
    fn history_skips_non_success_rows() {
        let history = vec![
            message(MessageRole::User, "q1", MessageStatus::Success),
            message(MessageRole::Assistant, "a1", MessageStatus::Error),
            message(MessageRole::Assistant, "", MessageStatus::Pending),
        ];
        let messages = history_messages(&history);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "q1");
    }

    #[test]
    fn tool_calls_serialized_inline() {
        let mut entry = message(MessageRole::Assistant, "", MessageStatus::Success);
        entry.tool_calls.push(ToolCallRow {
            id: "tc_1".into(),
            call_id: None,
            chat_id: "chat_1".into(),
            message_id: "msg_x".into(),
            server_id: Some("srv_files".into()),
            function_name: "list".into(),
            function_args: Some(json!({"path": "/tmp"})),
            function_return: Some(json!({"files": ["a.txt"]})),
            status: ToolCallStatus::Executed,
            execution_start_at: None,
            execution_end_at: None,
            created_at: "2026-01-01T00:00:00+00:00".into(),
            updated_at: "2026-01-01T00:00:00+00:00".into(),
        });
        let messages = history_messages(&[entry]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, PromptRole::Assistant);
        assert!(messages[0].content.contains("list("));
        assert!(messages[0].content.contains("executed"));
        assert!(messages[0].content.contains("a.txt"));
    }

    #[test]
    fn build_prompt_appends_documents() {
        let docs = vec![LongTextDocument {
            title: "Spec".into(),
            content: "full text".into(),
        }];
        let messages = build_prompt(&agent(), &[], Some("summarize"), &docs);
        assert_eq!(messages.len(), 2);
        let last = &messages[1];
        assert!(last.content.starts_with("summarize"));
        assert!(last.content.contains("<document title=\"Spec\">"));
    }

    #[test]
    fn resume_prompt_has_no_trailing_user_message() {
        let history = vec![message(MessageRole::User, "q", MessageStatus::Success)];
        let messages = build_prompt(&agent(), &history, None, &[]);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, PromptRole::User);
    }
}
