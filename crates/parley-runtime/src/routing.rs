//! Agent selection: mention parsing and model-based classification.
//!
//! Stateless — every call takes a [`RoutingContext`] loaded from the
//! ledger by the caller. Classification failures of any kind (transport,
//! timeout, out-of-roster id) recover silently to the main agent; they are
//! logged and counted, never surfaced.

use std::time::Duration;

use metrics::counter;
use serde_json::{Value, json};
use tracing::{debug, warn};

use parley_core::prompt::PromptMessage;
use parley_ledger::AgentRow;
use parley_llm::ModelRegistry;

use crate::errors::{Result, RuntimeError};

/// Deadline for the classification call before falling back to main.
pub const CLASSIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Agent roster plus the auto-route flag, loaded per call.
pub struct RoutingContext {
    /// Full agent roster.
    pub agents: Vec<AgentRow>,
    /// Whether model-based classification is enabled.
    pub auto_route: bool,
}

impl RoutingContext {
    /// The main (default) agent.
    #[must_use]
    pub fn main_agent(&self) -> Option<&AgentRow> {
        self.agents.iter().find(|a| a.is_main)
    }
}

/// Result of scanning a prompt for an `@agent` mention.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mention {
    /// The prompt with the mention token (and one trailing space) removed.
    pub cleaned: String,
    /// The mentioned agent, when one matched.
    pub agent_id: Option<String>,
}

/// Scan `text` for an `@<agent-name>` mention.
///
/// Both the dashed form (`@Code-Reviewer`) and the literal name form are
/// matched, case-insensitively; the longest matching token wins so that
/// `@Code-Reviewer` never resolves to an agent named `Code`. The main
/// agent is never matchable — it is the implicit default.
#[must_use]
pub fn parse_mentions(text: &str, agents: &[AgentRow]) -> Mention {
    let haystack = text.to_ascii_lowercase();
    let mut best: Option<(usize, usize, &AgentRow)> = None;

    for agent in agents.iter().filter(|a| !a.is_main) {
        let dashed = format!("@{}", agent.name.replace(' ', "-"));
        let literal = format!("@{}", agent.name);
        for token in [dashed, literal] {
            let token = token.to_ascii_lowercase();
            if let Some(pos) = haystack.find(&token)
                && best.is_none_or(|(_, len, _)| token.len() > len)
            {
                best = Some((pos, token.len(), agent));
            }
        }
    }

    match best {
        Some((pos, len, agent)) => {
            let mut cleaned = String::with_capacity(text.len());
            cleaned.push_str(&text[..pos]);
            let rest = &text[pos + len..];
            cleaned.push_str(rest.strip_prefix(' ').unwrap_or(rest));
            debug!(agent = %agent.name, "mention matched");
            Mention {
                cleaned,
                agent_id: Some(agent.id.clone()),
            }
        }
        None => Mention {
            cleaned: text.to_string(),
            agent_id: None,
        },
    }
}

/// Select the agent handling a turn.
///
/// Priority: explicit mention (stale ids degrade to main) → auto-route
/// disabled → structured classification against the main agent's model,
/// time-boxed by [`CLASSIFY_TIMEOUT`].
pub async fn select_agent<'a>(
    registry: &ModelRegistry,
    ctx: &'a RoutingContext,
    mention_agent_id: Option<&str>,
    prompt: &str,
) -> Result<&'a AgentRow> {
    let main = ctx
        .main_agent()
        .ok_or_else(|| RuntimeError::Configuration("no main agent configured".into()))?;

    if let Some(id) = mention_agent_id {
        return Ok(ctx.agents.iter().find(|a| a.id == id).unwrap_or(main));
    }
    if !ctx.auto_route || ctx.agents.len() < 2 {
        return Ok(main);
    }
    let Some(model) = registry.resolve(Some(&main.llm_id)) else {
        return Ok(fallback(main, "no model for main agent"));
    };

    let messages = classification_prompt(ctx, prompt);
    let schema = classification_schema();
    match tokio::time::timeout(
        CLASSIFY_TIMEOUT,
        model.structured_response(&messages, &schema),
    )
    .await
    {
        Ok(Ok(value)) => {
            if let Some(id) = value.get("agent_id").and_then(Value::as_str)
                && let Some(agent) = ctx.agents.iter().find(|a| a.id == id)
            {
                debug!(agent = %agent.name, "classification selected agent");
                return Ok(agent);
            }
            Ok(fallback(main, "out-of-roster agent id"))
        }
        Ok(Err(e)) => {
            warn!(error = %e, "classification call failed");
            Ok(fallback(main, "classification error"))
        }
        Err(_) => Ok(fallback(main, "classification timed out")),
    }
}

fn fallback<'a>(main: &'a AgentRow, reason: &str) -> &'a AgentRow {
    warn!(reason, "routing fell back to main agent");
    counter!("routing_fallbacks_total").increment(1);
    main
}

fn classification_prompt(ctx: &RoutingContext, prompt: &str) -> Vec<PromptMessage> {
    let mut roster = String::new();
    for agent in &ctx.agents {
        let tools: Vec<&str> = agent
            .mcps
            .iter()
            .flat_map(|b| b.selected_tools.iter().map(|t| t.name.as_str()))
            .collect();
        roster.push_str(&format!(
            "- id: {}\n  name: {}\n  instruction: {}\n  tools: [{}]\n",
            agent.id,
            agent.name,
            agent.instruction,
            tools.join(", ")
        ));
    }
    vec![
        PromptMessage::system(format!(
            "Pick the single best-fit agent for the user's request. \
             Respond with the agent id only.\n\nAgents:\n{roster}"
        )),
        PromptMessage::user(prompt),
    ]
}

fn classification_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "agent_id": { "type": "string" }
        },
        "required": ["agent_id"],
        "additionalProperties": false
    })
}
