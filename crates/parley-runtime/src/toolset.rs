//! Tool namespace handling: definitions offered to the model and the
//! reverse mapping from a called name back to a server binding.

use serde_json::json;

use parley_core::tools::{ToolDefinition, split_namespaced_tool};
use parley_ledger::{AgentRow, McpBinding};

/// The namespaced name a tool is offered under (`server__function`).
#[must_use]
pub fn namespaced_name(binding: &McpBinding, function: &str) -> String {
    format!("{}__{function}", binding.server_id)
}

/// Definitions for every tool bound to the agent.
#[must_use]
pub fn tool_definitions(agent: &AgentRow) -> Vec<ToolDefinition> {
    agent
        .mcps
        .iter()
        .flat_map(|binding| {
            binding.selected_tools.iter().map(|tool| ToolDefinition {
                name: namespaced_name(binding, &tool.name),
                description: tool.description.clone().unwrap_or_default(),
                parameters: tool
                    .input_schema
                    .clone()
                    .unwrap_or_else(|| json!({"type": "object"})),
            })
        })
        .collect()
}

/// A called tool mapped back to its binding.
#[derive(Debug, PartialEq, Eq)]
pub struct ResolvedTool<'a> {
    /// Server reference, when a binding matched.
    pub server_id: Option<&'a str>,
    /// Function name without the namespace prefix.
    pub function_name: String,
    /// Whether the call may run without user confirmation.
    pub bypass: bool,
}

/// Map a model-called tool name to a server binding.
///
/// The `server__function` prefix is matched against the binding's server
/// id and display name; when the model omits the prefix (or it matches no
/// binding) the function name alone is looked up across all bindings.
#[must_use]
pub fn resolve_tool<'a>(agent: &'a AgentRow, called: &str) -> ResolvedTool<'a> {
    let (prefix, function) = split_namespaced_tool(called);

    if let Some(prefix) = prefix
        && let Some(binding) = agent
            .mcps
            .iter()
            .find(|b| b.server_id == prefix || b.server_name == prefix)
    {
        return ResolvedTool {
            server_id: Some(&binding.server_id),
            function_name: function.to_string(),
            bypass: binding.confirmation_bypass.iter().any(|t| t == function),
        };
    }

    // Name-only fallback: the model dropped or mangled the prefix.
    if let Some(binding) = agent
        .mcps
        .iter()
        .find(|b| b.selected_tools.iter().any(|t| t.name == function))
    {
        return ResolvedTool {
            server_id: Some(&binding.server_id),
            function_name: function.to_string(),
            bypass: binding.confirmation_bypass.iter().any(|t| t == function),
        };
    }

    ResolvedTool {
        server_id: None,
        function_name: called.to_string(),
        bypass: false,
    }
}
