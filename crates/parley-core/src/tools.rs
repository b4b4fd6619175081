//! Tool roster shapes handed to a model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A callable function exposed to the model.
///
/// `name` is namespaced as `<server_id>__<function>` so calls from the model
/// can be routed back to the owning tool server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Namespaced function name.
    pub name: String,
    /// Human-readable description shown to the model.
    #[serde(default)]
    pub description: String,
    /// JSON-schema object describing the parameters.
    pub parameters: Value,
}

/// Split a namespaced tool name into `(server_id, function_name)`.
///
/// Models sometimes omit the `server__` prefix; in that case the whole
/// string is the function name and the server must be resolved by lookup.
pub fn split_namespaced_tool(name: &str) -> (Option<&str>, &str) {
    match name.split_once("__") {
        Some((server, function)) if !server.is_empty() && !function.is_empty() => {
            (Some(server), function)
        }
        _ => (None, name),
    }
}
