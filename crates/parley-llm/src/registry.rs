//! Model registry — resolves agent `llm_id` references to backends.

use std::collections::HashMap;
use std::sync::Arc;

use crate::model::Model;

/// Registry of available model backends keyed by ID.
///
/// Agents reference models by `llm_id`; an unknown or absent reference
/// resolves to the default model when one is set.
#[derive(Default)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<dyn Model>>,
    default_id: Option<String>,
}

impl ModelRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model under an ID. The first registered model becomes
    /// the default unless one is set explicitly.
    pub fn register(&mut self, id: impl Into<String>, model: Arc<dyn Model>) {
        let id = id.into();
        if self.default_id.is_none() {
            self.default_id = Some(id.clone());
        }
        let _ = self.models.insert(id, model);
    }

    /// Mark an already-registered ID as the default.
    pub fn set_default(&mut self, id: impl Into<String>) {
        self.default_id = Some(id.into());
    }

    /// Look up a model by exact ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn Model>> {
        self.models.get(id).cloned()
    }

    /// Resolve a model reference, falling back to the default.
    #[must_use]
    pub fn resolve(&self, id: Option<&str>) -> Option<Arc<dyn Model>> {
        if let Some(id) = id
            && let Some(model) = self.get(id)
        {
            return Some(model);
        }
        self.default_id.as_deref().and_then(|d| self.get(d))
    }

    /// The default model, if any.
    #[must_use]
    pub fn default_model(&self) -> Option<Arc<dyn Model>> {
        self.resolve(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedModel;

    fn scripted(name: &str) -> Arc<dyn Model> {
        Arc::new(ScriptedModel::new(name))
    }

    #[test]
    fn first_registered_is_default() {
        let mut registry = ModelRegistry::new();
        registry.register("llm_a", scripted("a"));
        registry.register("llm_b", scripted("b"));
        assert_eq!(registry.default_model().unwrap().display_name(), "a");
    }

    #[test]
    fn resolve_prefers_exact_match() {
        let mut registry = ModelRegistry::new();
        registry.register("llm_a", scripted("a"));
        registry.register("llm_b", scripted("b"));
        let model = registry.resolve(Some("llm_b")).unwrap();
        assert_eq!(model.display_name(), "b");
    }

    #[test]
    fn resolve_unknown_falls_back_to_default() {
        let mut registry = ModelRegistry::new();
        registry.register("llm_a", scripted("a"));
        let model = registry.resolve(Some("llm_missing")).unwrap();
        assert_eq!(model.display_name(), "a");
    }

    #[test]
    fn empty_registry_resolves_nothing() {
        let registry = ModelRegistry::new();
        assert!(registry.resolve(Some("llm_a")).is_none());
        assert!(registry.default_model().is_none());
    }

    #[test]
    fn set_default_overrides() {
        let mut registry = ModelRegistry::new();
        registry.register("llm_a", scripted("a"));
        registry.register("llm_b", scripted("b"));
        registry.set_default("llm_b");
        assert_eq!(registry.default_model().unwrap().display_name(), "b");
    }
}
