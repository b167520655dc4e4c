//! Ordered model registry and the round-robin failover bookkeeping.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
}

impl ModelDescriptor {
    pub fn new(id: &str, display_name: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
        }
    }
}

const BUILTIN_MODELS: &[(&str, &str)] = &[
    ("claude-3-haiku", "Claude 3 Haiku (Fast)"),
    ("claude-3-sonnet", "Claude 3.7 Sonnet (Balanced)"),
    ("gpt-4o", "GPT-4o"),
    ("gpt-4o-mini", "GPT-4o-mini"),
    ("gpt-4-turbo", "GPT-4-turbo"),
    ("gemini-2.5-pro-preview-03-25", "Gemini 2.5 Pro"),
    ("gemini-1.5-pro", "Gemini 1.5 Pro"),
    ("gemini-1.5-flash", "Gemini 1.5 Flash"),
];

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("model registry must not be empty")]
    Empty,
    #[error("duplicate model id: {0}")]
    DuplicateId(String),
}

/// Immutable, ordered list of models. Never empty.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Vec<ModelDescriptor>,
}

impl ModelRegistry {
    pub fn new(models: Vec<ModelDescriptor>) -> Result<Self, RegistryError> {
        if models.is_empty() {
            return Err(RegistryError::Empty);
        }
        let mut seen = HashSet::new();
        for m in &models {
            if !seen.insert(m.id.as_str()) {
                return Err(RegistryError::DuplicateId(m.id.clone()));
            }
        }
        Ok(Self { models })
    }

    pub fn builtin() -> Self {
        Self {
            models: BUILTIN_MODELS
                .iter()
                .map(|(id, name)| ModelDescriptor::new(id, name))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter()
    }

    pub fn first(&self) -> &ModelDescriptor {
        &self.models[0]
    }

    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.models.iter().position(|m| m.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    /// First model after `current` (wrapping) whose id is not in `tried`.
    /// `None` when every model has been tried.
    pub fn next_untried(&self, current: &str, tried: &HashSet<String>) -> Option<&ModelDescriptor> {
        let n = self.models.len();
        let start = self.position(current).map_or(0, |i| i + 1);
        (0..n)
            .map(|k| &self.models[(start + k) % n])
            .find(|m| !tried.contains(&m.id))
    }
}

/// Per-session failover bookkeeping: the active model and the models that
/// have produced a degenerate result since the last reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverState {
    active_model_id: String,
    tried_model_ids: HashSet<String>,
}

impl FailoverState {
    pub fn new(active_model_id: &str) -> Self {
        Self {
            active_model_id: active_model_id.to_string(),
            tried_model_ids: HashSet::new(),
        }
    }

    pub fn active(&self) -> &str {
        &self.active_model_id
    }

    pub fn tried(&self) -> &HashSet<String> {
        &self.tried_model_ids
    }

    pub fn is_tried(&self, id: &str) -> bool {
        self.tried_model_ids.contains(id)
    }

    /// Record a degenerate result from the active model.
    pub fn mark_active_tried(&mut self) {
        self.tried_model_ids.insert(self.active_model_id.clone());
    }

    /// The model `advance` would select, without changing state.
    pub fn next_candidate<'r>(&self, registry: &'r ModelRegistry) -> &'r ModelDescriptor {
        registry
            .next_untried(&self.active_model_id, &self.tried_model_ids)
            .unwrap_or_else(|| registry.first())
    }

    /// Switch to the next untried model. When every model has been tried the
    /// tried set is cleared and the first registry model is selected.
    /// Returns the new active id.
    pub fn advance(&mut self, registry: &ModelRegistry) -> &str {
        let next = match registry.next_untried(&self.active_model_id, &self.tried_model_ids) {
            Some(m) => m.id.clone(),
            None => {
                self.tried_model_ids.clear();
                registry.first().id.clone()
            }
        };
        self.active_model_id = next;
        &self.active_model_id
    }

    /// Manual override: select `model_id` and forget every tried model.
    pub fn reset(&mut self, model_id: &str) {
        self.active_model_id = model_id.to_string();
        self.tried_model_ids.clear();
    }

    /// Forget tried models but keep the active one (document switch).
    pub fn clear_tried(&mut self) {
        self.tried_model_ids.clear();
    }
}
