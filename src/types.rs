use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::GenerationOverrides;
use crate::diagnostics::RecoveryDiagnostics;
use crate::stage::Stage;

/// One inbound classification call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRequest {
    pub stage: Stage,

    /// The business prompt, already containing the document data.
    pub prompt: String,

    #[serde(default)]
    pub context: RequestContext,

    #[serde(default)]
    pub generation_config: GenerationOverrides,
}

impl ClassificationRequest {
    pub fn new(stage: Stage, prompt: impl Into<String>) -> Self {
        Self {
            stage,
            prompt: prompt.into(),
            context: RequestContext::default(),
            generation_config: GenerationOverrides::default(),
        }
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_generation_config(mut self, overrides: GenerationOverrides) -> Self {
        self.generation_config = overrides;
        self
    }
}

/// Stage-specific request metadata (`stage`, `software`, `action`, `actions`, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestContext {
    pub data: HashMap<String, Value>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// The accounting software the request targets.
    pub fn software(&self) -> Option<&str> {
        self.get_str("software")
            .or_else(|| self.get_str("accounting_software"))
    }

    /// Action names, from `actions` (batch) or `action` (single).
    pub fn action_names(&self) -> Vec<&str> {
        if let Some(Value::Array(items)) = self.get("actions") {
            return items.iter().filter_map(Value::as_str).collect();
        }
        self.get_str("action").into_iter().collect()
    }
}

/// A stage record that passed validation, with its provenance.
#[derive(Debug, Clone, Serialize)]
pub struct ValidatedResult<T> {
    pub stage: Stage,

    /// The structured record.
    pub record: T,

    /// Every field the validator filled in or rewrote.
    pub corrections: Vec<Correction>,

    pub diagnostics: RecoveryDiagnostics,
}

/// A single in-place fix made by a validator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correction {
    /// Path of the field, e.g. `suggested_actions[1].action_type`.
    pub field: String,
    pub detail: String,
}

impl Correction {
    pub fn new(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_context_action_names() {
        let single = RequestContext::new().insert("action", "create_bill");
        assert_eq!(single.action_names(), vec!["create_bill"]);

        let batch = RequestContext::new()
            .insert("action", "ignored")
            .insert("actions", json!(["create_contact", "create_bill"]));
        assert_eq!(batch.action_names(), vec!["create_contact", "create_bill"]);

        assert!(RequestContext::new().action_names().is_empty());
    }

    #[test]
    fn test_context_software_aliases() {
        let ctx = RequestContext::new().insert("accounting_software", "zohobooks");
        assert_eq!(ctx.software(), Some("zohobooks"));
        let ctx = ctx.insert("software", "quickbooks");
        assert_eq!(ctx.software(), Some("quickbooks"));
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: ClassificationRequest = serde_json::from_value(json!({
            "stage": "field_mapping",
            "prompt": "Map the bill.",
            "context": {"action": "create_bill"}
        }))
        .unwrap();
        assert_eq!(request.stage, Stage::FieldMapping);
        assert_eq!(request.context.get_str("action"), Some("create_bill"));
        assert!(request.generation_config.max_new_tokens.is_none());
    }
}
