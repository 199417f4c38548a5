//! Read-only schema lookup for the field-mapping stage.
//!
//! Schemas are loaded once by the host process and injected into the
//! [`Classifier`](crate::Classifier). A miss never fails a request: the
//! generic record schema is used instead.

use std::borrow::Cow;
use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::debug;

/// Source of API request-body schemas, keyed by software and action.
pub trait SchemaCache: Send + Sync {
    /// The request-body schema for `action` in `software`, if one was loaded.
    fn lookup(&self, action: &str, software: &str) -> Option<&Value>;

    /// Record schema used when no action-specific schema exists.
    fn generic(&self) -> &Value;

    /// The record schema for one mapped action.
    ///
    /// A hit wraps the action's body schema under `api_request_body`; a miss
    /// returns [`generic`](SchemaCache::generic).
    fn resolve(&self, action: &str, software: &str) -> Cow<'_, Value> {
        match self.lookup(action, software) {
            Some(body) => Cow::Owned(wrap_body_schema(body)),
            None => {
                debug!(action, software, "no action schema, using generic");
                Cow::Borrowed(self.generic())
            }
        }
    }
}

/// A [`SchemaCache`] held in memory, built up front.
///
/// # Example
///
/// ```
/// use doc_classifier::schema::{InMemorySchemaCache, SchemaCache};
/// use serde_json::json;
///
/// let cache = InMemorySchemaCache::new()
///     .with_schema("zohobooks", "create_contact", json!({"required": ["contact_name"]}));
///
/// assert!(cache.lookup("create_contact", "zohobooks").is_some());
/// assert_eq!(cache.resolve("create_bill", "zohobooks")["type"], "object");
/// ```
#[derive(Debug, Clone)]
pub struct InMemorySchemaCache {
    schemas: HashMap<(String, String), Value>,
    generic: Value,
}

impl Default for InMemorySchemaCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySchemaCache {
    pub fn new() -> Self {
        Self {
            schemas: HashMap::new(),
            generic: generic_record_schema(),
        }
    }

    /// Register a schema. Names are matched case-insensitively.
    pub fn with_schema(
        mut self,
        software: impl AsRef<str>,
        action: impl AsRef<str>,
        schema: Value,
    ) -> Self {
        self.schemas.insert(key(software.as_ref(), action.as_ref()), schema);
        self
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

impl SchemaCache for InMemorySchemaCache {
    fn lookup(&self, action: &str, software: &str) -> Option<&Value> {
        self.schemas.get(&key(software, action))
    }

    fn generic(&self) -> &Value {
        &self.generic
    }
}

fn key(software: &str, action: &str) -> (String, String) {
    (software.to_ascii_lowercase(), action.to_ascii_lowercase())
}

fn generic_record_schema() -> Value {
    json!({
        "type": "object",
        "required": ["api_request_body"],
        "properties": {
            "api_request_body": {"type": "object"},
            "lookups_required": {"type": "array"},
            "validation": {"type": "object"}
        }
    })
}

fn wrap_body_schema(body: &Value) -> Value {
    json!({
        "type": "object",
        "required": ["api_request_body"],
        "properties": {
            "api_request_body": body,
            "lookups_required": {"type": "array", "items": {"type": "string"}},
            "validation": {"type": "object"}
        }
    })
}

/// Required fields of the request body described by a record schema.
pub fn required_body_fields(record_schema: &Value) -> Vec<&str> {
    required_fields(&record_schema["properties"]["api_request_body"])
}

/// Names in a schema's top-level `required` list, if it has one.
pub fn required_fields(schema: &Value) -> Vec<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}
