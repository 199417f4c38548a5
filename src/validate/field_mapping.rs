//! Field-mapping stage: extracted document fields mapped onto an accounting
//! API request body, for one action or a batch of them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::{invalid, path, take_array, take_object, take_required, Corrections, Validator};
use crate::error::Result;
use crate::schema::{required_body_fields, SchemaCache};
use crate::stage::Stage;
use crate::types::RequestContext;

const STAGE: Stage = Stage::FieldMapping;

/// Mapping for one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionMapping {
    pub api_request_body: Map<String, Value>,
    /// Entity IDs a downstream resolver must look up before the request is sent.
    pub lookups_required: Vec<Value>,
    pub validation: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Mappings for several actions returned in one completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMapping {
    pub actions: Vec<ActionMapping>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Validated field-mapping record, in the shape the model returned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldMapping {
    Batch(BatchMapping),
    Single(ActionMapping),
}

impl FieldMapping {
    /// All action mappings, in order.
    pub fn mappings(&self) -> &[ActionMapping] {
        match self {
            FieldMapping::Single(mapping) => std::slice::from_ref(mapping),
            FieldMapping::Batch(batch) => &batch.actions,
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, FieldMapping::Batch(_))
    }
}

/// Validator for [`Stage::FieldMapping`].
///
/// Uses the schema cache to decide whether a defaulted `validation` block can
/// claim that every required body field is present.
#[derive(Clone)]
pub struct FieldMappingValidator {
    schemas: Arc<dyn SchemaCache>,
}

impl FieldMappingValidator {
    pub fn new(schemas: Arc<dyn SchemaCache>) -> Self {
        Self { schemas }
    }

    fn mapping(
        &self,
        mut item: Map<String, Value>,
        prefix: &str,
        action: Option<&str>,
        software: &str,
        corrections: &mut Corrections,
    ) -> Result<ActionMapping> {
        if !item.contains_key("api_request_body") {
            if let Some(body) = item.remove("field_mappings") {
                debug!(field = %path(prefix, "field_mappings"), "using field_mappings as api_request_body");
                item.insert("api_request_body".into(), body);
            }
        }
        let api_request_body = match take_required(STAGE, &mut item, prefix, "api_request_body")? {
            Value::Object(body) => body,
            _ => return Err(invalid(STAGE, path(prefix, "api_request_body"), "an object")),
        };

        let lookups_required = take_array(&mut item, prefix, "lookups_required", corrections);

        let missing = self.missing_required(&api_request_body, action, software);
        let validation = match take_object(&mut item, prefix, "validation", "a computed summary", corrections) {
            Some(validation) => {
                if !missing.is_empty() {
                    warn!(
                        action = action.unwrap_or("unknown"),
                        missing = ?missing,
                        "mapping omits required body fields"
                    );
                }
                validation
            }
            None => default_validation(&missing),
        };

        Ok(ActionMapping {
            api_request_body,
            lookups_required,
            validation,
            extra: item,
        })
    }

    /// Required body fields the mapping leaves out. Empty when no schema is known.
    fn missing_required(
        &self,
        body: &Map<String, Value>,
        action: Option<&str>,
        software: &str,
    ) -> Vec<String> {
        let Some(action) = action else {
            return Vec::new();
        };
        let schema = self.schemas.resolve(action, software);
        required_body_fields(&schema)
            .into_iter()
            .filter(|field| !body.contains_key(*field))
            .map(str::to_string)
            .collect()
    }
}

impl Validator for FieldMappingValidator {
    type Output = FieldMapping;

    fn stage(&self) -> Stage {
        STAGE
    }

    fn validate(
        &self,
        mut record: Map<String, Value>,
        context: &RequestContext,
        corrections: &mut Corrections,
    ) -> Result<FieldMapping> {
        let software = context.software().unwrap_or_default();
        let names = context.action_names();

        let Some(actions) = record.remove("actions") else {
            let action = action_name(&record, names.first().copied());
            let mapping = self.mapping(record, "", action.as_deref(), software, corrections)?;
            return Ok(FieldMapping::Single(mapping));
        };

        let items = match actions {
            Value::Array(items) if !items.is_empty() => items,
            Value::Array(_) => return Err(invalid(STAGE, "actions".into(), "a non-empty array")),
            _ => return Err(invalid(STAGE, "actions".into(), "an array")),
        };

        let mut mappings = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            let prefix = format!("actions[{i}]");
            let Value::Object(item) = item else {
                return Err(invalid(STAGE, prefix, "an object"));
            };
            let action = action_name(&item, names.get(i).copied());
            mappings.push(self.mapping(item, &prefix, action.as_deref(), software, corrections)?);
        }

        Ok(FieldMapping::Batch(BatchMapping {
            actions: mappings,
            extra: record,
        }))
    }
}

/// The action a mapping is for: named by the model, else by the caller.
fn action_name(item: &Map<String, Value>, from_context: Option<&str>) -> Option<String> {
    item.get("action_name")
        .or_else(|| item.get("action"))
        .and_then(Value::as_str)
        .or(from_context)
        .map(str::to_string)
}

fn default_validation(missing: &[String]) -> Map<String, Value> {
    let warnings: Vec<String> = missing
        .iter()
        .map(|field| format!("missing required field '{field}'"))
        .collect();
    let mut validation = Map::new();
    validation.insert("all_required_fields_present".into(), json!(missing.is_empty()));
    validation.insert("warnings".into(), json!(warnings));
    validation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::InMemorySchemaCache;
    use crate::PipelineError;

    fn validator() -> FieldMappingValidator {
        FieldMappingValidator::new(Arc::new(
            InMemorySchemaCache::new()
                .with_schema(
                    "zohobooks",
                    "create_bill",
                    json!({"type": "object", "required": ["vendor_id", "line_items"]}),
                )
                .with_schema(
                    "zohobooks",
                    "create_contact",
                    json!({"type": "object", "required": ["contact_name"]}),
                ),
        ))
    }

    fn run(value: Value, context: RequestContext) -> (Result<FieldMapping>, Vec<crate::types::Correction>) {
        let mut corrections = Corrections::new(STAGE);
        let record = match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        };
        let result = validator().validate(record, &context, &mut corrections);
        (result, corrections.into_vec())
    }

    fn zoho(action: &str) -> RequestContext {
        RequestContext::new()
            .insert("software", "zohobooks")
            .insert("action", action)
    }

    // ── single action ────────────────────────────────────────

    #[test]
    fn test_single_defaults_with_unknown_schema() {
        let (result, corrections) = run(json!({"api_request_body": {"a": 1}}), RequestContext::new());
        let mapping = result.unwrap();
        assert!(!mapping.is_batch());
        assert_eq!(
            serde_json::to_value(&mapping).unwrap(),
            json!({
                "api_request_body": {"a": 1},
                "lookups_required": [],
                "validation": {"all_required_fields_present": true, "warnings": []}
            })
        );
        assert_eq!(corrections.len(), 2);
    }

    #[test]
    fn test_default_validation_reports_missing_schema_fields() {
        let (result, _) = run(
            json!({"api_request_body": {"vendor_id": "{{lookup:vendor}}"}}),
            zoho("create_bill"),
        );
        let mapping = result.unwrap();
        let validation = &mapping.mappings()[0].validation;
        assert_eq!(validation["all_required_fields_present"], false);
        assert_eq!(validation["warnings"], json!(["missing required field 'line_items'"]));
    }

    #[test]
    fn test_model_validation_is_kept() {
        let (result, corrections) = run(
            json!({
                "api_request_body": {"vendor_id": "v1"},
                "lookups_required": ["vendor_id"],
                "validation": {"all_required_fields_present": true, "warnings": ["check dates"]}
            }),
            zoho("create_bill"),
        );
        let mapping = result.unwrap();
        assert_eq!(mapping.mappings()[0].validation["warnings"], json!(["check dates"]));
        assert!(corrections.is_empty());
    }

    #[test]
    fn test_field_mappings_alias() {
        let (result, _) = run(
            json!({"field_mappings": {"contact_name": "Acme"}, "lookups_required": []}),
            zoho("create_contact"),
        );
        let mapping = result.unwrap();
        assert_eq!(mapping.mappings()[0].api_request_body["contact_name"], "Acme");
        assert_eq!(mapping.mappings()[0].validation["all_required_fields_present"], true);
    }

    #[test]
    fn test_missing_body_is_fatal() {
        let (result, _) = run(json!({"lookups_required": []}), RequestContext::new());
        assert!(matches!(
            result,
            Err(PipelineError::MissingField { ref field, .. }) if field == "api_request_body"
        ));
    }

    #[test]
    fn test_non_object_body_is_fatal() {
        let (result, _) = run(json!({"api_request_body": "vendor_id=1"}), RequestContext::new());
        assert!(matches!(result, Err(PipelineError::InvalidField { expected: "an object", .. })));
    }

    #[test]
    fn test_malformed_optional_fields_replaced() {
        let (result, corrections) = run(
            json!({"api_request_body": {}, "lookups_required": "vendor_id", "validation": true}),
            RequestContext::new(),
        );
        let mapping = result.unwrap();
        assert!(mapping.mappings()[0].lookups_required.is_empty());
        assert_eq!(mapping.mappings()[0].validation["all_required_fields_present"], true);
        assert_eq!(corrections.len(), 2);
    }

    // ── batch ────────────────────────────────────────────────

    #[test]
    fn test_batch_uses_context_action_names() {
        let context = RequestContext::new()
            .insert("accounting_software", "zohobooks")
            .insert("actions", json!(["create_contact", "create_bill"]));
        let (result, _) = run(
            json!({
                "actions": [
                    {"api_request_body": {"contact_name": "Acme"}},
                    {"api_request_body": {"vendor_id": "v1", "line_items": []}, "lookups_required": ["vendor_id"]}
                ],
                "batch_note": "two steps"
            }),
            context,
        );
        let mapping = result.unwrap();
        assert!(mapping.is_batch());
        assert_eq!(mapping.mappings().len(), 2);
        for m in mapping.mappings() {
            assert_eq!(m.validation["all_required_fields_present"], true);
        }
        let value = serde_json::to_value(&mapping).unwrap();
        assert_eq!(value["batch_note"], "two steps");
        assert_eq!(value["actions"][1]["lookups_required"], json!(["vendor_id"]));
    }

    #[test]
    fn test_batch_item_action_name_wins() {
        let (result, _) = run(
            json!({"actions": [{"action_name": "create_bill", "api_request_body": {}}]}),
            RequestContext::new().insert("software", "zohobooks"),
        );
        let mapping = result.unwrap();
        assert_eq!(mapping.mappings()[0].validation["all_required_fields_present"], false);
        assert_eq!(mapping.mappings()[0].extra["action_name"], "create_bill");
    }

    #[test]
    fn test_batch_errors_name_the_item() {
        let (result, _) = run(
            json!({"actions": [{"api_request_body": {}}, {"lookups_required": []}]}),
            RequestContext::new(),
        );
        assert!(matches!(
            result,
            Err(PipelineError::MissingField { ref field, .. }) if field == "actions[1].api_request_body"
        ));

        let (result, _) = run(json!({"actions": []}), RequestContext::new());
        assert!(matches!(result, Err(PipelineError::InvalidField { expected: "a non-empty array", .. })));

        let (result, _) = run(json!({"actions": {"api_request_body": {}}}), RequestContext::new());
        assert!(matches!(result, Err(PipelineError::InvalidField { expected: "an array", .. })));

        let (result, _) = run(json!({"actions": ["create_bill"]}), RequestContext::new());
        assert!(matches!(
            result,
            Err(PipelineError::InvalidField { ref field, .. }) if field == "actions[0]"
        ));
    }
}
