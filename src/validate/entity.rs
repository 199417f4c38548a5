//! Entity-extraction stage: parties and records the downstream resolver
//! must find or create before actions can run.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{clamp_confidence, invalid, path, take_object, take_required, Corrections, Validator};
use crate::error::Result;
use crate::output_parser::json::type_name;
use crate::stage::Stage;
use crate::types::RequestContext;

const STAGE: Stage = Stage::EntityExtraction;

/// One entity to resolve against the accounting system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityToResolve {
    pub entity_type: String,
    pub extracted_fields: Map<String, Value>,
    pub search_criteria: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityExtraction {
    pub entities_to_resolve: Vec<EntityToResolve>,
    pub extraction_metadata: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Validator for [`Stage::EntityExtraction`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityExtractionValidator;

impl Validator for EntityExtractionValidator {
    type Output = EntityExtraction;

    fn stage(&self) -> Stage {
        STAGE
    }

    fn validate(
        &self,
        mut record: Map<String, Value>,
        _context: &RequestContext,
        corrections: &mut Corrections,
    ) -> Result<EntityExtraction> {
        let items = match take_required(STAGE, &mut record, "", "entities_to_resolve")? {
            Value::Array(items) => items,
            _ => return Err(invalid(STAGE, "entities_to_resolve".into(), "an array")),
        };

        let mut entities = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            let prefix = format!("entities_to_resolve[{i}]");
            entities.push(entity(item, &prefix, corrections)?);
        }

        let extraction_metadata = take_object(
            &mut record,
            "",
            "extraction_metadata",
            "computed totals",
            corrections,
        )
        .unwrap_or_else(|| metadata(&entities));

        Ok(EntityExtraction {
            entities_to_resolve: entities,
            extraction_metadata,
            extra: record,
        })
    }
}

fn entity(item: Value, prefix: &str, corrections: &mut Corrections) -> Result<EntityToResolve> {
    let Value::Object(mut map) = item else {
        return Err(invalid(STAGE, prefix.to_string(), "an object"));
    };

    let entity_type = match take_required(STAGE, &mut map, prefix, "entity_type")? {
        Value::String(s) => s,
        _ => return Err(invalid(STAGE, path(prefix, "entity_type"), "a string")),
    };
    let extracted_fields = match take_required(STAGE, &mut map, prefix, "extracted_fields")? {
        Value::Object(fields) => fields,
        _ => return Err(invalid(STAGE, path(prefix, "extracted_fields"), "an object")),
    };

    let search_criteria = take_object(&mut map, prefix, "search_criteria", "a name search", corrections)
        .unwrap_or_else(|| default_search(&extracted_fields));

    let field = path(prefix, "confidence");
    let confidence = match map.remove("confidence") {
        Some(Value::Number(n)) => n.as_f64().map(|c| clamp_confidence(c, &field, corrections)),
        None | Some(Value::Null) => None,
        Some(other) => {
            corrections.record(field, format!("expected a number, got {}; removed", type_name(&other)));
            None
        }
    };

    Ok(EntityToResolve {
        entity_type,
        extracted_fields,
        search_criteria,
        confidence,
        extra: map,
    })
}

/// Search by the extracted contact name or name. `primary` stays null when
/// the document gave neither.
fn default_search(fields: &Map<String, Value>) -> Map<String, Value> {
    let primary = ["contact_name", "name"]
        .iter()
        .filter_map(|key| fields.get(*key))
        .find(|v| v.as_str().is_some_and(|s| !s.trim().is_empty()))
        .cloned()
        .unwrap_or(Value::Null);

    let mut search = Map::new();
    search.insert("primary".into(), primary);
    search.insert("alternatives".into(), json!([]));
    search
}

fn metadata(entities: &[EntityToResolve]) -> Map<String, Value> {
    let mut by_type = Map::new();
    for entity in entities {
        let count = by_type
            .entry(entity.entity_type.clone())
            .or_insert(json!(0));
        *count = json!(count.as_u64().unwrap_or(0) + 1);
    }

    let scores: Vec<f64> = entities.iter().filter_map(|e| e.confidence).collect();
    let average = if scores.is_empty() {
        Value::Null
    } else {
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        json!((mean * 10.0).round() / 10.0)
    };

    let mut metadata = Map::new();
    metadata.insert("total_entities".into(), json!(entities.len()));
    metadata.insert("entities_by_type".into(), Value::Object(by_type));
    metadata.insert("average_confidence".into(), average);
    metadata
}
