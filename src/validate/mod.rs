//! Per-stage validation of recovered records.
//!
//! Every stage follows the same rules:
//!
//! - a missing required field is fatal ([`PipelineError::MissingField`]), and
//!   so is a required field of the wrong type ([`PipelineError::InvalidField`])
//! - a missing or malformed optional field is replaced with structural
//!   scaffolding (empty list, empty map, `null`, a neutral enum value) and the
//!   fix is recorded as a [`Correction`]
//! - values the model did not give (amounts, confidences, names) are never
//!   invented
//!
//! Fields a validator does not know about are carried through untouched.

pub mod action;
pub mod entity;
pub mod field_mapping;
pub mod math;

pub use action::{ActionSelection, ActionSelectionValidator, ActionType, SuggestedAction, TransactionDirection};
pub use entity::{EntityExtraction, EntityExtractionValidator, EntityToResolve};
pub use field_mapping::{ActionMapping, BatchMapping, FieldMapping, FieldMappingValidator};
pub use math::{MathValidation, MathValidator};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::Result;
use crate::output_parser::json::type_name;
use crate::stage::Stage;
use crate::types::{Correction, RequestContext};
use crate::error::PipelineError;

/// Turns a recovered JSON object into a typed, invariant-checked record.
pub trait Validator: Send + Sync {
    type Output: Serialize + Send;

    fn stage(&self) -> Stage;

    /// Validate and correct `record`.
    ///
    /// Every in-place fix must be reported through `corrections`.
    fn validate(
        &self,
        record: Map<String, Value>,
        context: &RequestContext,
        corrections: &mut Corrections,
    ) -> Result<Self::Output>;
}

/// Collects the fixes a validator makes, logging each one.
#[derive(Debug)]
pub struct Corrections {
    stage: Stage,
    items: Vec<Correction>,
}

impl Corrections {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            items: Vec::new(),
        }
    }

    pub fn record(&mut self, field: impl Into<String>, detail: impl Into<String>) {
        let correction = Correction::new(field, detail);
        warn!(
            stage = %self.stage,
            field = %correction.field,
            "corrected: {}",
            correction.detail
        );
        self.items.push(correction);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn into_vec(self) -> Vec<Correction> {
        self.items
    }
}

/// Join a parent path and a field name, e.g. `actions[0]` + `validation`.
pub(crate) fn path(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{prefix}.{field}")
    }
}

/// Remove a required field, failing when it is absent.
pub(crate) fn take_required(
    stage: Stage,
    record: &mut Map<String, Value>,
    prefix: &str,
    field: &str,
) -> Result<Value> {
    record
        .remove(field)
        .ok_or_else(|| PipelineError::MissingField {
            stage,
            field: path(prefix, field),
        })
}

pub(crate) fn invalid(stage: Stage, field: String, expected: &'static str) -> PipelineError {
    PipelineError::InvalidField {
        stage,
        field,
        expected,
    }
}

/// Take an optional array, replacing a missing or non-array value with `[]`.
pub(crate) fn take_array(
    record: &mut Map<String, Value>,
    prefix: &str,
    field: &str,
    corrections: &mut Corrections,
) -> Vec<Value> {
    match record.remove(field) {
        Some(Value::Array(items)) => items,
        None => {
            corrections.record(path(prefix, field), "missing, defaulted to []");
            Vec::new()
        }
        Some(other) => {
            corrections.record(
                path(prefix, field),
                format!("expected an array, got {}; replaced with []", type_name(&other)),
            );
            Vec::new()
        }
    }
}

/// Take an optional object. `None` means missing or replaced; the caller
/// supplies the default and the correction records which.
pub(crate) fn take_object(
    record: &mut Map<String, Value>,
    prefix: &str,
    field: &str,
    default_desc: &str,
    corrections: &mut Corrections,
) -> Option<Map<String, Value>> {
    match record.remove(field) {
        Some(Value::Object(map)) => Some(map),
        None => {
            corrections.record(path(prefix, field), format!("missing, defaulted to {default_desc}"));
            None
        }
        Some(other) => {
            corrections.record(
                path(prefix, field),
                format!(
                    "expected an object, got {}; replaced with {default_desc}",
                    type_name(&other)
                ),
            );
            None
        }
    }
}

/// Take an optional string, replacing a missing or non-string value with `default`.
pub(crate) fn take_string_or(
    record: &mut Map<String, Value>,
    prefix: &str,
    field: &str,
    default: &str,
    corrections: &mut Corrections,
) -> String {
    match record.remove(field) {
        Some(Value::String(s)) => s,
        None => {
            corrections.record(path(prefix, field), format!("missing, defaulted to \"{default}\""));
            default.to_string()
        }
        Some(other) => {
            corrections.record(
                path(prefix, field),
                format!(
                    "expected a string, got {}; replaced with \"{default}\"",
                    type_name(&other)
                ),
            );
            default.to_string()
        }
    }
}

/// Clamp a confidence score into `[0, 100]`, recording the change.
pub(crate) fn clamp_confidence(value: f64, field: &str, corrections: &mut Corrections) -> f64 {
    let clamped = value.clamp(0.0, 100.0);
    if clamped != value {
        corrections.record(field, format!("{value} clamped to {clamped}"));
    }
    clamped
}
