//! Math-consistency check stage.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{invalid, take_array, take_object, take_required, take_string_or, Corrections, Validator};
use crate::error::Result;
use crate::stage::Stage;
use crate::types::RequestContext;

const STAGE: Stage = Stage::MathValidation;

/// Result of checking a document's totals, taxes and line items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MathValidation {
    pub passed: bool,
    pub errors: Vec<Value>,
    pub warnings: Vec<Value>,
    pub calculations: Map<String, Value>,
    /// `simple`, `moderate` or `complex` as judged by the model.
    pub complexity: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Validator for [`Stage::MathValidation`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MathValidator;

impl Validator for MathValidator {
    type Output = MathValidation;

    fn stage(&self) -> Stage {
        STAGE
    }

    fn validate(
        &self,
        mut record: Map<String, Value>,
        _context: &RequestContext,
        corrections: &mut Corrections,
    ) -> Result<MathValidation> {
        let passed = match take_required(STAGE, &mut record, "", "passed")? {
            Value::Bool(b) => b,
            _ => return Err(invalid(STAGE, "passed".into(), "a boolean")),
        };

        let errors = take_array(&mut record, "", "errors", corrections);
        let warnings = take_array(&mut record, "", "warnings", corrections);
        let calculations =
            take_object(&mut record, "", "calculations", "{}", corrections).unwrap_or_default();
        let complexity = take_string_or(&mut record, "", "complexity", "moderate", corrections);

        Ok(MathValidation {
            passed,
            errors,
            warnings,
            calculations,
            complexity,
            extra: record,
        })
    }
}
