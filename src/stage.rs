use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// A classification call site.
///
/// Each stage has its own generation defaults, its own minimum plausible
/// output length, and its own [`Validator`](crate::validate::Validator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Arithmetic consistency check over extracted document fields.
    MathValidation,
    /// Business relevance and action choice for a document.
    ActionSelection,
    /// Mapping extracted fields onto an accounting API request body.
    FieldMapping,
    /// Listing the parties a document refers to so they can be resolved.
    EntityExtraction,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::MathValidation,
        Stage::ActionSelection,
        Stage::FieldMapping,
        Stage::EntityExtraction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::MathValidation => "math_validation",
            Stage::ActionSelection => "action_selection",
            Stage::FieldMapping => "field_mapping",
            Stage::EntityExtraction => "entity_extraction",
        }
    }

    /// Shortest span, in characters, that can hold a complete record for this stage.
    ///
    /// Anything shorter is treated as early stopping rather than bad content.
    pub fn min_span_len(&self) -> usize {
        match self {
            // {"passed":true}
            Stage::MathValidation => 15,
            Stage::ActionSelection => 60,
            // {"api_request_body":{}}
            Stage::FieldMapping => 23,
            // {"entities_to_resolve":[]}
            Stage::EntityExtraction => 26,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = PipelineError;

    /// Accepts the stage names callers put in the request context, including
    /// the `field_mapping_batch` alias.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "math_validation" => Ok(Stage::MathValidation),
            "action_selection" => Ok(Stage::ActionSelection),
            "field_mapping" | "field_mapping_batch" => Ok(Stage::FieldMapping),
            "entity_extraction" => Ok(Stage::EntityExtraction),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown stage '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_from_context_names() {
        assert_eq!("math_validation".parse::<Stage>().unwrap(), Stage::MathValidation);
        assert_eq!("action_selection".parse::<Stage>().unwrap(), Stage::ActionSelection);
        assert_eq!("field_mapping".parse::<Stage>().unwrap(), Stage::FieldMapping);
        assert_eq!("field_mapping_batch".parse::<Stage>().unwrap(), Stage::FieldMapping);
        assert_eq!(" Entity_Extraction ".parse::<Stage>().unwrap(), Stage::EntityExtraction);
    }

    #[test]
    fn test_unknown_stage_is_config_error() {
        let err = "summarize".parse::<Stage>().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn test_display_matches_serde() {
        for stage in Stage::ALL {
            let json = serde_json::to_value(stage).unwrap();
            assert_eq!(json, stage.to_string());
        }
    }

    #[test]
    fn test_min_span_fits_smallest_record() {
        assert_eq!(r#"{"passed":true}"#.len(), Stage::MathValidation.min_span_len());
        assert_eq!(
            r#"{"api_request_body":{}}"#.len(),
            Stage::FieldMapping.min_span_len()
        );
        assert_eq!(
            r#"{"entities_to_resolve":[]}"#.len(),
            Stage::EntityExtraction.min_span_len()
        );
        assert!(
            r#"{"business_relevant":false,"selected_action":null,"confidence":0,"reasoning":""}"#
                .len()
                >= Stage::ActionSelection.min_span_len()
        );
    }
}
