//! Action-selection stage: is the document business-relevant, and what
//! should the accounting system do with it.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::{
    clamp_confidence, invalid, take_object, take_required, take_string_or, Corrections, Validator,
};
use crate::error::Result;
use crate::output_parser::json::type_name;
use crate::stage::Stage;
use crate::types::RequestContext;

const STAGE: Stage = Stage::ActionSelection;

static SNAKE_CASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid snake_case regex"));

/// Prefixes the model tends to prepend to real action names.
const SUSPICIOUS_PREFIXES: &[&str] = &[
    "super_", "advanced_", "custom_", "special_", "auto_", "smart_", "new_", "enhanced_",
    "improved_", "optimized_", "fast_",
];

const SUMMARY_FIELDS: &[&str] = &["total_amount", "currency", "document_date", "document_number"];

/// Direction of money relative to the business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionDirection {
    Incoming,
    Outgoing,
    #[default]
    Neutral,
}

impl TransactionDirection {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "incoming" => Some(Self::Incoming),
            "outgoing" => Some(Self::Outgoing),
            "neutral" => Some(Self::Neutral),
            _ => None,
        }
    }
}

/// Role of a suggested action in the overall workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Prerequisite,
    Primary,
    FollowUp,
}

impl ActionType {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().replace(['-', ' '], "_").as_str() {
            "PREREQUISITE" => Some(Self::Prerequisite),
            "PRIMARY" => Some(Self::Primary),
            "FOLLOW_UP" | "FOLLOWUP" => Some(Self::FollowUp),
            _ => None,
        }
    }
}

/// One entry of the `suggested_actions` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedAction {
    pub action: String,
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub requires_user_confirmation: bool,
    /// `entity`, `reasoning` and anything else the model attached.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Validated action-selection record.
///
/// When `business_relevant` is false, `selected_action` is `None` and
/// `confidence` is 0. When `suggested_actions` is non-empty exactly one entry
/// is [`ActionType::Primary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSelection {
    pub business_relevant: bool,
    pub selected_action: Option<String>,
    pub confidence: f64,
    pub reasoning: String,
    pub document_type: String,
    pub transaction_direction: TransactionDirection,
    pub primary_party: Value,
    pub extracted_summary: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_actions: Option<Vec<SuggestedAction>>,
    pub format: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ActionSelection {
    /// The single PRIMARY suggestion, if the list variant was returned.
    pub fn primary_action(&self) -> Option<&SuggestedAction> {
        self.suggested_actions
            .as_ref()?
            .iter()
            .find(|a| a.action_type == ActionType::Primary)
    }
}

/// Validator for [`Stage::ActionSelection`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionSelectionValidator;

impl Validator for ActionSelectionValidator {
    type Output = ActionSelection;

    fn stage(&self) -> Stage {
        STAGE
    }

    fn validate(
        &self,
        mut record: Map<String, Value>,
        _context: &RequestContext,
        corrections: &mut Corrections,
    ) -> Result<ActionSelection> {
        let business_relevant = match take_required(STAGE, &mut record, "", "business_relevant")? {
            Value::Bool(b) => b,
            _ => return Err(invalid(STAGE, "business_relevant".into(), "a boolean")),
        };
        let selected_action = take_required(STAGE, &mut record, "", "selected_action")?;
        let confidence = take_required(STAGE, &mut record, "", "confidence")?;
        let reasoning = match take_required(STAGE, &mut record, "", "reasoning")? {
            Value::String(s) => s,
            _ => return Err(invalid(STAGE, "reasoning".into(), "a string")),
        };

        let (selected_action, confidence) = if business_relevant {
            let selected_action = match selected_action {
                Value::String(s) => Some(s),
                Value::Null => None,
                _ => return Err(invalid(STAGE, "selected_action".into(), "a string or null")),
            };
            let confidence = match confidence.as_f64() {
                Some(c) => clamp_confidence(c, "confidence", corrections),
                None => return Err(invalid(STAGE, "confidence".into(), "a number")),
            };
            (selected_action, confidence)
        } else {
            if !selected_action.is_null() {
                corrections.record("selected_action", "document not business relevant, set to null");
            }
            if confidence.as_f64() != Some(0.0) {
                corrections.record("confidence", "document not business relevant, set to 0");
            }
            (None, 0.0)
        };

        if let Some(name) = &selected_action {
            check_action_name("selected_action", name);
        }

        let document_type = take_string_or(&mut record, "", "document_type", "unknown", corrections);
        let transaction_direction = take_direction(&mut record, corrections);
        let primary_party = match record.remove("primary_party") {
            Some(party) => party,
            None => {
                corrections.record("primary_party", "missing, defaulted to null");
                Value::Null
            }
        };
        let extracted_summary = take_summary(&mut record, corrections);
        let suggested_actions = take_suggested_actions(&mut record, corrections);

        if let Some(previous) = record.remove("format") {
            debug!(format = %previous, "replacing model-supplied format tag");
        }

        Ok(ActionSelection {
            business_relevant,
            selected_action,
            confidence,
            reasoning,
            document_type,
            transaction_direction,
            primary_party,
            extracted_summary,
            suggested_actions,
            format: "simplified".to_string(),
            extra: record,
        })
    }
}

/// Log action names that look invented. Never changes the record.
fn check_action_name(field: &str, name: &str) {
    if !SNAKE_CASE.is_match(name) {
        warn!(field, action = name, "action name is not snake_case");
    }
    if let Some(prefix) = SUSPICIOUS_PREFIXES.iter().find(|p| name.starts_with(*p)) {
        warn!(field, action = name, prefix, "action name carries a suspicious prefix");
    }
}

fn take_direction(record: &mut Map<String, Value>, corrections: &mut Corrections) -> TransactionDirection {
    let field = "transaction_direction";
    match record.remove(field) {
        Some(Value::String(s)) => match TransactionDirection::parse(&s) {
            Some(direction) => {
                if s != s.trim().to_ascii_lowercase() {
                    corrections.record(field, format!("\"{s}\" normalized"));
                }
                direction
            }
            None => {
                corrections.record(field, format!("unknown value \"{s}\", defaulted to \"neutral\""));
                TransactionDirection::Neutral
            }
        },
        None => {
            corrections.record(field, "missing, defaulted to \"neutral\"");
            TransactionDirection::Neutral
        }
        Some(other) => {
            corrections.record(
                field,
                format!("expected a string, got {}; defaulted to \"neutral\"", type_name(&other)),
            );
            TransactionDirection::Neutral
        }
    }
}

fn take_summary(record: &mut Map<String, Value>, corrections: &mut Corrections) -> Map<String, Value> {
    let (mut summary, supplied) =
        match take_object(record, "", "extracted_summary", "null fields", corrections) {
            Some(summary) => (summary, true),
            None => (Map::new(), false),
        };
    for field in SUMMARY_FIELDS {
        if !summary.contains_key(*field) {
            if supplied {
                corrections.record(format!("extracted_summary.{field}"), "missing, defaulted to null");
            }
            summary.insert((*field).to_string(), json!(null));
        }
    }
    summary
}

fn take_suggested_actions(
    record: &mut Map<String, Value>,
    corrections: &mut Corrections,
) -> Option<Vec<SuggestedAction>> {
    let items = match record.remove("suggested_actions")? {
        Value::Array(items) => items,
        other => {
            corrections.record(
                "suggested_actions",
                format!("expected an array, got {}; replaced with []", type_name(&other)),
            );
            return Some(Vec::new());
        }
    };

    let mut actions = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let prefix = format!("suggested_actions[{i}]");
        if let Some(action) = suggested_action(item, &prefix, corrections) {
            check_action_name(&prefix, &action.action);
            actions.push(action);
        }
    }
    enforce_single_primary(&mut actions, corrections);
    Some(actions)
}

fn suggested_action(item: Value, prefix: &str, corrections: &mut Corrections) -> Option<SuggestedAction> {
    let mut map = match item {
        Value::Object(map) => map,
        other => {
            corrections.record(prefix, format!("expected an object, got {}; dropped", type_name(&other)));
            return None;
        }
    };
    let action = match map.remove("action") {
        Some(Value::String(s)) => s,
        _ => {
            corrections.record(format!("{prefix}.action"), "missing action name; entry dropped");
            return None;
        }
    };

    let action_type = match map.remove("action_type") {
        Some(Value::String(s)) => ActionType::parse(&s).unwrap_or_else(|| {
            corrections.record(
                format!("{prefix}.action_type"),
                format!("unknown value \"{s}\", defaulted to FOLLOW_UP"),
            );
            ActionType::FollowUp
        }),
        _ => {
            corrections.record(format!("{prefix}.action_type"), "missing, defaulted to FOLLOW_UP");
            ActionType::FollowUp
        }
    };

    let field = format!("{prefix}.confidence");
    let confidence = match map.remove("confidence") {
        Some(Value::Number(n)) => n.as_f64().map(|c| clamp_confidence(c, &field, corrections)),
        None | Some(Value::Null) => None,
        Some(other) => {
            corrections.record(field, format!("expected a number, got {}; removed", type_name(&other)));
            None
        }
    };

    let requires_user_confirmation = match map.remove("requires_user_confirmation") {
        Some(Value::Bool(b)) => b,
        None => false,
        Some(other) => {
            corrections.record(
                format!("{prefix}.requires_user_confirmation"),
                format!("expected a boolean, got {}; defaulted to false", type_name(&other)),
            );
            false
        }
    };

    Some(SuggestedAction {
        action,
        action_type,
        confidence,
        requires_user_confirmation,
        extra: map,
    })
}

/// Leave exactly one PRIMARY action in a non-empty list.
///
/// With none, the most confident action is promoted. With several, the most
/// confident PRIMARY stays and the rest become FOLLOW_UP pending user
/// confirmation. Ties go to the earlier entry.
fn enforce_single_primary(actions: &mut [SuggestedAction], corrections: &mut Corrections) {
    let primaries: Vec<usize> = actions
        .iter()
        .enumerate()
        .filter(|(_, a)| a.action_type == ActionType::Primary)
        .map(|(i, _)| i)
        .collect();

    match primaries.len() {
        0 => {
            if let Some(best) = most_confident(actions, 0..actions.len()) {
                actions[best].action_type = ActionType::Primary;
                corrections.record(
                    format!("suggested_actions[{best}].action_type"),
                    "no PRIMARY action, promoted the most confident",
                );
            }
        }
        1 => {}
        _ => {
            let keep = most_confident(actions, primaries.iter().copied());
            for i in primaries {
                if Some(i) == keep {
                    continue;
                }
                actions[i].action_type = ActionType::FollowUp;
                actions[i].requires_user_confirmation = true;
                corrections.record(
                    format!("suggested_actions[{i}].action_type"),
                    "multiple PRIMARY actions, demoted to FOLLOW_UP",
                );
            }
        }
    }
}

fn most_confident(
    actions: &[SuggestedAction],
    candidates: impl Iterator<Item = usize>,
) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for i in candidates {
        let score = actions[i].confidence.unwrap_or(f64::NEG_INFINITY);
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}
