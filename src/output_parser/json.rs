//! Turning a raw completion into a JSON object.
//!
//! [`recover_json`] runs normalize → repair → parse, and when the parse
//! still fails, falls back to the longest balanced-brace match in the whole
//! output (one nesting level deep), repaired the same way.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use super::error::{truncate, ParseError};
use super::extract::{normalize, NormalizeOptions};
use super::repair::repair_json;

static BALANCED_OBJECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{[^{}]*(?:\{[^{}]*\}[^{}]*)*\}").expect("balanced-object pattern is valid")
});

/// What recovery had to do to get a parseable object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryTrace {
    pub fences_stripped: bool,
    pub preamble_stripped: bool,
    /// The repair sequence changed the located span.
    pub repaired: bool,
    /// The balanced-brace fallback produced the object.
    pub regex_fallback: bool,
}

/// A recovered JSON object.
#[derive(Debug, Clone)]
pub struct Recovered {
    pub record: Map<String, Value>,
    pub trace: RecoveryTrace,
}

/// Recover a JSON object from a raw model completion.
///
/// # Errors
///
/// Normalizer failures are returned unchanged. When neither the repaired span
/// nor the fallback candidate parses, [`ParseError::UnrecoverableJson`]
/// carries excerpts of the span before and after repair.
///
/// # Example
///
/// ```
/// use doc_classifier::output_parser::{recover_json, NormalizeOptions};
///
/// let out = recover_json("```json\n{\"passed\": true,}\n```", &NormalizeOptions::default()).unwrap();
/// assert_eq!(out.record["passed"], true);
/// assert!(out.trace.repaired);
/// ```
pub fn recover_json(raw: &str, opts: &NormalizeOptions) -> Result<Recovered, ParseError> {
    let normalized = normalize(raw, opts)?;
    let repaired = repair_json(&normalized.span);

    let mut trace = RecoveryTrace {
        fences_stripped: normalized.fences_stripped,
        preamble_stripped: normalized.preamble_stripped,
        repaired: repaired != normalized.span,
        regex_fallback: false,
    };

    let reason = match parse_object(&repaired) {
        Ok(record) => return Ok(Recovered { record, trace }),
        Err(reason) => reason,
    };
    debug!(error = %reason, "repaired span did not parse, trying balanced-brace fallback");

    if let Some(candidate) = longest_balanced_object(&normalized.text) {
        let candidate = repair_json(candidate);
        if let Ok(record) = parse_object(&candidate) {
            trace.regex_fallback = true;
            trace.repaired = true;
            return Ok(Recovered { record, trace });
        }
    }

    Err(ParseError::UnrecoverableJson {
        original: truncate(&normalized.span, 500),
        repaired: truncate(&repaired, 500),
        reason,
    })
}

/// The longest match of the balanced-object pattern; the first one wins ties.
pub fn longest_balanced_object(text: &str) -> Option<&str> {
    let mut best: Option<&str> = None;
    for m in BALANCED_OBJECT.find_iter(text) {
        if best.map_or(true, |b| m.as_str().len() > b.len()) {
            best = Some(m.as_str());
        }
    }
    best
}

fn parse_object(text: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got {}", type_name(&other))),
        Err(e) => Err(e.to_string()),
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
