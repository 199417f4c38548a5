//! Prompt envelopes that push the model toward bare JSON.
//!
//! The caller's business prompt is wrapped with a list of forbidden
//! behaviours and, by default, seeded with `{` so the decoder starts inside an
//! object. The escalated envelope restates the same rules in the strongest
//! terms and is used only for the single retry.

use serde::{Deserialize, Serialize};

use crate::stage::Stage;

/// How the envelope is framed before being sent to the invoker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptTemplate {
    /// `<s>[INST] ... [/INST]` instruction framing (Mistral/Mixtral family).
    #[default]
    Instruct,
    /// No framing; the envelope text is sent as-is.
    Plain,
}

/// How hard the envelope leans on the JSON-only rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    /// First attempt.
    Standard,
    /// The one escalated retry.
    Maximal,
}

/// A fully decorated prompt ready for the invoker.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptEnvelope {
    pub text: String,
    /// Whether `text` ends with a seeded `{` that the model will not repeat.
    pub seeded: bool,
}

const FORBIDDEN: &[&str] = &[
    "The first character of your answer is `{` and the last is `}`.",
    "No introduction or preamble (\"Here is\", \"Based on\", \"Sure\").",
    "No markdown code fences.",
    "No explanations, notes or prose after the closing brace.",
];

const FORBIDDEN_MAXIMAL: &[&str] = &[
    "Output exactly one JSON object and nothing else.",
    "The very first character MUST be `{`. The very last character MUST be `}`.",
    "Do NOT write any words before the JSON. Not one.",
    "Do NOT use ``` or any markdown.",
    "Do NOT add comments, explanations or text after the JSON.",
    "Every key the instructions ask for MUST be present.",
];

/// Build the envelope for `stage`.
///
/// # Example
///
/// ```
/// use doc_classifier::prompt::{build_envelope, PromptTemplate, Strictness};
/// use doc_classifier::Stage;
///
/// let env = build_envelope(
///     "Check the totals.",
///     Stage::MathValidation,
///     Strictness::Standard,
///     PromptTemplate::Plain,
///     true,
/// );
/// assert!(env.seeded);
/// assert!(env.text.ends_with('{'));
/// assert!(env.text.starts_with("Check the totals."));
/// ```
pub fn build_envelope(
    prompt: &str,
    stage: Stage,
    strictness: Strictness,
    template: PromptTemplate,
    seed_brace: bool,
) -> PromptEnvelope {
    let rules = match strictness {
        Strictness::Standard => section(
            "Output format",
            &format!(
                "Respond with PURE JSON only for the {} step.\n{}",
                stage.as_str().replace('_', " "),
                numbered_list(FORBIDDEN)
            ),
        ),
        Strictness::Maximal => section(
            "ABSOLUTE REQUIREMENT",
            &format!(
                "Your previous answer could not be parsed. This is the final attempt.\n{}\nSTART IMMEDIATELY WITH THE OPENING BRACE.",
                numbered_list(FORBIDDEN_MAXIMAL)
            ),
        ),
    };

    let body = format!("{}\n\n{}", prompt.trim_end(), rules);
    let mut text = match template {
        PromptTemplate::Instruct => format!("<s>[INST] {} [/INST]", body),
        PromptTemplate::Plain => format!("{}\n\n", body),
    };
    if seed_brace {
        text.push('{');
    }

    PromptEnvelope {
        text,
        seeded: seed_brace,
    }
}

/// Create a numbered list from items (1-indexed).
pub fn numbered_list(items: &[&str]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Wrap text in a labeled section for structured prompts.
pub fn section(label: &str, content: &str) -> String {
    format!("## {}\n{}", label, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbered_list() {
        assert_eq!(numbered_list(&["a", "b", "c"]), "1. a\n2. b\n3. c");
    }

    #[test]
    fn test_section() {
        assert_eq!(section("Input", "hello"), "## Input\nhello");
    }

    #[test]
    fn test_instruct_envelope_is_seeded() {
        let env = build_envelope(
            "Classify this invoice.",
            Stage::ActionSelection,
            Strictness::Standard,
            PromptTemplate::Instruct,
            true,
        );
        assert!(env.text.starts_with("<s>[INST] Classify this invoice."));
        assert!(env.text.ends_with("[/INST]{"));
        assert!(env.text.contains("action selection"));
        assert!(env.text.contains("No markdown code fences."));
        assert!(env.seeded);
    }

    #[test]
    fn test_unseeded_envelope() {
        let env = build_envelope(
            "Map fields.",
            Stage::FieldMapping,
            Strictness::Standard,
            PromptTemplate::Instruct,
            false,
        );
        assert!(env.text.ends_with("[/INST]"));
        assert!(!env.seeded);
    }

    #[test]
    fn test_maximal_envelope_restates_rules() {
        let standard = build_envelope(
            "Map fields.",
            Stage::FieldMapping,
            Strictness::Standard,
            PromptTemplate::Plain,
            true,
        );
        let maximal = build_envelope(
            "Map fields.",
            Stage::FieldMapping,
            Strictness::Maximal,
            PromptTemplate::Plain,
            true,
        );
        assert!(maximal.text.contains("## ABSOLUTE REQUIREMENT"));
        assert!(maximal.text.contains("final attempt"));
        assert!(!standard.text.contains("ABSOLUTE"));
        assert!(maximal.text.ends_with("BRACE.\n\n{"));
    }
}
