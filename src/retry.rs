//! Single-shot escalation after a failed parse.
//!
//! A request gets at most two generations. [`EscalationPolicy`] decides from
//! the typed [`ParseError`] (and the output token count) whether the first
//! failure is worth one more try, and produces the greedy decoding settings
//! for that try. [`AttemptState`] makes the "at most once" rule explicit.

use std::fmt;

use crate::config::GenerationConfig;
use crate::output_parser::ParseError;

/// Where a request is in its generation budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    FirstAttempt,
    /// Terminal: no further generation is allowed.
    Escalated,
}

impl AttemptState {
    /// Move to the escalated state. Returns `None` once already escalated.
    pub fn escalate(self) -> Option<AttemptState> {
        match self {
            AttemptState::FirstAttempt => Some(AttemptState::Escalated),
            AttemptState::Escalated => None,
        }
    }

    /// 1-indexed attempt number.
    pub fn number(self) -> u32 {
        match self {
            AttemptState::FirstAttempt => 1,
            AttemptState::Escalated => 2,
        }
    }
}

/// Why the first attempt was escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationTrigger {
    /// The located span ended early or was too short for the stage.
    TruncatedOutput,
    /// Repair and the balanced-brace fallback both failed.
    UnrecoverableJson,
    /// Nothing parseable and the model stopped after very few tokens.
    LowTokenCount,
}

impl fmt::Display for EscalationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EscalationTrigger::TruncatedOutput => "truncated_output",
            EscalationTrigger::UnrecoverableJson => "unrecoverable_json",
            EscalationTrigger::LowTokenCount => "low_token_count",
        })
    }
}

/// When to escalate and what the escalated attempt decodes with.
///
/// # Example
///
/// ```
/// use doc_classifier::retry::{EscalationPolicy, EscalationTrigger};
/// use doc_classifier::output_parser::ParseError;
///
/// let policy = EscalationPolicy::default();
/// let no_json = ParseError::NoJsonFound { text: String::new() };
/// assert_eq!(policy.trigger(&no_json, 12), Some(EscalationTrigger::LowTokenCount));
/// assert_eq!(policy.trigger(&no_json, 800), None);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationPolicy {
    /// Output shorter than this many tokens counts as an early stop.
    pub low_token_threshold: u32,
    pub top_p: f64,
    pub top_k: u32,
    /// Raised on the retry to discourage the loops that often precede truncation.
    pub repetition_penalty: f64,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            low_token_threshold: 100,
            top_p: 0.9,
            top_k: 40,
            repetition_penalty: 1.2,
        }
    }
}

impl EscalationPolicy {
    pub fn new(low_token_threshold: u32) -> Self {
        Self {
            low_token_threshold,
            ..Default::default()
        }
    }

    /// Whether `output_tokens` is suspiciously short.
    pub fn is_low_token_count(&self, output_tokens: u32) -> bool {
        output_tokens < self.low_token_threshold
    }

    /// Decide whether a first-attempt parse failure warrants escalation.
    pub fn trigger(&self, error: &ParseError, output_tokens: u32) -> Option<EscalationTrigger> {
        match error {
            ParseError::TruncatedOutput { .. } => Some(EscalationTrigger::TruncatedOutput),
            ParseError::UnrecoverableJson { .. } => Some(EscalationTrigger::UnrecoverableJson),
            ParseError::NoJsonFound { .. } if self.is_low_token_count(output_tokens) => {
                Some(EscalationTrigger::LowTokenCount)
            }
            ParseError::NoJsonFound { .. } => None,
        }
    }

    /// Greedy decoding settings for the escalated attempt.
    ///
    /// Token limits are carried over from `base`.
    pub fn escalated_config(&self, base: &GenerationConfig) -> GenerationConfig {
        GenerationConfig {
            temperature: 0.0,
            do_sample: false,
            top_p: self.top_p,
            top_k: self.top_k,
            repetition_penalty: self.repetition_penalty,
            ..base.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Stage;

    fn truncated() -> ParseError {
        ParseError::TruncatedOutput {
            length: 0,
            minimum: 60,
            text: "{".into(),
        }
    }

    fn unrecoverable() -> ParseError {
        ParseError::UnrecoverableJson {
            original: "{x}".into(),
            repaired: "{x}".into(),
            reason: "expected value".into(),
        }
    }

    #[test]
    fn test_state_escalates_once() {
        let state = AttemptState::FirstAttempt;
        assert_eq!(state.number(), 1);
        let state = state.escalate().unwrap();
        assert_eq!(state, AttemptState::Escalated);
        assert_eq!(state.number(), 2);
        assert!(state.escalate().is_none());
    }

    #[test]
    fn test_truncation_always_escalates() {
        let policy = EscalationPolicy::default();
        assert_eq!(
            policy.trigger(&truncated(), 40),
            Some(EscalationTrigger::TruncatedOutput)
        );
        assert_eq!(
            policy.trigger(&truncated(), 4000),
            Some(EscalationTrigger::TruncatedOutput)
        );
    }

    #[test]
    fn test_unrecoverable_always_escalates() {
        let policy = EscalationPolicy::default();
        assert_eq!(
            policy.trigger(&unrecoverable(), 1500),
            Some(EscalationTrigger::UnrecoverableJson)
        );
    }

    #[test]
    fn test_no_json_escalates_only_when_short() {
        let policy = EscalationPolicy::new(50);
        let err = ParseError::NoJsonFound {
            text: "I am unable".into(),
        };
        assert_eq!(policy.trigger(&err, 49), Some(EscalationTrigger::LowTokenCount));
        assert_eq!(policy.trigger(&err, 50), None);
    }

    #[test]
    fn test_escalated_config_is_greedy() {
        let base = GenerationConfig::for_stage(Stage::FieldMapping);
        let escalated = EscalationPolicy::default().escalated_config(&base);
        assert_eq!(escalated.temperature, 0.0);
        assert!(!escalated.do_sample);
        assert_eq!(escalated.top_p, 0.9);
        assert_eq!(escalated.top_k, 40);
        assert_eq!(escalated.repetition_penalty, 1.2);
        assert_eq!(escalated.max_new_tokens, base.max_new_tokens);
        assert_eq!(escalated.max_input_length, base.max_input_length);
    }

    #[test]
    fn test_trigger_display() {
        assert_eq!(EscalationTrigger::LowTokenCount.to_string(), "low_token_count");
    }
}
