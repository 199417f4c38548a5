//! Recovery diagnostics attached to every validated result.
//!
//! [`RecoveryDiagnostics`] records how the returned record was obtained:
//! how many generations ran, why the retry happened, and which clean-up
//! steps touched the model output.

use serde::Serialize;

use crate::output_parser::RecoveryTrace;
use crate::retry::EscalationTrigger;

/// Records what happened between the prompt and the validated record.
///
/// # Example
///
/// ```
/// use doc_classifier::diagnostics::RecoveryDiagnostics;
///
/// let diag = RecoveryDiagnostics::default();
/// assert!(!diag.escalated());
/// assert!(diag.clean());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecoveryDiagnostics {
    /// Generations run (1 or 2).
    pub attempts: u32,

    /// Why the escalated attempt ran, if it did.
    #[serde(serialize_with = "serialize_trigger")]
    pub escalation: Option<EscalationTrigger>,

    pub fences_stripped: bool,

    pub preamble_stripped: bool,

    /// Whether JSON repair changed the located span.
    pub repaired: bool,

    /// Whether the balanced-brace fallback produced the record.
    pub regex_fallback: bool,

    /// Prompt tokens of the accepted attempt.
    pub input_token_count: u32,

    /// Generated tokens of the accepted attempt.
    pub output_token_count: u32,
}

impl RecoveryDiagnostics {
    pub(crate) fn from_trace(trace: RecoveryTrace) -> Self {
        Self {
            fences_stripped: trace.fences_stripped,
            preamble_stripped: trace.preamble_stripped,
            repaired: trace.repaired,
            regex_fallback: trace.regex_fallback,
            ..Default::default()
        }
    }

    pub fn escalated(&self) -> bool {
        self.escalation.is_some()
    }

    /// The model produced a parseable object with no clean-up at all.
    pub fn clean(&self) -> bool {
        !self.fences_stripped && !self.preamble_stripped && !self.repaired && !self.regex_fallback
    }
}

fn serialize_trigger<S: serde::Serializer>(
    trigger: &Option<EscalationTrigger>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match trigger {
        Some(t) => serializer.serialize_str(&t.to_string()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_default() {
        let d = RecoveryDiagnostics::default();
        assert_eq!(d.attempts, 0);
        assert!(!d.escalated());
        assert!(d.clean());
    }

    #[test]
    fn test_from_trace() {
        let d = RecoveryDiagnostics::from_trace(RecoveryTrace {
            repaired: true,
            ..Default::default()
        });
        assert!(d.repaired);
        assert!(!d.clean());
    }

    #[test]
    fn test_serializes_trigger_as_string() {
        let d = RecoveryDiagnostics {
            attempts: 2,
            escalation: Some(EscalationTrigger::TruncatedOutput),
            ..Default::default()
        };
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["escalation"], "truncated_output");
        assert_eq!(json["attempts"], 2);
    }
}
