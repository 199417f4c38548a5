//! Error types for model output recovery.

/// Ways a model completion can fail to yield a JSON object.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// No `{` anywhere in the output.
    #[error("no JSON object found in model output: {text}")]
    NoJsonFound {
        /// A truncated copy of the cleaned output (max 200 chars).
        text: String,
    },

    /// An object was started but the output stopped before a plausible end.
    #[error("model output looks truncated ({length} chars, need at least {minimum}): {text}")]
    TruncatedOutput {
        /// Length of the candidate span in characters (0 when no `}` was found).
        length: usize,
        /// The stage minimum that was not met.
        minimum: usize,
        /// A truncated copy of the candidate (max 200 chars).
        text: String,
    },

    /// Parsing still failed after repair and the balanced-brace fallback.
    #[error("JSON could not be recovered: {reason}")]
    UnrecoverableJson {
        /// The span located in the raw output, before repair.
        original: String,
        /// The span after the repair sequence.
        repaired: String,
        /// The serde error from parsing the repaired span.
        reason: String,
    },
}

/// Truncate a string to at most `max_len` characters, appending "..." if truncated.
pub(crate) fn truncate(s: &str, max_len: usize) -> String {
    match s.char_indices().nth(max_len) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}...", &s[..cut]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_is_untouched() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abcde", 5), "abcde");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("€€€€", 2), "€€...");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
