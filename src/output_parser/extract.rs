//! Locating the JSON object inside a raw completion.
//!
//! [`normalize`] undoes what the prompt envelope did (the seeded `{`), strips
//! markdown fences and conversational preamble, and returns the span from the
//! first `{` to the last `}`. The span is not guaranteed to parse; that is the
//! job of [`repair_json`](super::repair_json).

use super::error::{truncate, ParseError};

/// Openings models use before the JSON they were told to emit directly.
///
/// Matched case-insensitively near the start of the output.
pub const PREAMBLE_PHRASES: &[&str] = &[
    "based on the provided",
    "based on the document",
    "based on this",
    "here's the",
    "here is the",
    "the following is",
    "below is the",
    "i'll provide",
    "let me provide",
    "sure, here",
    "certainly",
    "looking at the document",
    "from the document",
];

/// Per-call settings for [`normalize`].
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// The prompt ended with a seeded `{` that the output does not repeat.
    pub seeded: bool,
    /// Shortest acceptable span, in characters.
    pub min_span_len: usize,
    /// How many leading characters to scan for preamble.
    pub preamble_window: usize,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            seeded: false,
            min_span_len: 0,
            preamble_window: 200,
        }
    }
}

/// The located candidate and what was done to find it.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    /// The output with the seed restored and fences removed.
    ///
    /// This is what the balanced-brace fallback scans.
    pub text: String,
    /// First `{` through last `}`, inclusive.
    pub span: String,
    pub fences_stripped: bool,
    pub preamble_stripped: bool,
}

/// Locate the outer JSON object in `raw`.
///
/// A completion that already parses as a JSON object is returned as-is, so
/// fence markers or preamble-like words inside its strings are never touched.
///
/// # Errors
///
/// - [`ParseError::NoJsonFound`] when there is no `{` at all
/// - [`ParseError::TruncatedOutput`] when there is no `}` after the first `{`,
///   or the span is shorter than `min_span_len`
///
/// # Example
///
/// ```
/// use doc_classifier::output_parser::{normalize, NormalizeOptions};
///
/// let out = normalize("Sure, here you go: {\"passed\": true}", &NormalizeOptions::default()).unwrap();
/// assert_eq!(out.span, "{\"passed\": true}");
/// assert!(out.preamble_stripped);
/// ```
pub fn normalize(raw: &str, opts: &NormalizeOptions) -> Result<Normalized, ParseError> {
    let mut text = if opts.seeded {
        format!("{{{}", raw)
    } else {
        raw.to_string()
    };

    let trimmed = text.trim();
    if is_json_object(trimmed) {
        let span = trimmed.to_string();
        check_span_len(&span, opts.min_span_len)?;
        return Ok(Normalized {
            text: span.clone(),
            span,
            fences_stripped: false,
            preamble_stripped: false,
        });
    }

    let fences_stripped = text.contains("```");
    if fences_stripped {
        text = strip_code_fences(&text);
    }

    let mut preamble_stripped = false;
    let mut candidate: &str = &text;
    if let Some(cut) = preamble_cut(&text, opts.preamble_window) {
        candidate = &text[cut..];
        preamble_stripped = true;
    }

    let start = candidate.find('{').ok_or_else(|| ParseError::NoJsonFound {
        text: truncate(text.trim(), 200),
    })?;
    let end = match candidate.rfind('}') {
        Some(end) if end > start => end,
        _ => {
            return Err(ParseError::TruncatedOutput {
                length: 0,
                minimum: opts.min_span_len,
                text: truncate(&candidate[start..], 200),
            })
        }
    };

    let span = candidate[start..=end].to_string();
    check_span_len(&span, opts.min_span_len)?;

    Ok(Normalized {
        span,
        text,
        fences_stripped,
        preamble_stripped,
    })
}

fn is_json_object(text: &str) -> bool {
    text.starts_with('{')
        && matches!(
            serde_json::from_str::<serde_json::Value>(text),
            Ok(serde_json::Value::Object(_))
        )
}

fn check_span_len(span: &str, minimum: usize) -> Result<(), ParseError> {
    let length = span.chars().count();
    if length < minimum {
        return Err(ParseError::TruncatedOutput {
            length,
            minimum,
            text: truncate(span, 200),
        });
    }
    Ok(())
}

/// Remove ```` ```json ```` and ```` ``` ```` markers anywhere in the text.
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "")
        .replace("```JSON", "")
        .replace("```", "")
}

/// Byte offset where the JSON starts if `text` opens with conversational preamble.
///
/// Only phrases that begin inside the first `window` characters and before
/// the first `"` count: JSON keys are quoted, prose openings are not. The cut
/// lands on the first `{` after the phrase.
fn preamble_cut(text: &str, window: usize) -> Option<usize> {
    let window_end = text
        .char_indices()
        .nth(window)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let head = text[..window_end].to_ascii_lowercase();
    let first_quote = text.find('"').unwrap_or(text.len());

    let (pos, phrase) = PREAMBLE_PHRASES
        .iter()
        .filter_map(|phrase| head.find(phrase).map(|pos| (pos, *phrase)))
        .filter(|(pos, _)| *pos < first_quote)
        .min_by_key(|(pos, _)| *pos)?;

    let after = pos + phrase.len();
    text[after..].find('{').map(|offset| after + offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(seeded: bool, min: usize) -> NormalizeOptions {
        NormalizeOptions {
            seeded,
            min_span_len: min,
            ..Default::default()
        }
    }

    // ── span location ──

    #[test]
    fn test_plain_object() {
        let out = normalize(r#"{"a": 1}"#, &opts(false, 0)).unwrap();
        assert_eq!(out.span, r#"{"a": 1}"#);
        assert!(!out.fences_stripped);
        assert!(!out.preamble_stripped);
    }

    #[test]
    fn test_seed_is_restored() {
        let out = normalize(r#""passed": true}"#, &opts(true, 0)).unwrap();
        assert_eq!(out.span, r#"{"passed": true}"#);
    }

    #[test]
    fn test_trailing_prose_dropped() {
        let out = normalize(
            "{\"a\": 1}\n\nThis mapping covers all fields.",
            &opts(false, 0),
        )
        .unwrap();
        assert_eq!(out.span, "{\"a\": 1}");
    }

    #[test]
    fn test_fences_removed() {
        let raw = "```json\n{\"a\": 1}\n```";
        let out = normalize(raw, &opts(false, 0)).unwrap();
        assert_eq!(out.span, "{\"a\": 1}");
        assert!(out.fences_stripped);
    }

    #[test]
    fn test_fence_inside_valid_json_kept() {
        let raw = r#"{"snippet": "```json"}"#;
        let out = normalize(raw, &opts(false, 0)).unwrap();
        assert_eq!(out.span, raw);
        assert!(!out.fences_stripped);
    }

    // ── preamble ──

    #[test]
    fn test_preamble_before_seeded_object() {
        let out = normalize(r#"Sure, here you go: {"passed": true}"#, &opts(true, 15)).unwrap();
        assert_eq!(out.span, r#"{"passed": true}"#);
        assert!(out.preamble_stripped);
    }

    #[test]
    fn test_preamble_is_case_insensitive() {
        let out = normalize(
            "BASED ON THE DOCUMENT, the answer is:\n{\"passed\": false}",
            &opts(false, 0),
        )
        .unwrap();
        assert_eq!(out.span, "{\"passed\": false}");
        assert!(out.preamble_stripped);
    }

    #[test]
    fn test_preamble_outside_window_ignored() {
        let filler = "x".repeat(250);
        let raw = format!("{{\"a\": 1, {} Here is the {{\"b\": 2}}", filler);
        let out = normalize(&raw, &opts(false, 0)).unwrap();
        assert!(!out.preamble_stripped);
        assert!(out.span.starts_with("{\"a\": 1"));
    }

    #[test]
    fn test_preamble_words_inside_strings_ignored() {
        // not valid JSON (trailing comma), so heuristics run
        let raw = r#"{"reasoning": "Here is the {draft} invoice", "passed": true,}"#;
        let out = normalize(raw, &opts(false, 0)).unwrap();
        assert!(!out.preamble_stripped);
        assert_eq!(out.span, raw);
    }

    // ── failures ──

    #[test]
    fn test_no_brace_is_no_json() {
        let err = normalize("I cannot help with that.", &opts(false, 0)).unwrap_err();
        assert!(matches!(err, ParseError::NoJsonFound { .. }));
    }

    #[test]
    fn test_open_without_close_is_truncated() {
        let err = normalize(r#""business_relevant": true, "selected"#, &opts(true, 60)).unwrap_err();
        match err {
            ParseError::TruncatedOutput { length, minimum, .. } => {
                assert_eq!(length, 0);
                assert_eq!(minimum, 60);
            }
            other => panic!("expected truncation, got {other:?}"),
        }
    }

    #[test]
    fn test_short_span_is_truncated() {
        let err = normalize(r#"{"a": 1}"#, &opts(false, 50)).unwrap_err();
        assert!(matches!(
            err,
            ParseError::TruncatedOutput { length: 8, minimum: 50, .. }
        ));
    }

    #[test]
    fn test_valid_json_round_trips() {
        let corpus = [
            r#"{"passed": true, "errors": [], "warnings": ["rounding"]}"#,
            r#"{"a": {"b": [1, {"c": "Based on this"}]}, "d": "```"}"#,
            "  {\"x\": null}\n",
        ];
        for raw in corpus {
            let out = normalize(raw, &opts(false, 0)).unwrap();
            let before: serde_json::Value = serde_json::from_str(raw).unwrap();
            let after: serde_json::Value = serde_json::from_str(&out.span).unwrap();
            assert_eq!(before, after);
        }
    }
}
