//! Conservative, idempotent JSON repair for model output.
//!
//! Only delimiters are touched: the wrapping braces, stray commas and
//! excess braces. Content is never reordered, merged or invented, and
//! characters inside string literals are left alone. Running
//! [`repair_json`] on its own output returns the same string.

/// Repair the usual ways a model breaks an otherwise well-formed object.
///
/// Fixes applied (in order):
/// 1. Trim surrounding whitespace
/// 2. Prepend `{` when the text does not start with one
/// 3. Append `}` when the text does not end with one
/// 4. Remove commas that precede a closing `}` or `]`
/// 5. Collapse repeated commas into one
/// 6. Drop excess closing braces from the end (keeping the final `}`), or,
///    when openers outnumber closers and the text begins with `{{`, drop the
///    duplicated leading braces
///
/// The result is not guaranteed to be valid JSON. Objects cut off before
/// their closing braces stay unbalanced; closing them would mean guessing
/// at structure the model never produced.
///
/// # Example
///
/// ```
/// use doc_classifier::output_parser::repair_json;
///
/// assert_eq!(repair_json(r#"{"a": 1,}}"#), r#"{"a": 1}"#);
/// assert_eq!(repair_json(r#""passed": true"#), r#"{"passed": true}"#);
/// ```
pub fn repair_json(span: &str) -> String {
    let mut s = span.trim().to_string();

    let wrapped = !s.starts_with('{');
    if wrapped {
        s.insert(0, '{');
    }
    if !s.ends_with('}') {
        s.push('}');
    }

    s = remove_trailing_commas(&s);
    s = collapse_repeated_commas(&s);
    balance_braces(&s, wrapped)
}

/// Mark which characters sit outside string literals.
///
/// Quote characters themselves are marked as inside.
fn outside_strings(chars: &[char]) -> Vec<bool> {
    let mut marks = Vec::with_capacity(chars.len());
    let mut in_string = false;
    let mut escape_next = false;

    for &c in chars {
        if escape_next {
            escape_next = false;
            marks.push(false);
            continue;
        }
        if in_string {
            if c == '\\' {
                escape_next = true;
            } else if c == '"' {
                in_string = false;
            }
            marks.push(false);
            continue;
        }
        if c == '"' {
            in_string = true;
            marks.push(false);
            continue;
        }
        marks.push(true);
    }
    marks
}

/// Remove commas followed (past whitespace and further commas) by `}` or `]`.
fn remove_trailing_commas(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let outside = outside_strings(&chars);
    let mut result = String::with_capacity(s.len());

    for (i, &c) in chars.iter().enumerate() {
        if c == ',' && outside[i] {
            let next = chars[i + 1..]
                .iter()
                .find(|ch| !ch.is_whitespace() && **ch != ',');
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        result.push(c);
    }
    result
}

/// Drop any comma whose previous significant character was also a comma.
fn collapse_repeated_commas(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let outside = outside_strings(&chars);
    let mut result = String::with_capacity(s.len());
    let mut last_significant: Option<char> = None;

    for (i, &c) in chars.iter().enumerate() {
        if c == ',' && outside[i] && last_significant == Some(',') {
            continue;
        }
        if !c.is_whitespace() {
            last_significant = Some(if outside[i] { c } else { '"' });
        }
        result.push(c);
    }
    result
}

/// Reconcile `{`/`}` counts outside string literals.
fn balance_braces(s: &str, wrapped: bool) -> String {
    let mut chars: Vec<char> = s.chars().collect();
    let outside = outside_strings(&chars);

    let openers = count_outside(&chars, &outside, '{');
    let closers: Vec<usize> = chars
        .iter()
        .enumerate()
        .filter(|(i, c)| **c == '}' && outside[*i])
        .map(|(i, _)| i)
        .collect();

    if closers.len() > openers {
        let excess = closers.len() - openers;
        // keep the final brace so the text still ends with `}`
        let removable = match closers.last() {
            Some(&last) if last == chars.len() - 1 => &closers[..closers.len() - 1],
            _ => &closers[..],
        };
        let drop_from = removable.len().saturating_sub(excess);
        for &idx in removable[drop_from..].iter().rev() {
            chars.remove(idx);
        }
        return chars.into_iter().collect();
    }

    if !wrapped {
        let mut open = openers;
        let close = closers.len();
        let mut skip = 0;
        while open > close && chars.get(skip) == Some(&'{') && chars.get(skip + 1) == Some(&'{') {
            skip += 1;
            open -= 1;
        }
        return chars[skip..].iter().collect();
    }

    chars.into_iter().collect()
}

fn count_outside(chars: &[char], outside: &[bool], target: char) -> usize {
    chars
        .iter()
        .zip(outside)
        .filter(|(c, out)| **c == target && **out)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parses(s: &str) -> bool {
        serde_json::from_str::<serde_json::Value>(s).is_ok()
    }

    // ── individual fixes ──

    #[test]
    fn test_trims_whitespace() {
        assert_eq!(repair_json("  \n{\"a\": 1}\n  "), "{\"a\": 1}");
    }

    #[test]
    fn test_adds_missing_wrapper() {
        assert_eq!(repair_json(r#""a": 1, "b": 2"#), r#"{"a": 1, "b": 2}"#);
    }

    #[test]
    fn test_appends_missing_final_brace() {
        assert_eq!(repair_json(r#"{"a": 1"#), r#"{"a": 1}"#);
    }

    #[test]
    fn test_trailing_comma_in_object_and_array() {
        assert_eq!(repair_json(r#"{"a": [1, 2,], "b": 3,}"#), r#"{"a": [1, 2], "b": 3}"#);
        assert_eq!(
            repair_json("{\"a\": 1,\n  }"),
            "{\"a\": 1\n  }"
        );
    }

    #[test]
    fn test_repeated_commas_collapse() {
        assert_eq!(repair_json(r#"{"a": 1,, "b": 2}"#), r#"{"a": 1, "b": 2}"#);
        assert_eq!(repair_json(r#"{"a": [1,,,2]}"#), r#"{"a": [1,2]}"#);
    }

    #[test]
    fn test_repeated_commas_before_closer() {
        assert_eq!(repair_json(r#"{"a": 1,,}"#), r#"{"a": 1}"#);
    }

    #[test]
    fn test_excess_closing_braces_stripped() {
        assert_eq!(repair_json(r#"{"a": {"b": 1}}}}"#), r#"{"a": {"b": 1}}"#);
    }

    #[test]
    fn test_duplicate_leading_brace_stripped() {
        assert_eq!(repair_json(r#"{{"a": 1}"#), r#"{"a": 1}"#);
        assert_eq!(repair_json(r#"{{{"a": 1}"#), r#"{"a": 1}"#);
    }

    #[test]
    fn test_nested_object_start_is_not_a_duplicate() {
        // balanced: nothing to strip even though it starts with `{{`
        let s = r#"{{"a": 1}}"#;
        assert_eq!(repair_json(s), s);
    }

    #[test]
    fn test_truncated_object_is_not_auto_closed() {
        let repaired = repair_json(r#"{"a": {"b": 1}"#);
        assert_eq!(repaired, r#"{"a": {"b": 1}"#);
        assert!(!parses(&repaired));
    }

    // ── string literals ──

    #[test]
    fn test_braces_and_commas_inside_strings_untouched() {
        let s = r#"{"note": "smile :} ,, ok,}", "tpl": "{{x}}"}"#;
        assert_eq!(repair_json(s), s);
    }

    #[test]
    fn test_escaped_quotes_inside_strings() {
        let s = r#"{"q": "she said \"hi,}\"", "n": 1,}"#;
        assert_eq!(repair_json(s), r#"{"q": "she said \"hi,}\"", "n": 1}"#);
    }

    // ── scenarios ──

    #[test]
    fn test_nested_trailing_comma_repairs_and_parses() {
        let repaired = repair_json(r#"{"api_request_body": {"a":1,}}"#);
        assert_eq!(repaired, r#"{"api_request_body": {"a":1}}"#);
        assert!(parses(&repaired));

        let repaired = repair_json(r#"{"api_request_body": {"a":1,}}}"#);
        assert_eq!(repaired, r#"{"api_request_body": {"a":1}}"#);
    }

    #[test]
    fn test_brace_between_siblings_removed() {
        assert_eq!(repair_json(r#"{"a": 1}, "b": 2}"#), r#"{"a": 1, "b": 2}"#);
    }

    // ── properties ──

    #[test]
    fn test_repair_is_idempotent() {
        let corpus = [
            "",
            "{",
            "}",
            "}}}",
            ",,,",
            r#""a": 1"#,
            r#"{"a": 1,,,}"#,
            r#"{"a": [1,, ,2,],}"#,
            r#"{{{"a": {"b": 1}"#,
            r#"{"a": 1}} trailing words"#,
            r#"{"a": 1}}}, "b": [}"#,
            r#"  {"a": "unterminated"#,
            r#"{"x": "\"}\"",, }}"#,
            r#"{ , "a": 1 }"#,
            "{\n  \"actions\": [\n    {\"a\": 1},\n    {\"b\": 2},\n  ],\n}\n}",
            r#"prefix {"a": 1} suffix {"b": 2}"#,
        ];
        for input in corpus {
            let once = repair_json(input);
            let twice = repair_json(&once);
            assert_eq!(once, twice, "not a fixed point for input {:?}", input);
        }
    }

    #[test]
    fn test_valid_json_passes_through() {
        let corpus = [
            r#"{}"#,
            r#"{"a": 1}"#,
            r#"{"a": {"b": [1, 2, {"c": null}]}, "d": "x,}"}"#,
            r#"{"passed": true, "errors": [], "calculations": {"total": 10.5}}"#,
        ];
        for input in corpus {
            assert_eq!(repair_json(input), input);
        }
    }

    #[test]
    fn test_repaired_output_ends_with_brace() {
        for input in [r#"{"a": 1}} x"#, "abc", r#"{"a": 1,"#] {
            let repaired = repair_json(input);
            assert!(repaired.starts_with('{'), "{:?}", repaired);
            assert!(repaired.ends_with('}'), "{:?}", repaired);
        }
    }
}
