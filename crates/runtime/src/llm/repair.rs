//! Model-output cleanup and JSON repair
//!
//! Models wrap JSON in markdown fences, prefix it with free-form reasoning,
//! leave trailing commas, forget closing brackets, and emit unescaped quotes
//! inside string values. Each of those gets a dedicated pass here; callers
//! fall back to documented defaults when every pass fails.

use serde_json::Value;

/// Strip markdown code fences (```json / ```markdown / ```html / ```).
pub fn strip_code_fences(text: &str) -> String {
    let mut out = text.trim().to_string();
    for opener in ["```json", "```markdown", "```html", "```"] {
        if let Some(stripped) = out.strip_prefix(opener) {
            out = stripped.trim_start().to_string();
            break;
        }
    }
    if let Some(stripped) = out.trim_end().strip_suffix("```") {
        out = stripped.trim_end().to_string();
    }
    // Interior fences from multi-block answers
    out.replace("```json", "")
        .replace("```markdown", "")
        .replace("```html", "")
        .replace("```", "")
        .trim()
        .to_string()
}

/// Drop everything before the first `{` or `[` so reasoning preambles do not
/// poison the parser. Returns the input unchanged when no JSON marker exists.
pub fn remove_reasoning_preamble(text: &str) -> &str {
    match text.find(['{', '[']) {
        Some(idx) => text[idx..].trim(),
        None => text.trim(),
    }
}

/// Remove trailing commas before closing brackets.
fn fix_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

/// Append missing closing brackets so `{` / `[` counts balance.
fn balance_brackets(text: &str) -> String {
    let mut out = text.to_string();
    let open_braces = out.matches('{').count();
    let close_braces = out.matches('}').count();
    let open_brackets = out.matches('[').count();
    let close_brackets = out.matches(']').count();
    if open_braces > close_braces {
        out.push_str(&"}".repeat(open_braces - close_braces));
    }
    if open_brackets > close_brackets {
        out.push_str(&"]".repeat(open_brackets - close_brackets));
    }
    out
}

/// Escape interior double quotes via a character-level state machine.
///
/// A `"` seen while inside a string only terminates it when the next
/// non-whitespace character is `:`, `,`, or `}`; any other `"` is treated as
/// literal content and escaped.
fn fix_unescaped_quotes(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escape_next = false;

    for (i, &c) in chars.iter().enumerate() {
        if escape_next {
            out.push(c);
            escape_next = false;
            continue;
        }
        if c == '\\' {
            out.push(c);
            escape_next = true;
            continue;
        }
        if c == '"' {
            if in_string {
                let mut j = i + 1;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                match chars.get(j) {
                    Some(':') | Some(',') | Some('}') | None => {
                        in_string = false;
                        out.push(c);
                    }
                    _ => out.push_str("\\\""),
                }
            } else {
                in_string = true;
                out.push(c);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Attempt to turn malformed JSON text into a parsed value.
///
/// Passes are tried in order of increasing aggressiveness; `None` means the
/// text is unrecoverable and the caller should use its documented default.
pub fn repair_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let no_commas = fix_trailing_commas(trimmed);
    if let Ok(value) = serde_json::from_str(&no_commas) {
        return Some(value);
    }

    let balanced = balance_brackets(&no_commas);
    if let Ok(value) = serde_json::from_str(&balanced) {
        return Some(value);
    }

    let quoted = fix_unescaped_quotes(&balanced);
    serde_json::from_str(&quoted).ok()
}

/// Full pipeline for a JSON-shaped completion: strip fences, drop the
/// reasoning preamble, then parse or repair.
pub fn extract_json(raw: &str) -> Option<Value> {
    let unfenced = strip_code_fences(raw);
    let body = remove_reasoning_preamble(&unfenced);
    repair_json(body)
}

/// Markdown/HTML-shaped completions only need their fences removed.
pub fn extract_text(raw: &str) -> String {
    strip_code_fences(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_are_stripped() {
        let fenced = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fences(fenced), "{\"a\": 1}");
        let html = "```html\n<html></html>\n```";
        assert_eq!(strip_code_fences(html), "<html></html>");
    }

    #[test]
    fn reasoning_preamble_is_removed() {
        let raw = "Let me think about this.\nThe answer is: {\"a\": 1}";
        assert_eq!(remove_reasoning_preamble(raw), "{\"a\": 1}");
    }

    #[test]
    fn trailing_commas_are_fixed() {
        let value = repair_json("{\"a\": 1, \"b\": [1, 2,],}").unwrap();
        assert_eq!(value["b"][1], 2);
    }

    #[test]
    fn missing_brackets_are_balanced() {
        let value = repair_json("{\"a\": {\"b\": 1}").unwrap();
        assert_eq!(value["a"]["b"], 1);
    }

    #[test]
    fn interior_quotes_are_escaped() {
        let broken = r#"{"quote": "he said "hello" to them", "n": 1}"#;
        let value = repair_json(broken).unwrap();
        assert_eq!(value["quote"], "he said \"hello\" to them");
        assert_eq!(value["n"], 1);
    }

    #[test]
    fn unrecoverable_text_returns_none() {
        assert!(repair_json("not json at all").is_none());
    }

    #[test]
    fn full_pipeline() {
        let raw = "Reasoning first.\n```json\n{\"search_query\": \"storm response\",}\n```";
        let value = extract_json(raw).unwrap();
        assert_eq!(value["search_query"], "storm response");
    }
}
