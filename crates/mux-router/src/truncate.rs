// SPDX-License-Identifier: MIT

//! Response truncation (§4.7): any tool result whose JSON rendering
//! exceeds the configured character limit is replaced by a head+tail
//! slice with a marker recording how much was cut, protecting the
//! caller's context window without silently dropping the whole payload.

const TRUNCATION_MARKER_BUDGET: usize = 64;

/// Truncates `text` to at most `limit` characters, keeping a head and tail
/// slice and a `"... [truncated N chars] ..."` marker between them. A
/// `limit` too small to fit any content plus the marker just returns the
/// marker describing the full length.
pub fn truncate_text(text: &str, limit: usize) -> String {
    let char_count = text.chars().count();
    if char_count <= limit {
        return text.to_string();
    }

    let budget = limit.saturating_sub(TRUNCATION_MARKER_BUDGET);
    let half = budget / 2;
    let chars: Vec<char> = text.chars().collect();
    let head: String = chars[..half.min(chars.len())].iter().collect();
    let tail_start = chars.len().saturating_sub(half);
    let tail: String = chars[tail_start..].iter().collect();
    let omitted = char_count.saturating_sub(head.chars().count() + tail.chars().count());

    format!("{head}... [truncated {omitted} chars] ...{tail}")
}

/// Applies [`truncate_text`] to a tool-call result's JSON rendering. Only
/// string and structured results that serialize larger than `limit` are
/// affected; anything under the limit passes through unchanged.
pub fn truncate_tool_result(result: &serde_json::Value, limit: usize) -> serde_json::Value {
    let rendered = result.to_string();
    if rendered.chars().count() <= limit {
        return result.clone();
    }
    serde_json::Value::String(truncate_text(&rendered, limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_passes_through_unchanged() {
        assert_eq!(truncate_text("hello", 100), "hello");
    }

    #[test]
    fn long_text_is_truncated_with_a_marker() {
        let text = "a".repeat(1000);
        let out = truncate_text(&text, 200);
        assert!(out.len() < text.len());
        assert!(out.contains("truncated"));
        assert!(out.starts_with("aaaa"));
        assert!(out.ends_with("aaaa"));
    }

    #[test]
    fn truncate_tool_result_only_touches_oversized_payloads() {
        let small = serde_json::json!({"ok": true});
        assert_eq!(truncate_tool_result(&small, 1000), small);

        let big = serde_json::Value::String("x".repeat(5000));
        let out = truncate_tool_result(&big, 200);
        assert!(matches!(out, serde_json::Value::String(_)));
        assert!(out.to_string().contains("truncated"));
    }
}
