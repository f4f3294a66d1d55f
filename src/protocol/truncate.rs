// Oversized tool-result truncation
//
// Tool results can be arbitrarily large (file dumps, build logs). Everything
// downstream (log, UI transport, history) sees the truncated form.

use serde_json::Value;
use std::borrow::Cow;

/// Truncate `text` to `limit` characters, keeping the head and the tail and
/// inserting a marker with the original length. Returns the input untouched
/// when it already fits.
pub fn truncate_payload(text: &str, limit: usize) -> Cow<'_, str> {
    let total = text.chars().count();
    if total <= limit {
        return Cow::Borrowed(text);
    }

    let head_len = limit / 2;
    let tail_len = limit - head_len;

    let head_end = text
        .char_indices()
        .nth(head_len)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    let tail_start = text
        .char_indices()
        .nth(total - tail_len)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());

    Cow::Owned(format!(
        "{}\n\n... [truncated, original length: {}] ...\n\n{}",
        &text[..head_end],
        total,
        &text[tail_start..]
    ))
}

/// Truncate a single tool-result `content` value in place.
///
/// Handles both shapes the worker emits: `content` as a string, and `content`
/// as an array of `{"type": "text", "text": ...}` parts. Returns how many
/// strings were shortened.
pub fn truncate_content(content: &mut Value, limit: usize) -> usize {
    match content {
        Value::String(text) => shorten(text, limit),
        Value::Array(parts) => parts
            .iter_mut()
            .filter_map(|part| part.get_mut("text"))
            .map(|text| match text {
                Value::String(text) => shorten(text, limit),
                _ => 0,
            })
            .sum(),
        _ => 0,
    }
}

fn shorten(text: &mut String, limit: usize) -> usize {
    match truncate_payload(text, limit) {
        Cow::Borrowed(_) => 0,
        Cow::Owned(short) => {
            *text = short;
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_short_payload_untouched() {
        assert!(matches!(truncate_payload("hello", 10), Cow::Borrowed("hello")));
    }

    #[test]
    fn test_keeps_head_and_tail() {
        let text = format!("{}{}", "a".repeat(30), "z".repeat(30));
        let out = truncate_payload(&text, 20);
        assert!(out.starts_with(&"a".repeat(10)));
        assert!(out.ends_with(&"z".repeat(10)));
        assert!(out.contains("[truncated, original length: 60]"));
    }

    #[test]
    fn test_multibyte_boundaries() {
        let text = "é".repeat(100);
        let out = truncate_payload(&text, 10);
        assert!(out.starts_with("ééééé\n"));
        assert!(out.ends_with("\nééééé"));
    }

    #[test]
    fn test_tool_result_content_both_shapes() {
        let big = "x".repeat(500);
        let mut plain = json!(big.clone());
        let mut parts = json!([{"type": "text", "text": big}, {"type": "image", "source": {}}]);
        let mut other = json!({"structured": true});

        assert_eq!(truncate_content(&mut plain, 100), 1);
        assert!(plain.as_str().unwrap().contains("original length: 500"));
        assert_eq!(truncate_content(&mut parts, 100), 1);
        assert!(parts[0]["text"].as_str().unwrap().contains("original length: 500"));
        assert_eq!(truncate_content(&mut other, 100), 0);
    }
}
