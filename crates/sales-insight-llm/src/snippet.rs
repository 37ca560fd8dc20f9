//! Pulling a JSON payload out of free-form model output.
//!
//! Models asked for "only JSON" still wrap it in prose, markdown fences or
//! both. [`extract_code_snippet`] takes the first fenced block;
//! [`parse_json_payload`] parses it, falling back to the first balanced
//! `{...}` object when the snippet itself is not valid JSON.

use std::sync::OnceLock;

use regex::Regex;

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        // The rest of the opening fence line is the language tag, whatever it
        // holds. A fence followed directly by `{` or `[` opens an inline block
        // (```{...}```) and has no tag.
        Regex::new(r"(?s)```(?:(?:[^\n`{\[][^\n`]*)?\r?\n)?(?P<body>.*?)```")
            .expect("fence regex is valid")
    })
}

/// Content of the first fenced block in `text`, or `text` unchanged if there
/// is none.
///
/// The newline ending the opening fence line and one newline before the
/// closing fence are not part of the content.
pub fn extract_code_snippet(text: &str) -> &str {
    let Some(body) = fence_regex()
        .captures(text)
        .and_then(|caps| caps.name("body"))
    else {
        return text;
    };
    let body = body.as_str();
    body.strip_suffix("\r\n")
        .or_else(|| body.strip_suffix('\n'))
        .unwrap_or(body)
}

/// First complete top-level `{...}` substring, balancing braces outside of
/// string literals.
pub fn find_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escape = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract and parse the JSON payload of a model response.
///
/// Returns the parsed value and the exact text that was parsed.
pub fn parse_json_payload(raw: &str) -> Result<(serde_json::Value, &str), serde_json::Error> {
    let snippet = extract_code_snippet(raw).trim();
    match serde_json::from_str(snippet) {
        Ok(value) => Ok((value, snippet)),
        Err(err) => match find_json_object(snippet) {
            Some(object) if object.len() < snippet.len() => serde_json::from_str(object)
                .map(|value| (value, object))
                .map_err(|_| err),
            _ => Err(err),
        },
    }
}
