//! Pull JSON out of chatty model output.

use serde::de::DeserializeOwned;

use crate::GenerationFailure;

/// Locate the JSON payload in a model response.
///
/// Handles bare JSON, fenced ```json blocks, and JSON embedded in prose
/// (first balanced `{...}` or `[...]`).
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Fenced block wins when present
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            let inner = body[..end].trim();
            if !inner.is_empty() {
                return balanced_span(inner).or(Some(inner));
            }
        }
    }

    balanced_span(trimmed)
}

/// First balanced object or array, respecting string literals.
fn balanced_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract and deserialize the JSON payload of a model response.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, GenerationFailure> {
    let payload = extract_json(text)
        .ok_or_else(|| GenerationFailure::Parse("no JSON found in response".into()))?;
    serde_json::from_str(payload).map_err(|e| GenerationFailure::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_object() {
        assert_eq!(extract_json(r#" {"a": 1} "#), Some(r#"{"a": 1}"#));
    }

    #[test]
    fn fenced_block() {
        let text = "Here you go:\n```json\n[1, 2, 3]\n```\nDone.";
        assert_eq!(extract_json(text), Some("[1, 2, 3]"));
    }

    #[test]
    fn embedded_in_prose_with_braces_in_strings() {
        let text = r#"The answer is {"note": "a } inside", "n": [1, {"x": 2}]} as requested."#;
        let v: serde_json::Value = parse_json(text).unwrap();
        assert_eq!(v["note"], "a } inside");
        assert_eq!(v["n"][1]["x"], 2);
    }

    #[test]
    fn missing_or_truncated() {
        assert!(extract_json("nothing to see").is_none());
        assert!(extract_json(r#"{"a": [1, 2"#).is_none());
        assert!(matches!(
            parse_json::<serde_json::Value>(""),
            Err(GenerationFailure::Parse(_))
        ));
    }
}
