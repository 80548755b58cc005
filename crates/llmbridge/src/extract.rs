//! Pull a JSON object out of free-form model output.
//!
//! Models wrap JSON in prose or code fences. The scanner walks the text once
//! per candidate `{`, tracking string literals and escapes so braces inside
//! strings do not end the object early, and returns the first balanced
//! candidate that actually parses as an object.

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no JSON object found in response")]
    NotFound,

    #[error("JSON object does not match the expected shape: {0}")]
    Shape(#[from] serde_json::Error),
}

/// The first complete, parseable `{...}` object in `text`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = balanced_end(&bytes[start..]) {
            let candidate = &text[start..start + end];
            if serde_json::from_str::<serde_json::Value>(candidate)
                .map(|v| v.is_object())
                .unwrap_or(false)
            {
                return Some(candidate);
            }
        }
        search_from = start + 1;
    }
    None
}

/// Extract the first object and deserialize it.
pub fn parse_json_object<T: DeserializeOwned>(text: &str) -> Result<T, ExtractError> {
    let candidate = extract_json_object(text).ok_or(ExtractError::NotFound)?;
    Ok(serde_json::from_str(candidate)?)
}

/// Length of the balanced object starting at `bytes[0] == b'{'`.
fn balanced_end(bytes: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            match (escaped, b) {
                (true, _) => escaped = false,
                (false, b'\\') => escaped = true,
                (false, b'"') => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[test]
    fn test_plain_object() {
        assert_eq!(extract_json_object(r#"{"a": 1}"#), Some(r#"{"a": 1}"#));
    }

    #[test]
    fn test_surrounded_by_prose() {
        let text = "Sure! Here is the plan:\n```json\n{\"summary\": \"x\", \"steps\": []}\n```\nLet me know.";
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"summary": "x", "steps": []}"#)
        );
    }

    #[test]
    fn test_brace_inside_string() {
        let text = r#"result: {"code": "if x { y }", "ok": true} trailing }"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"code": "if x { y }", "ok": true}"#)
        );
    }

    #[test]
    fn test_escaped_quote_inside_string() {
        let text = r#"{"msg": "say \"}\" please", "n": 2}"#;
        assert_eq!(extract_json_object(text), Some(text));
    }

    #[test]
    fn test_skips_non_json_braces() {
        let text = r#"Use the {name} placeholder. {"name": "cube"}"#;
        assert_eq!(extract_json_object(text), Some(r#"{"name": "cube"}"#));
    }

    #[test]
    fn test_nested_objects() {
        let text = r#"{"a": {"b": {"c": 1}}, "d": [ {"e": 2} ]}"#;
        assert_eq!(extract_json_object(text), Some(text));
    }

    #[test]
    fn test_unbalanced_returns_none() {
        assert_eq!(extract_json_object(r#"{"a": 1"#), None);
        assert_eq!(extract_json_object("no json here"), None);
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        success: bool,
        reason: String,
    }

    #[test]
    fn test_parse_typed() {
        let v: Verdict =
            parse_json_object(r#"The verdict: {"success": true, "reason": "cube exists"}"#).unwrap();
        assert_eq!(
            v,
            Verdict {
                success: true,
                reason: "cube exists".to_string()
            }
        );
    }

    #[test]
    fn test_parse_wrong_shape() {
        let err = parse_json_object::<Verdict>(r#"{"success": "maybe"}"#).unwrap_err();
        assert!(matches!(err, ExtractError::Shape(_)));
    }

    #[test]
    fn test_parse_missing() {
        let err = parse_json_object::<Verdict>("I could not decide.").unwrap_err();
        assert!(matches!(err, ExtractError::NotFound));
    }
}
