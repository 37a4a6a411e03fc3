//! Response parsing: fence stripping, balanced JSON extraction, and the
//! fixed schema the model output is validated against.

use serde::Deserialize;

/// The shape the classifier expects back. Unknown fields are ignored;
/// missing required fields fail the parse.
#[derive(Debug, Deserialize)]
pub struct LlmExtractionResult {
    pub extracted_numbers: Vec<LlmNumberItem>,
}

#[derive(Debug, Deserialize)]
pub struct LlmNumberItem {
    pub number: String,
    #[serde(rename = "type")]
    pub phone_type: String,
    pub classification: String,
}

/// Extract the first balanced JSON object or array from free-form model
/// output. Markdown code fences need no special handling: scanning starts at
/// the first brace. String literals and escapes are respected.
pub fn extract_json_block(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find(['{', '['])?;
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
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

    #[test]
    fn plain_object_is_found() {
        let text = r#"{"extracted_numbers": []}"#;
        assert_eq!(extract_json_block(text), Some(text));
    }

    #[test]
    fn fenced_json_is_found() {
        let text = "Here you go:\n```json\n{\"extracted_numbers\": [{\"number\": \"+49\"}]}\n```\nDone.";
        let block = extract_json_block(text).unwrap();
        assert!(block.starts_with('{'));
        assert!(block.ends_with('}'));
        assert!(serde_json::from_str::<serde_json::Value>(block).is_ok());
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scanner() {
        let text = r#"note {"a": "closing } inside", "b": 2} trailing"#;
        assert_eq!(extract_json_block(text), Some(r#"{"a": "closing } inside", "b": 2}"#));
    }

    #[test]
    fn prose_without_json_yields_none() {
        assert_eq!(extract_json_block("no numbers found, sorry"), None);
    }

    #[test]
    fn schema_requires_number_type_and_classification() {
        let good = r#"{"extracted_numbers": [{"number": "+4930123456", "type": "Main Line", "classification": "Primary", "confidence": 0.9}]}"#;
        let parsed: LlmExtractionResult = serde_json::from_str(good).unwrap();
        assert_eq!(parsed.extracted_numbers[0].phone_type, "Main Line");

        let missing = r#"{"extracted_numbers": [{"type": "Main Line", "classification": "Primary"}]}"#;
        assert!(serde_json::from_str::<LlmExtractionResult>(missing).is_err());
    }
}
