//! Defensive extraction of a JSON object from free-form model output.
//!
//! Model text is never trusted as typed data: fences are stripped, the first
//! balanced top-level object is located, trailing commas are removed, and only
//! then is the result parsed and checked to be an object.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
/// Reasons model output could not be turned into a JSON object.
pub enum ModelOutputError {
    #[error("model output contained no JSON object")]
    NoJsonObject,
    #[error("model output was not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("model output field '{0}' is missing or not a list")]
    MissingList(&'static str),
}

/// Removes a leading ```` ``` ```` / ```` ```json ```` fence and a trailing ```` ``` ```` fence.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        let tag_len = rest
            .char_indices()
            .find(|(_, ch)| !ch.is_ascii_alphanumeric())
            .map(|(index, _)| index)
            .unwrap_or(rest.len());
        text = rest[tag_len..].trim_start();
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest.trim_end();
    }
    text
}

/// Returns the first balanced `{ ... }` span, ignoring braces inside string literals.
pub fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0_usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
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

/// Drops commas that directly precede a closing `}` or `]` outside string literals.
pub fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut output = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (index, &ch) in chars.iter().enumerate() {
        if in_string {
            output.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        if ch == '"' {
            in_string = true;
        } else if ch == ',' {
            let next = chars[index + 1..]
                .iter()
                .find(|candidate| !candidate.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        output.push(ch);
    }
    output
}

/// Full defensive pipeline: fences, first object, trailing commas, parse.
pub fn parse_model_object(raw: &str) -> Result<Map<String, Value>, ModelOutputError> {
    let unfenced = strip_code_fences(raw);
    let object_text = first_json_object(unfenced).ok_or(ModelOutputError::NoJsonObject)?;
    match serde_json::from_str::<Value>(&strip_trailing_commas(object_text))? {
        Value::Object(map) => Ok(map),
        _ => Err(ModelOutputError::NoJsonObject),
    }
}

/// Reads a required list field from a parsed model object.
pub fn required_list<'a>(
    object: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a Vec<Value>, ModelOutputError> {
    object
        .get(field)
        .and_then(Value::as_array)
        .ok_or(ModelOutputError::MissingList(field))
}

#[cfg(test)]
mod tests {
    use super::{
        first_json_object, parse_model_object, required_list, strip_code_fences,
        strip_trailing_commas, ModelOutputError,
    };

    #[test]
    fn unit_strip_code_fences_handles_language_tags() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("  {\"plain\":true} "), "{\"plain\":true}");
    }

    #[test]
    fn unit_first_json_object_ignores_braces_inside_strings() {
        let text = r#"Sure! {"content": "use {braces} \" here", "n": {"x": 1}} trailing {"#;
        assert_eq!(
            first_json_object(text),
            Some(r#"{"content": "use {braces} \" here", "n": {"x": 1}}"#)
        );
        assert_eq!(first_json_object("no object"), None);
        assert_eq!(first_json_object("{ unterminated"), None);
    }

    #[test]
    fn unit_strip_trailing_commas_preserves_commas_in_strings() {
        assert_eq!(
            strip_trailing_commas(r#"{"a": [1, 2,], "b": "x,}",}"#),
            r#"{"a": [1, 2], "b": "x,}"}"#
        );
    }

    #[test]
    fn functional_parse_model_object_recovers_fenced_chatty_output() {
        let raw = "```json\nHere you go: {\"task_key\": \"X-1\", \"subtasks\": [{\"content\": \"draft memo\"},],}\n```";
        let object = parse_model_object(raw).expect("object should parse");
        let subtasks = required_list(&object, "subtasks").expect("subtasks list");
        assert_eq!(subtasks.len(), 1);
        assert_eq!(object["task_key"], "X-1");
    }

    #[test]
    fn regression_parse_model_object_reports_missing_list_and_garbage() {
        let object = parse_model_object(r#"{"subtasks": "none"}"#).expect("object");
        assert!(matches!(
            required_list(&object, "subtasks"),
            Err(ModelOutputError::MissingList("subtasks"))
        ));
        assert!(matches!(
            parse_model_object("I cannot help with that."),
            Err(ModelOutputError::NoJsonObject)
        ));
        assert!(matches!(
            parse_model_object("{\"subtasks\": [nope]}"),
            Err(ModelOutputError::InvalidJson(_))
        ));
    }
}
