//! Fenced-JSON strategy, with embedded-object and full-text fallbacks.
//!
//! Accepts a single object, an array, or an object wrapping a
//! `tool_calls` array. Recognizes the name aliases `name`/`function_name`,
//! the argument aliases `arguments`/`parameters`/`function_args`, both
//! flat and nested under `function`, and the `tool_request` wrapper.
//!
//! When no fenced block yields a call, the text is scanned for embedded
//! objects by brace balance; spans already claimed by an earlier match
//! are skipped so no object is parsed twice. As a last resort the whole
//! text is parsed as one JSON document.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::model::ToolCall;

use super::strip_template_tokens;

static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```\s*json\s*\n(.*?)```").expect("valid regex"));

static TOOL_REQUEST_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<tool_request>.*?</tool_request>").expect("valid regex"));

pub(super) fn parse(text: &str) -> Vec<ToolCall> {
    let mut candidates = parse_fenced_blocks(text);

    if candidates.is_empty() {
        candidates = parse_embedded_objects(text);
    }

    if candidates.is_empty() {
        candidates = parse_full_text(text);
    }

    candidates
        .into_iter()
        .filter_map(|value| convert_json_call(&value))
        .collect()
}

fn parse_fenced_blocks(text: &str) -> Vec<Value> {
    let mut out = Vec::new();
    for capture in JSON_FENCE.captures_iter(text) {
        let block = capture.get(1).expect("group 1").as_str();
        match serde_json::from_str::<Value>(block) {
            Ok(Value::Array(items)) => out.extend(items),
            Ok(value) => out.push(value),
            Err(_) => continue,
        }
    }
    out
}

/// Scan all brace openings, tracking balance; skip spans claimed by an
/// earlier match so the same object never produces two calls.
fn parse_embedded_objects(text: &str) -> Vec<Value> {
    let cleaned = strip_template_tokens(text);
    let cleaned = TOOL_REQUEST_BLOCK.replace_all(&cleaned, "");

    let bytes = cleaned.as_bytes();
    let mut claimed: Vec<(usize, usize)> = Vec::new();
    let mut out = Vec::new();

    for start in 0..bytes.len() {
        if bytes[start] != b'{' {
            continue;
        }
        if claimed.iter().any(|&(s, e)| s <= start && start <= e) {
            continue;
        }

        let mut balance = 1i32;
        for end in start + 1..bytes.len() {
            match bytes[end] {
                b'{' => balance += 1,
                b'}' => balance -= 1,
                _ => {}
            }
            if balance == 0 {
                if let Ok(Value::Object(obj)) =
                    serde_json::from_slice::<Value>(&bytes[start..=end])
                {
                    let value = Value::Object(obj);
                    if looks_like_tool_call(&value) {
                        out.push(value);
                        claimed.push((start, end));
                    }
                }
                break;
            }
        }
    }

    out
}

fn parse_full_text(text: &str) -> Vec<Value> {
    let mut body = text.trim();
    if let Some(stripped) = body.strip_prefix("```json") {
        body = stripped.strip_suffix("```").unwrap_or(stripped).trim();
    }

    match serde_json::from_str::<Value>(body) {
        Ok(Value::Array(items)) => items,
        Ok(Value::Object(obj)) => {
            if let Some(Value::Array(calls)) = obj.get("tool_calls") {
                calls.clone()
            } else {
                vec![Value::Object(obj)]
            }
        }
        _ => Vec::new(),
    }
}

fn looks_like_tool_call(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };

    if obj.get("tool_request").is_some_and(Value::is_object) {
        return true;
    }

    let has_name =
        obj.contains_key("name") || obj.contains_key("function_name") || obj.contains_key("function");
    let has_args = obj.contains_key("arguments")
        || obj.contains_key("function_args")
        || obj.contains_key("parameters");
    has_name && has_args
}

/// Convert one JSON object into the canonical call shape, resolving the
/// wrapper and alias forms. Both a name and an argument object (possibly
/// empty) are required.
pub fn convert_json_call(value: &Value) -> Option<ToolCall> {
    let obj = value.as_object()?;

    if let Some(inner) = obj.get("tool_request").and_then(Value::as_object) {
        return extract_name_and_args(inner);
    }

    if let Some(function) = obj.get("function").and_then(Value::as_object) {
        if let Some(call) = extract_name_and_args(function) {
            return Some(call);
        }
    }

    extract_name_and_args(obj)
}

fn extract_name_and_args(obj: &serde_json::Map<String, Value>) -> Option<ToolCall> {
    let name = obj
        .get("name")
        .or_else(|| obj.get("function_name"))
        .and_then(Value::as_str)?;

    let args = obj
        .get("arguments")
        .or_else(|| obj.get("parameters"))
        .or_else(|| obj.get("function_args"))?;

    Some(ToolCall::new(name, args.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fenced_array_yields_multiple_calls() {
        let text = "```json\n[{\"name\": \"a.x\", \"arguments\": {}}, {\"name\": \"b.y\", \"parameters\": {\"k\": 1}}]\n```";
        let calls = parse(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].arguments, json!({"k": 1}));
    }

    #[test]
    fn alias_forms_resolve() {
        for body in [
            r#"{"function_name": "a.x", "function_args": {"k": 1}}"#,
            r#"{"function": {"name": "a.x", "arguments": {"k": 1}}}"#,
            r#"{"tool_request": {"name": "a.x", "parameters": {"k": 1}}}"#,
        ] {
            let call = convert_json_call(&serde_json::from_str(body).unwrap()).unwrap();
            assert_eq!(call.name, "a.x");
            assert_eq!(call.arguments, json!({"k": 1}));
        }
    }

    #[test]
    fn name_without_args_is_rejected() {
        let value = json!({"name": "a.x"});
        assert!(convert_json_call(&value).is_none());
    }

    #[test]
    fn embedded_object_found_in_prose() {
        let text = r#"I'll call the tool: {"name": "builtin.read_file", "arguments": {"path": "a"}} and report back."#;
        let calls = parse(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "builtin.read_file");
    }

    #[test]
    fn nested_braces_claimed_once() {
        let text = r#"{"name": "a.x", "arguments": {"inner": {"deep": 1}}}"#;
        let calls = parse(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, json!({"inner": {"deep": 1}}));
    }

    #[test]
    fn template_tokens_are_stripped_before_scanning() {
        let text = "<|im_start|>{\"name\": \"a.x\", \"arguments\": {}}<|im_end|>";
        let calls = parse(text);
        assert_eq!(calls.len(), 1);
    }

    #[test]
    fn full_text_tool_calls_wrapper() {
        let text = r#"{"tool_calls": [{"name": "a.x", "arguments": {}}]}"#;
        let calls = parse(text);
        assert_eq!(calls.len(), 1);
    }

    #[test]
    fn non_tool_objects_are_ignored() {
        let calls = parse(r#"The config is {"debug": true, "level": 3} as shown."#);
        assert!(calls.is_empty());
    }
}
