//! Tool-call extraction from free-form model text.
//!
//! Runs only when the stream produced no structured tool-call events.
//! Four strategies applied in fixed order, most specific first; the
//! union of their results is returned:
//!
//! 1. Dotted-tag XML: `<server.op><arg>value</arg></server.op>`
//! 2. Fenced JSON blocks, with embedded-object and full-text fallbacks
//! 3. Fenced Python blocks → `builtin.execute_python_code`
//! 4. Generic `<tool_request>{json}</tool_request>` blocks
//!
//! Dotted-tag matches are excised from the text before the JSON scan so
//! the same call is never counted twice. Parsing is pure: the same text
//! always yields the same calls.

mod dotted;
mod json_blocks;
mod python;
mod tool_request;

use crate::model::ToolCall;

pub use json_blocks::convert_json_call;

/// The composite parser. Stateless; strategies are ordered sub-parsers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolCallParser;

impl ToolCallParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, text: &str) -> Vec<ToolCall> {
        let mut calls = Vec::new();

        let (dotted_calls, text_without_dotted) = dotted::parse(text);
        calls.extend(dotted_calls);

        calls.extend(json_blocks::parse(&text_without_dotted));
        calls.extend(python::parse(text));
        calls.extend(tool_request::parse(text));

        calls
    }
}

/// Strip special chat-template tokens before scanning.
pub(crate) fn strip_template_tokens(text: &str) -> String {
    text.replace("<|im_start|>", "").replace("<|im_end|>", "")
}

/// Lexical value coercion for XML-style argument text: JSON when valid,
/// otherwise boolean/null/number by form, else string.
pub(crate) fn coerce_value(raw: &str) -> serde_json::Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return serde_json::Value::String(String::new());
    }

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(value) = serde_json::from_str(trimmed) {
            return value;
        }
    }

    match trimmed.to_ascii_lowercase().as_str() {
        "true" => return serde_json::Value::Bool(true),
        "false" => return serde_json::Value::Bool(false),
        "null" => return serde_json::Value::Null,
        _ => {}
    }

    if !trimmed.contains('.') {
        if let Ok(n) = trimmed.parse::<i64>() {
            return serde_json::Value::from(n);
        }
    } else if let Ok(f) = trimmed.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return serde_json::Value::Number(n);
        }
    }

    serde_json::Value::String(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_dotted_tag_call() {
        let text = r#"I'll list the files now.
<nextcloud.list_files>
  <path>/reports</path>
  <recursive>true</recursive>
</nextcloud.list_files>"#;

        let calls = ToolCallParser::new().parse(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "nextcloud.list_files");
        assert_eq!(calls[0].arguments["path"], "/reports");
        assert_eq!(calls[0].arguments["recursive"], true);
    }

    #[test]
    fn parses_fenced_json_call() {
        let text = "```json\n{\"name\": \"builtin.read_file\", \"arguments\": {\"path\": \"a.txt\"}}\n```";
        let calls = ToolCallParser::new().parse(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "builtin.read_file");
        assert_eq!(calls[0].arguments, json!({"path": "a.txt"}));
    }

    #[test]
    fn parses_python_block_as_code_execution() {
        let text = "Running a quick check:\n```python\nprint(1 + 1)\n```";
        let calls = ToolCallParser::new().parse(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "builtin.execute_python_code");
        assert_eq!(calls[0].arguments["code"], "print(1 + 1)");
    }

    #[test]
    fn parses_tool_request_block() {
        let text = r#"<tool_request>{"function": {"name": "builtin.file_exists", "arguments": {"path": "x"}}}</tool_request>"#;
        let calls = ToolCallParser::new().parse(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "builtin.file_exists");
    }

    #[test]
    fn dotted_call_is_not_double_counted_by_json_scan() {
        let text = r#"<pdf.lookup>
  <args>{"file_name": "a.pdf"}</args>
</pdf.lookup>"#;
        let calls = ToolCallParser::new().parse(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "pdf.lookup");
    }

    #[test]
    fn parsing_is_idempotent() {
        let text = r#"Some prose. {"name": "builtin.list_files", "arguments": {"path": "."}}
```python
print("x")
```"#;
        let parser = ToolCallParser::new();
        let first = parser.parse(text);
        let second = parser.parse(text);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn plain_prose_yields_nothing() {
        let calls = ToolCallParser::new().parse("The file contains 40 lines in total.");
        assert!(calls.is_empty());
    }

    #[test]
    fn coerce_value_by_lexical_form() {
        assert_eq!(coerce_value("true"), json!(true));
        assert_eq!(coerce_value("17"), json!(17));
        assert_eq!(coerce_value("2.5"), json!(2.5));
        assert_eq!(coerce_value("null"), json!(null));
        assert_eq!(coerce_value(r#"{"a": 1}"#), json!({"a": 1}));
        assert_eq!(coerce_value("plain text"), json!("plain text"));
    }
}
