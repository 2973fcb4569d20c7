//! Generic XML strategy: `<tool_request>{json}</tool_request>` blocks.
//! Blocks that are not valid JSON are ignored.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::model::ToolCall;

use super::json_blocks::convert_json_call;

static TOOL_REQUEST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<tool_request>(.*?)</tool_request>").expect("valid regex"));

pub(super) fn parse(text: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();

    for capture in TOOL_REQUEST.captures_iter(text) {
        let body = capture.get(1).expect("group 1").as_str().trim();
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Array(items)) => {
                calls.extend(items.iter().filter_map(convert_json_call));
            }
            Ok(value) => calls.extend(convert_json_call(&value)),
            Err(_) => continue,
        }
    }

    calls
}
