//! Fenced-Python strategy: every ```python block becomes a call to the
//! built-in code-execution tool with the block body as the `code`
//! argument.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use crate::model::ToolCall;

static PYTHON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```\s*python\s*\n(.*?)```").expect("valid regex"));

pub(super) fn parse(text: &str) -> Vec<ToolCall> {
    PYTHON_FENCE
        .captures_iter(text)
        .map(|capture| {
            let code = capture.get(1).expect("group 1").as_str().trim();
            ToolCall::new("builtin.execute_python_code", json!({ "code": code }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_block_is_one_call() {
        let text = "```python\nprint(1)\n```\ntext\n```python\nprint(2)\n```";
        let calls = parse(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].arguments["code"], "print(1)");
        assert_eq!(calls[1].arguments["code"], "print(2)");
    }

    #[test]
    fn other_fences_do_not_match() {
        assert!(parse("```bash\nls\n```").is_empty());
    }
}
