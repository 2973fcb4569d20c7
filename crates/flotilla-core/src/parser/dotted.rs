//! Dotted-tag XML strategy.
//!
//! Matches `<server.op>...</server.op>` where the tag name contains a
//! dot; that requirement is what distinguishes these from generic XML
//! tags. Arguments are child elements whose text is coerced by lexical
//! form. Returns the parsed calls plus the input with every matched
//! block excised, so later strategies never re-scan the same span.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::model::ToolCall;

use super::coerce_value;

static OPEN_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<([A-Za-z0-9_]+\.[A-Za-z0-9_]+)>").expect("valid regex"));

static ARG_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<([A-Za-z0-9_]+)>").expect("valid regex"));

pub(super) fn parse(text: &str) -> (Vec<ToolCall>, String) {
    let mut calls = Vec::new();
    let mut remaining = String::with_capacity(text.len());
    let mut cursor = 0;

    while let Some(open) = OPEN_TAG.captures_at(text, cursor) {
        let whole = open.get(0).expect("match 0");
        let name = open.get(1).expect("group 1").as_str();
        let close_tag = format!("</{name}>");

        let body_start = whole.end();
        let Some(rel_close) = text[body_start..].find(&close_tag) else {
            // Unterminated tag: keep scanning past it.
            remaining.push_str(&text[cursor..whole.end()]);
            cursor = whole.end();
            continue;
        };

        let body = &text[body_start..body_start + rel_close];
        calls.push(ToolCall::new(name, parse_arguments(body)));

        remaining.push_str(&text[cursor..whole.start()]);
        cursor = body_start + rel_close + close_tag.len();
    }

    remaining.push_str(&text[cursor..]);
    (calls, remaining)
}

/// Child `<key>value</key>` pairs, with lexical value coercion.
fn parse_arguments(body: &str) -> Value {
    let mut args = Map::new();
    let mut cursor = 0;

    while let Some(open) = ARG_TAG.captures_at(body, cursor) {
        let whole = open.get(0).expect("match 0");
        let key = open.get(1).expect("group 1").as_str();
        let close_tag = format!("</{key}>");

        let value_start = whole.end();
        let Some(rel_close) = body[value_start..].find(&close_tag) else {
            cursor = whole.end();
            continue;
        };

        let raw = &body[value_start..value_start + rel_close];
        args.insert(key.to_string(), coerce_value(raw));
        cursor = value_start + rel_close + close_tag.len();
    }

    Value::Object(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_call_and_excises_span() {
        let text = "before <srv.op>\n<path>/a</path>\n<limit>3</limit>\n</srv.op> after";
        let (calls, rest) = parse(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "srv.op");
        assert_eq!(calls[0].arguments, json!({"path": "/a", "limit": 3}));
        assert_eq!(rest, "before  after");
    }

    #[test]
    fn undotted_tags_are_ignored() {
        let (calls, rest) = parse("<note>just markup</note>");
        assert!(calls.is_empty());
        assert_eq!(rest, "<note>just markup</note>");
    }

    #[test]
    fn json_argument_values_pass_through() {
        let text = r#"<pdf.batch><files>["a.pdf", "b.pdf"]</files></pdf.batch>"#;
        let (calls, _) = parse(text);
        assert_eq!(calls[0].arguments["files"], json!(["a.pdf", "b.pdf"]));
    }

    #[test]
    fn multiple_calls_in_one_response() {
        let text = "<a.x><k>1</k></a.x>\n<b.y><k>2</k></b.y>";
        let (calls, _) = parse(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "a.x");
        assert_eq!(calls[1].name, "b.y");
    }

    #[test]
    fn unterminated_tag_does_not_loop() {
        let (calls, rest) = parse("<srv.op><path>/a</path>");
        assert!(calls.is_empty());
        assert_eq!(rest, "<srv.op><path>/a</path>");
    }
}
