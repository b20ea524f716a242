//! Tool-call directives embedded in model output.
//!
//! The model asks for an action by writing a block like
//!
//! ```text
//! <tool_call>
//! <name>read_file</name>
//! <arguments>{"path": "/tmp/notes.md"}</arguments>
//! </tool_call>
//! ```
//!
//! A block holds exactly one `name` and one `arguments` element, in either
//! order, separated only by whitespace. The arguments are a JSON object read
//! with a real JSON parser, so braces or closing tags inside string values
//! are harmless. Anything that does not fit this shape is ignored.

use tracing::debug;

const OPEN: &str = "<tool_call>";
const CLOSE: &str = "</tool_call>";
const NAME_OPEN: &str = "<name>";
const NAME_CLOSE: &str = "</name>";
const ARGS_OPEN: &str = "<arguments>";
const ARGS_CLOSE: &str = "</arguments>";

/// One action requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallDirective {
    pub name: String,
    /// Always a JSON object
    pub arguments: serde_json::Value,
    /// The arguments exactly as the model wrote them
    pub raw_arguments: String,
}

/// A completed model output, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    /// No well-formed directive; carries the text with directive markup stripped.
    Text(String),
    /// Directives in textual order.
    ToolCalls(Vec<ToolCallDirective>),
}

/// Classify a completed model output.
pub fn parse(output: &str) -> ModelOutput {
    let calls = parse_directives(output);
    if calls.is_empty() {
        ModelOutput::Text(strip_directives(output))
    } else {
        ModelOutput::ToolCalls(calls)
    }
}

/// Every well-formed directive in `output`, in order.
pub fn parse_directives(output: &str) -> Vec<ToolCallDirective> {
    let mut calls = Vec::new();
    let mut cursor = 0;

    while let Some(found) = output[cursor..].find(OPEN) {
        let start = cursor + found;
        let body_start = start + OPEN.len();
        match parse_block(&output[body_start..]) {
            Ok((directive, consumed)) => {
                calls.push(directive);
                cursor = body_start + consumed;
            }
            Err(reason) => {
                debug!(offset = start, reason, "Ignoring malformed tool_call block");
                cursor = body_start;
            }
        }
    }
    calls
}

/// Parse the inside of a block (after `<tool_call>`), returning the directive
/// and the bytes consumed through `</tool_call>`.
fn parse_block(input: &str) -> Result<(ToolCallDirective, usize), &'static str> {
    let mut pos = 0;
    let mut name = None;
    let mut arguments = None;

    for _ in 0..2 {
        pos = skip_ws(input, pos);
        let rest = &input[pos..];
        if rest.starts_with(NAME_OPEN) {
            if name.is_some() {
                return Err("duplicate name element");
            }
            let (value, used) = parse_name(&rest[NAME_OPEN.len()..])?;
            name = Some(value);
            pos += NAME_OPEN.len() + used;
        } else if rest.starts_with(ARGS_OPEN) {
            if arguments.is_some() {
                return Err("duplicate arguments element");
            }
            let (value, raw, used) = parse_arguments(&rest[ARGS_OPEN.len()..])?;
            arguments = Some((value, raw));
            pos += ARGS_OPEN.len() + used;
        } else {
            return Err("expected <name> or <arguments>");
        }
    }

    pos = skip_ws(input, pos);
    if !input[pos..].starts_with(CLOSE) {
        return Err("missing </tool_call>");
    }
    pos += CLOSE.len();

    match (name, arguments) {
        (Some(name), Some((arguments, raw_arguments))) => Ok((
            ToolCallDirective {
                name,
                arguments,
                raw_arguments,
            },
            pos,
        )),
        _ => Err("block needs one name and one arguments element"),
    }
}

fn parse_name(input: &str) -> Result<(String, usize), &'static str> {
    let end = input.find(NAME_CLOSE).ok_or("unterminated <name>")?;
    let name = input[..end].trim();
    if name.is_empty() || name.contains(['<', '>']) || name.contains(char::is_whitespace) {
        return Err("invalid tool name");
    }
    Ok((name.to_string(), end + NAME_CLOSE.len()))
}

fn parse_arguments(input: &str) -> Result<(serde_json::Value, String, usize), &'static str> {
    let start = skip_ws(input, 0);
    let mut stream =
        serde_json::Deserializer::from_str(&input[start..]).into_iter::<serde_json::Value>();
    let value = match stream.next() {
        Some(Ok(value)) => value,
        _ => return Err("arguments are not valid JSON"),
    };
    if !value.is_object() {
        return Err("arguments must be a JSON object");
    }
    let json_end = start + stream.byte_offset();
    let raw = input[start..json_end].to_string();

    let close = skip_ws(input, json_end);
    if !input[close..].starts_with(ARGS_CLOSE) {
        return Err("missing </arguments>");
    }
    Ok((value, raw, close + ARGS_CLOSE.len()))
}

fn skip_ws(input: &str, pos: usize) -> usize {
    pos + (input[pos..].len() - input[pos..].trim_start().len())
}

/// Remove directive markup from `text`.
///
/// Drops every `<tool_call>…</tool_call>` span and any unterminated trailing
/// `<tool_call>`, then trims. Repeats until nothing changes, so applying it
/// twice gives the same result as applying it once.
pub fn strip_directives(text: &str) -> String {
    let mut current = text.trim().to_string();
    loop {
        let next = strip_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn strip_once(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        match rest[start..].find(CLOSE) {
            Some(end) => rest = &rest[start + end + CLOSE.len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_single_directive() {
        let out = r#"<tool_call><name>read_file</name><arguments>{"path":"/x"}</arguments></tool_call>"#;
        let ModelOutput::ToolCalls(calls) = parse(out) else {
            panic!("expected tool calls");
        };
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].arguments, json!({"path": "/x"}));
        assert_eq!(calls[0].raw_arguments, r#"{"path":"/x"}"#);
    }

    #[test]
    fn parses_multiline_and_reversed_order() {
        let out = "Let me look.\n<tool_call>\n  <arguments>\n{\"path\": \"a\"}\n  </arguments>\n  <name> list_directory </name>\n</tool_call>\ntrailing";
        let calls = parse_directives(out);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "list_directory");
        assert_eq!(calls[0].arguments["path"], "a");
    }

    #[test]
    fn nested_braces_and_tags_inside_strings() {
        let out = r#"<tool_call><name>write_file</name><arguments>{"path":"x.rs","content":"fn f() { if a { } } </arguments> </tool_call>"}</arguments></tool_call>"#;
        let calls = parse_directives(out);
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].arguments["content"],
            "fn f() { if a { } } </arguments> </tool_call>"
        );
    }

    #[test]
    fn multiple_directives_in_order() {
        let out = concat!(
            r#"<tool_call><name>a</name><arguments>{}</arguments></tool_call>"#,
            " then ",
            r#"<tool_call><name>b</name><arguments>{"n":1}</arguments></tool_call>"#
        );
        let names: Vec<String> = parse_directives(out).into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn malformed_blocks_are_ignored() {
        for bad in [
            r#"<tool_call><name>a</name></tool_call>"#,
            r#"<tool_call><arguments>{}</arguments></tool_call>"#,
            r#"<tool_call><name>a</name><arguments>[1,2]</arguments></tool_call>"#,
            r#"<tool_call><name>a</name><arguments>{"x":</arguments></tool_call>"#,
            r#"<tool_call><name>a</name><name>b</name><arguments>{}</arguments></tool_call>"#,
            r#"<tool_call><name>a b</name><arguments>{}</arguments></tool_call>"#,
            r#"<tool_call><name>a</name><arguments>{}</arguments>"#,
        ] {
            assert!(parse_directives(bad).is_empty(), "accepted: {bad}");
        }
    }

    #[test]
    fn malformed_block_does_not_hide_a_later_one() {
        let out = concat!(
            r#"<tool_call><name>broken</name></tool_call>"#,
            r#"<tool_call><name>ok</name><arguments>{}</arguments></tool_call>"#
        );
        let calls = parse_directives(out);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "ok");
    }

    #[test]
    fn plain_text_is_text() {
        assert_eq!(parse("  The answer is 4.  "), ModelOutput::Text("The answer is 4.".into()));
    }

    #[test]
    fn strip_removes_blocks_and_trailing_fragment() {
        let text = "Before <tool_call><name>x</name></tool_call> middle <tool_call><name>y";
        assert_eq!(strip_directives(text), "Before  middle");
    }

    #[test]
    fn strip_is_idempotent() {
        for text in [
            "plain",
            "  padded  ",
            "<tool_call>a</tool_call>",
            "x <tool<tool_call>z</tool_call>_call> y",
            "a <tool_call>never closed",
            "</tool_call> stray close",
        ] {
            let once = strip_directives(text);
            assert_eq!(strip_directives(&once), once, "input: {text}");
            assert!(!once.contains(OPEN));
        }
    }
}
