//! Prompt assembly for the conversation engine.

use kiln_core::{Message, ToolError, ToolSpec};
use kiln_knowledge::SearchHit;
use std::fmt::Write;
use std::path::Path;

/// System prompt for tool-enabled turns: persona, tool catalogue, and the
/// rules for the `<tool_call>` output format.
pub fn tool_system_prompt(persona: &str, specs: &[ToolSpec], working_dir: Option<&Path>) -> String {
    let mut catalogue = String::new();
    for spec in specs {
        let _ = write!(catalogue, "\n- {}: {}", spec.name, spec.description);
        let required: Vec<&str> = spec.required_parameters().map(|p| p.name.as_str()).collect();
        if !required.is_empty() {
            let _ = write!(catalogue, " (required params: {})", required.join(", "));
        }
    }
    if catalogue.is_empty() {
        catalogue.push_str("\n(none)");
    }

    let (dir_rule, example_dir) = match working_dir {
        Some(dir) => (
            format!(
                "4. Current working directory: {0}\n5. Resolve relative paths against {0}",
                dir.display()
            ),
            dir.display().to_string(),
        ),
        None => (
            "4. Use absolute paths".to_string(),
            "/path/to/project".to_string(),
        ),
    };

    format!(
        r#"{persona}

=== CRITICAL TOOL CALLING RULES ===
You have access to these tools:{catalogue}

When you need to use a tool, output exactly this XML format:
<tool_call>
<name>tool_name</name>
<arguments>{{"param1": "value1"}}</arguments>
</tool_call>

RULES:
1. If the user asks about a file, call read_file or list_directory first
2. Output ONLY the tool call XML, nothing before or after it
3. After tool results arrive, give your final answer without tool calls
{dir_rule}

EXAMPLES:
User: "What's in README.md?"
You: <tool_call>
<name>read_file</name>
<arguments>{{"path": "{example_dir}/README.md"}}</arguments>
</tool_call>

User: "List files"
You: <tool_call>
<name>list_directory</name>
<arguments>{{"path": "{example_dir}"}}</arguments>
</tool_call>"#
    )
}

/// Context suffix appended to the user message. Empty when nothing was
/// retrieved.
pub fn format_context(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n\nRelevant context from your knowledge base:\n");
    for (i, hit) in hits.iter().enumerate() {
        let _ = write!(out, "\n[{}] {}\n", i + 1, hit.document.content);
    }
    out
}

/// Tool message carrying one directive's outcome back to the model.
pub fn tool_result_message(name: &str, result: &Result<String, ToolError>) -> Message {
    let content = match result {
        Ok(output) => format!("Tool '{name}' result:\n{output}"),
        Err(e) => format!("Tool '{name}' error: {e}"),
    };
    Message::tool_result(content)
}
