//! Tool schema adapter
//!
//! Converts tool descriptors into the function-calling definitions the
//! completion endpoint expects.

use serde_json::{json, Value};
use std::collections::HashSet;

use crate::core::{ToolDefinition, ToolDescriptor};

/// Name of the local command tool
pub const LOCAL_SHELL_TOOL: &str = "run_local_shell_command";

/// Fixed definition of the local command tool
pub fn local_shell_definition() -> ToolDefinition {
    ToolDefinition::function(
        LOCAL_SHELL_TOOL,
        "Run a shell command on the local machine and return its exit code, stdout and stderr",
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command to execute"
                },
                "cwd": {
                    "type": "string",
                    "description": "Working directory, relative to the workspace root"
                },
                "timeout_seconds": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 900,
                    "description": "Kill the command after this many seconds"
                },
                "max_output_chars": {
                    "type": "integer",
                    "minimum": 256,
                    "maximum": 200000,
                    "description": "Maximum characters kept per output stream"
                }
            },
            "required": ["command"]
        }),
    )
}

/// Convert a single descriptor. Non-object schemas become an empty object schema.
pub fn to_tool_definition(descriptor: &ToolDescriptor) -> ToolDefinition {
    let parameters = match &descriptor.input_schema {
        schema @ Value::Object(_) => schema.clone(),
        _ => json!({"type": "object", "properties": {}}),
    };
    ToolDefinition::function(&descriptor.name, &descriptor.description, parameters)
}

/// Convert descriptors in listing order, skipping excluded names
pub fn to_tool_definitions<S: AsRef<str>>(
    descriptors: &[ToolDescriptor],
    excluded: &[S],
) -> Vec<ToolDefinition> {
    let excluded: HashSet<&str> = excluded.iter().map(|s| s.as_ref()).collect();
    descriptors
        .iter()
        .filter(|d| !excluded.contains(d.name.as_str()))
        .map(to_tool_definition)
        .collect()
}
