//! Shared types used across toolrelay modules
//!
//! Contains message structures, tool call requests, tool descriptors and the
//! function-calling definitions sent to completion endpoints.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: Role,
    /// Content of the message
    pub content: String,
    /// Tool calls requested by the assistant, in emitted order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    /// For tool messages: id of the request this message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For tool messages: name of the tool that produced the content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    /// Create an assistant message carrying tool call requests
    pub fn assistant_with_tools(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls: if calls.is_empty() { None } else { Some(calls) },
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// Create a tool result message answering `tool_call_id`
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            ..Self::plain(Role::Tool, content)
        }
    }

    /// Tool call requests of this message (empty for non-assistant messages)
    pub fn requests(&self) -> &[ToolCallRequest] {
        self.tool_calls.as_deref().unwrap_or(&[])
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Identifier echoed back in the tool result message
    pub id: String,
    /// Name of the tool to invoke
    pub name: String,
    /// Raw argument payload, expected to be a JSON object
    pub arguments: String,
}

impl ToolCallRequest {
    /// Create a new tool call request
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parsed arguments; anything that is not a JSON object becomes an empty object
    pub fn parsed_arguments(&self) -> Map<String, Value> {
        parse_arguments(&self.arguments)
    }
}

/// Parse a raw argument payload into a JSON object.
///
/// Never fails: invalid JSON, `null`, arrays and scalars all yield an empty map.
pub fn parse_arguments(raw: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// A tool advertised by a provider (the MCP gateway or the local shell)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique name within a listing
    pub name: String,
    /// Human description
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the arguments
    #[serde(rename = "inputSchema", alias = "input_schema", default)]
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Definition of a tool that can be called by the LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Type of tool (always "function" for now)
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function details
    pub function: FunctionDefinition,
}

/// Function definition within a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Name of the function
    pub name: String,
    /// Description of what the function does
    pub description: String,
    /// JSON Schema for the parameters
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a new function tool definition
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    /// Name of the underlying function
    pub fn name(&self) -> &str {
        &self.function.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_arguments_object() {
        let args = parse_arguments(r#"{"path": "."}"#);
        assert_eq!(args.get("path"), Some(&json!(".")));
    }

    #[test]
    fn test_parse_arguments_never_fails() {
        for raw in ["", "not json", "null", "[1,2]", "42", "\"text\"", "{broken"] {
            assert!(parse_arguments(raw).is_empty(), "payload {raw:?}");
        }
    }

    #[test]
    fn test_tool_result_message() {
        let msg = Message::tool_result("call_1", "list_files", "a\nb");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.name.as_deref(), Some("list_files"));
    }

    #[test]
    fn test_assistant_without_calls_has_none() {
        let msg = Message::assistant_with_tools("done", Vec::new());
        assert!(msg.tool_calls.is_none());
        assert!(msg.requests().is_empty());
    }

    #[test]
    fn test_descriptor_accepts_camel_case_schema() {
        let desc: ToolDescriptor = serde_json::from_value(json!({
            "name": "list_files",
            "description": "List files",
            "inputSchema": {"type": "object"}
        }))
        .unwrap();
        assert_eq!(desc.input_schema, json!({"type": "object"}));
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_value(Role::Tool).unwrap(), json!("tool"));
    }
}
