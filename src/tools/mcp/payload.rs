//! JSON-RPC payload handling for the MCP gateway
//!
//! Gateway responses arrive either as a plain JSON body or as a
//! `text/event-stream` body whose `data:` lines carry JSON-RPC messages.

use serde_json::Value;

use crate::core::error::excerpt;
use crate::core::{RelayError, Result};
use crate::llm::sse::parse_sse_body;

/// Prefix put in front of results the tool itself flagged as failed
pub const TOOL_ERROR_PREFIX: &str = "Tool reported an error:";

/// Length of body excerpts quoted in protocol errors
pub(crate) const EXCERPT_CHARS: usize = 300;

/// Extract the JSON-RPC envelope from a response body.
///
/// For event streams the last `data:` payload that parses as JSON wins.
pub async fn parse_rpc_payload(body: &str) -> Result<Value> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(RelayError::protocol("empty response body"));
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    parse_sse_body(body)
        .await
        .iter()
        .rev()
        .find_map(|frame| serde_json::from_str::<Value>(frame.data.trim()).ok())
        .ok_or_else(|| {
            RelayError::protocol(format!(
                "response is neither JSON nor an event stream carrying JSON: {}",
                excerpt(trimmed, EXCERPT_CHARS)
            ))
        })
}

/// Unwrap a JSON-RPC envelope into its `result`, turning an `error` member into an error
pub fn into_result(envelope: Value) -> Result<Value> {
    if let Some(error) = envelope.get("error").filter(|e| !e.is_null()) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(RelayError::protocol(message));
    }

    match envelope {
        Value::Object(mut map) => Ok(map.remove("result").unwrap_or(Value::Null)),
        other => Err(RelayError::protocol(format!(
            "expected a JSON-RPC object, got {}",
            excerpt(&other.to_string(), EXCERPT_CHARS)
        ))),
    }
}

/// Content of a `tools/call` result
#[derive(Debug, Clone, PartialEq)]
pub enum McpToolOutput {
    /// `structuredContent`
    Structured(Value),
    /// Joined `text` content blocks
    Text(String),
    /// Anything else, kept verbatim
    Raw(Value),
}

/// A decoded `tools/call` result
#[derive(Debug, Clone, PartialEq)]
pub struct CallToolResult {
    pub output: McpToolOutput,
    /// The tool flagged its own failure (`isError`)
    pub is_error: bool,
}

impl CallToolResult {
    pub fn from_result(result: Value) -> Self {
        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let output = if let Some(structured) = result
            .get("structuredContent")
            .filter(|v| !v.is_null())
        {
            McpToolOutput::Structured(structured.clone())
        } else if let Some(text) = text_blocks(&result) {
            McpToolOutput::Text(text)
        } else {
            McpToolOutput::Raw(result)
        };

        Self { output, is_error }
    }

    /// Text handed back to the model
    pub fn to_text(&self) -> String {
        let body = match &self.output {
            McpToolOutput::Text(text) => text.clone(),
            McpToolOutput::Structured(value) | McpToolOutput::Raw(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
        };
        if self.is_error {
            format!("{} {}", TOOL_ERROR_PREFIX, body)
        } else {
            body
        }
    }
}

fn text_blocks(result: &Value) -> Option<String> {
    let blocks = result.get("content")?.as_array()?;
    let texts: Vec<&str> = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str).unwrap_or("text") == "text")
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect();
    (!texts.is_empty()).then(|| texts.join("\n"))
}
