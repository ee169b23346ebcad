//! Completion provider trait
//!
//! Abstracts the chat completion endpoint so the orchestration loop can run
//! against a real server or a scripted stand-in.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::core::{Message, Result, ToolCallRequest, ToolDefinition};

/// Response from one completion round
#[derive(Debug, Clone)]
pub struct Completion {
    /// Assistant text; falls back to a pretty-printed raw response when the model sent none
    pub text: String,
    /// The assistant message as the model sent it (content plus tool calls)
    pub message: Message,
    /// Tool calls the model wants to make, in emitted order
    pub tool_calls: Vec<ToolCallRequest>,
    /// Token usage information
    pub usage: Option<TokenUsage>,
    /// Model that generated the response
    pub model: String,
}

/// Token usage information
#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Event names that mark the end of a native stream
pub const TERMINAL_EVENTS: [&str; 4] = ["done", "chat.end", "response.completed", "response.done"];

/// How a native stream event is classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEventKind {
    /// `reasoning.*` events; never part of the assistant text
    Reasoning,
    /// End-of-stream markers
    Terminal,
    /// Everything else
    Content,
}

impl StreamEventKind {
    /// Classify an event by its name
    pub fn classify(name: &str) -> Self {
        if name.starts_with("reasoning.") {
            StreamEventKind::Reasoning
        } else if TERMINAL_EVENTS.contains(&name) {
            StreamEventKind::Terminal
        } else {
            StreamEventKind::Content
        }
    }
}

/// One decoded event from the native streaming endpoint
#[derive(Debug, Clone, Serialize)]
pub struct StreamEvent {
    /// Event name (`event:` line, payload `type`, or `message`)
    pub name: String,
    /// Classification derived from the name
    pub kind: StreamEventKind,
    /// Parsed payload; a JSON string when the data was not JSON
    pub data: Value,
    /// Incremental text carried by this event, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
}

impl StreamEvent {
    /// The synthetic event emitted for a `[DONE]` frame
    pub fn done() -> Self {
        Self {
            name: "done".to_string(),
            kind: StreamEventKind::Terminal,
            data: Value::Null,
            delta: None,
        }
    }
}

/// Result of a native streaming request
#[derive(Debug, Clone, Default)]
pub struct StreamOutcome {
    /// Trimmed concatenation of all text deltas
    pub text: String,
    /// Every event in arrival order
    pub events: Vec<StreamEvent>,
}

/// Trait for completion providers
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Request one completion; tool schemas are advertised when `tools` is non-empty
    async fn complete(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<Completion>;

    /// Stream a reply from the native endpoint, forwarding each event to `on_event`
    /// in arrival order before the next chunk is read
    async fn stream_native(
        &self,
        messages: &[Message],
        on_event: &mut (dyn for<'e> FnMut(&'e StreamEvent) + Send),
    ) -> Result<StreamOutcome>;

    /// List available models
    async fn list_models(&self) -> Result<Vec<String>>;

    /// Model used for requests
    fn model(&self) -> &str;

    /// Get the provider name
    fn name(&self) -> &str;
}
