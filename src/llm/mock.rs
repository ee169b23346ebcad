//! Scripted provider for tests and offline runs
//!
//! Replays a queue of canned completions without touching the network and
//! records every request it receives.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::core::{Message, RelayError, Result, ToolCallRequest, ToolDefinition};
use crate::llm::sse::{decode_event, parse_sse_body, DeltaAccumulator};
use crate::llm::traits::{Completion, CompletionProvider, StreamEvent, StreamOutcome};

/// One canned reply
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Plain assistant text, no tool calls
    Text(String),
    /// Assistant message requesting tools
    ToolCalls {
        content: String,
        calls: Vec<ToolCallRequest>,
    },
    /// The endpoint fails with this message
    Error(String),
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        ScriptedReply::Text(text.into())
    }

    /// Tool calls given as `(id, name, arguments)` triples
    pub fn tools(calls: &[(&str, &str, &str)]) -> Self {
        ScriptedReply::ToolCalls {
            content: String::new(),
            calls: calls
                .iter()
                .map(|(id, name, args)| ToolCallRequest::new(*id, *name, *args))
                .collect(),
        }
    }
}

/// A request seen by the provider
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

/// Provider that answers from a script
pub struct ScriptedProvider {
    model: String,
    replies: Mutex<VecDeque<ScriptedReply>>,
    repeat_last: bool,
    last: Mutex<Option<ScriptedReply>>,
    sse_body: Option<String>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedProvider {
    /// Create a provider that answers with `replies` in order
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            model: "scripted".to_string(),
            replies: Mutex::new(replies.into()),
            repeat_last: false,
            last: Mutex::new(None),
            sse_body: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Keep answering with the final reply once the script is exhausted
    pub fn repeating(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    /// Raw SSE body replayed by `stream_native`
    pub fn with_sse_body(mut self, body: impl Into<String>) -> Self {
        self.sse_body = Some(body.into());
        self
    }

    /// Every completion request received so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn next_reply(&self) -> Result<ScriptedReply> {
        let mut replies = self
            .replies
            .lock()
            .map_err(|_| RelayError::completion("scripted provider poisoned"))?;
        let mut last = self
            .last
            .lock()
            .map_err(|_| RelayError::completion("scripted provider poisoned"))?;

        match replies.pop_front() {
            Some(reply) => {
                *last = Some(reply.clone());
                Ok(reply)
            }
            None if self.repeat_last => last
                .clone()
                .ok_or_else(|| RelayError::completion("script is empty")),
            None => Err(RelayError::completion("script exhausted")),
        }
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<Completion> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                messages: messages.to_vec(),
                tools: tools.to_vec(),
            });
        }

        let (content, calls) = match self.next_reply()? {
            ScriptedReply::Text(text) => (text, Vec::new()),
            ScriptedReply::ToolCalls { content, calls } => (content, calls),
            ScriptedReply::Error(message) => return Err(RelayError::completion(message)),
        };

        Ok(Completion {
            text: content.clone(),
            message: Message::assistant_with_tools(content, calls.clone()),
            tool_calls: calls,
            usage: None,
            model: self.model.clone(),
        })
    }

    async fn stream_native(
        &self,
        messages: &[Message],
        on_event: &mut (dyn for<'e> FnMut(&'e StreamEvent) + Send),
    ) -> Result<StreamOutcome> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                messages: messages.to_vec(),
                tools: Vec::new(),
            });
        }

        let body = self
            .sse_body
            .as_deref()
            .ok_or_else(|| RelayError::completion("no stream scripted"))?;

        let mut accumulator = DeltaAccumulator::new();
        let mut events = Vec::new();
        for frame in parse_sse_body(body).await {
            let event = decode_event(&frame);
            accumulator.accept(&event);
            on_event(&event);
            events.push(event);
        }

        Ok(StreamOutcome {
            text: accumulator.finish(),
            events,
        })
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec![self.model.clone()])
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
