//! OpenAI-compatible completion client
//!
//! Standard mode posts to `{base}/chat/completions` with tool schemas attached.
//! Native mode posts to `{native}/api/v1/chat` and consumes an SSE stream.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::pin::pin;
use std::time::Duration;
use tracing::debug;

use crate::core::error::excerpt;
use crate::core::{Config, Message, RelayError, Result, ToolCallRequest, ToolDefinition};
use crate::llm::sse::{self, decode_event, DeltaAccumulator};
use crate::llm::traits::{
    Completion, CompletionProvider, StreamEvent, StreamOutcome, TokenUsage,
};

/// Client for an OpenAI-compatible chat endpoint
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    native_base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    timeout: Duration,
}

/// Chat completion request body
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

/// Message in wire format
#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: ApiFunction,
}

#[derive(Debug, Serialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

/// `GET /models` response
#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    id: String,
}

impl OpenAiClient {
    /// Create a client from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let endpoint = &config.endpoint;
        // No client-wide timeout: it would also cut off long native streams
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(endpoint.timeout_secs.clamp(1, 30)))
            .build()
            .map_err(|e| RelayError::completion(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            native_base_url: endpoint.native_base_url.trim_end_matches('/').to_string(),
            api_key: endpoint.api_key.clone(),
            model: endpoint.model.clone(),
            temperature: endpoint.temperature,
            max_tokens: endpoint.max_tokens,
            timeout: Duration::from_secs(endpoint.timeout_secs.max(1)),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    fn to_api_message(msg: &Message) -> ApiMessage {
        ApiMessage {
            role: msg.role.as_str(),
            content: msg.content.clone(),
            tool_calls: msg.tool_calls.as_ref().map(|calls| {
                calls
                    .iter()
                    .map(|tc| ApiToolCall {
                        id: tc.id.clone(),
                        call_type: "function",
                        function: ApiFunction {
                            name: tc.name.clone(),
                            arguments: tc.arguments.clone(),
                        },
                    })
                    .collect()
            }),
            tool_call_id: msg.tool_call_id.clone(),
            name: msg.name.clone(),
        }
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Response> {
        let response = self.authorize(request).send().await.map_err(|e| {
            if e.is_connect() {
                RelayError::completion(format!(
                    "Cannot connect to completion endpoint at {}. Is it running?",
                    url
                ))
            } else if e.is_timeout() {
                RelayError::timeout(format!("completion request to {}", url))
            } else {
                RelayError::from(e)
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::completion(format!(
                "Endpoint returned {}: {}",
                status,
                excerpt(&body, 500)
            )));
        }

        Ok(response)
    }
}

/// Build a [`Completion`] from a raw chat completion response body
pub fn parse_completion(raw: Value, fallback_model: &str) -> Completion {
    let message = raw.pointer("/choices/0/message").cloned().unwrap_or(Value::Null);

    let content = match message.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(s) => Some(s.as_str()),
                other => other.get("text").and_then(Value::as_str),
            })
            .collect(),
        _ => String::new(),
    };

    let tool_calls: Vec<ToolCallRequest> = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .filter_map(|(index, call)| parse_tool_call(index, call))
                .collect()
        })
        .unwrap_or_default();

    let usage = raw.get("usage").map(|u| {
        let field = |name: &str| u.get(name).and_then(Value::as_u64).unwrap_or(0) as u32;
        TokenUsage {
            prompt_tokens: field("prompt_tokens"),
            completion_tokens: field("completion_tokens"),
            total_tokens: field("total_tokens"),
        }
    });

    let model = raw
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or(fallback_model)
        .to_string();

    let text = if content.trim().is_empty() {
        serde_json::to_string_pretty(&raw).unwrap_or_default()
    } else {
        content.clone()
    };

    Completion {
        text,
        message: Message::assistant_with_tools(content, tool_calls.clone()),
        tool_calls,
        usage,
        model,
    }
}

fn parse_tool_call(index: usize, call: &Value) -> Option<ToolCallRequest> {
    let function = call.get("function")?;
    let name = function.get("name").and_then(Value::as_str)?;
    if name.is_empty() {
        return None;
    }

    let id = call
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("call_{}", index));

    let arguments = match function.get("arguments") {
        Some(Value::String(s)) => s.clone(),
        None | Some(Value::Null) => "{}".to_string(),
        Some(other) => other.to_string(),
    };

    Some(ToolCallRequest::new(id, name, arguments))
}

/// Flatten a conversation into the single input string the native API accepts
pub fn flatten_input(messages: &[Message]) -> String {
    if let [only] = messages {
        return only.content.clone();
    }
    messages
        .iter()
        .map(|m| {
            let role = m.role.as_str();
            let mut label = role.to_string();
            if let Some(first) = label.get_mut(0..1) {
                first.make_ascii_uppercase();
            }
            format!("{}: {}", label, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl CompletionProvider for OpenAiClient {
    async fn complete(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<Completion> {
        let request = ChatRequest {
            model: &self.model,
            messages: messages.iter().map(Self::to_api_message).collect(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
            tools: (!tools.is_empty()).then_some(tools),
            tool_choice: (!tools.is_empty()).then_some("auto"),
        };

        let url = format!("{}/chat/completions", self.base_url);
        debug!(url = %url, messages = messages.len(), tools = tools.len(), "completion request");

        let response = self
            .send(self.client.post(&url).timeout(self.timeout).json(&request), &url)
            .await?;

        let raw: Value = response
            .json()
            .await
            .map_err(|e| RelayError::completion(format!("Invalid completion response: {}", e)))?;

        let completion = parse_completion(raw, &self.model);
        debug!(
            tool_calls = completion.tool_calls.len(),
            chars = completion.text.len(),
            "completion response"
        );
        Ok(completion)
    }

    async fn stream_native(
        &self,
        messages: &[Message],
        on_event: &mut (dyn for<'e> FnMut(&'e StreamEvent) + Send),
    ) -> Result<StreamOutcome> {
        let mut body = json!({
            "model": self.model,
            "input": [{"type": "text", "content": flatten_input(messages)}],
            "temperature": self.temperature,
            "stream": true,
        });
        if let Some(max) = self.max_tokens {
            body["max_output_tokens"] = json!(max);
        }

        let url = format!("{}/api/v1/chat", self.native_base_url);
        debug!(url = %url, "native stream request");

        let response = self
            .send(
                self.client
                    .post(&url)
                    .header("Accept", "text/event-stream")
                    .json(&body),
                &url,
            )
            .await?;

        let mut accumulator = DeltaAccumulator::new();
        let mut events = Vec::new();

        let mut frames = pin!(sse::frames(response.bytes_stream()));
        while let Some(frame) = frames.next().await {
            let frame = frame.map_err(|e| RelayError::completion(format!("Stream error: {}", e)))?;
            let event = decode_event(&frame);
            accumulator.accept(&event);
            on_event(&event);
            events.push(event);
        }

        debug!(events = events.len(), "native stream finished");

        Ok(StreamOutcome {
            text: accumulator.finish(),
            events,
        })
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .send(self.client.get(&url).timeout(self.timeout), &url)
            .await?;

        let models: ModelsResponse = response
            .json()
            .await
            .map_err(|e| RelayError::completion(format!("Invalid models response: {}", e)))?;

        Ok(models.data.into_iter().map(|m| m.id).collect())
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}
