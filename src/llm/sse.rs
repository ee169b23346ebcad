//! Server-Sent-Events decoding for the native streaming endpoint
//!
//! Frame parsing is done by `eventsource-stream`. Each frame becomes a
//! [`StreamEvent`]; text deltas are pulled out of the payload by an ordered
//! list of extraction strategies, and [`DeltaAccumulator`] builds the final
//! assistant text.

use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use serde_json::{Map, Value};

use crate::llm::traits::{StreamEvent, StreamEventKind};

/// A raw SSE frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseFrame {
    /// Value of the `event:` line, if present
    pub event: Option<String>,
    /// `data:` lines joined with newlines
    pub data: String,
}

impl From<Event> for SseFrame {
    fn from(event: Event) -> Self {
        // A frame without an `event:` line is reported as "message"
        let name = Some(event.event).filter(|e| !e.is_empty() && e != "message");
        Self {
            event: name,
            data: event.data,
        }
    }
}

/// Decode a byte stream into frames as they complete
pub fn frames<S, B, E>(stream: S) -> impl Stream<Item = Result<SseFrame, EventStreamError<E>>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    stream.eventsource().map(|item| item.map(SseFrame::from))
}

/// Extract every frame from a fully buffered SSE body.
///
/// A trailing frame without its terminating blank line is still delivered;
/// undecodable frames are skipped.
pub async fn parse_sse_body(body: &str) -> Vec<SseFrame> {
    let chunks = futures::stream::iter([Ok::<_, std::convert::Infallible>(format!("{}\n\n", body))]);
    frames(chunks)
        .filter_map(|frame| async move { frame.ok() })
        .collect()
        .await
}

/// Turn a frame into a classified event with its text delta
pub fn decode_event(frame: &SseFrame) -> StreamEvent {
    if frame.data.trim() == "[DONE]" {
        return StreamEvent::done();
    }

    let data = serde_json::from_str::<Value>(&frame.data)
        .unwrap_or_else(|_| Value::String(frame.data.clone()));

    let name = frame
        .event
        .clone()
        .or_else(|| data.get("type").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "message".to_string());

    let delta = extract_delta(&data);

    StreamEvent {
        kind: StreamEventKind::classify(&name),
        name,
        data,
        delta,
    }
}

/// Shape of a streamed payload
enum Payload<'a> {
    Text(&'a str),
    Object(&'a Map<String, Value>),
    Other,
}

impl<'a> Payload<'a> {
    fn of(value: &'a Value) -> Self {
        match value {
            Value::String(s) => Payload::Text(s),
            Value::Object(map) => Payload::Object(map),
            _ => Payload::Other,
        }
    }
}

type Strategy = fn(&Map<String, Value>) -> Option<String>;

/// Tried in order; the first strategy yielding non-empty text wins.
const STRATEGIES: [Strategy; 3] = [explicit_field, nested_blocks, openai_response];

/// Derive the incremental text of a payload
pub fn extract_delta(data: &Value) -> Option<String> {
    match Payload::of(data) {
        Payload::Text(text) if !text.is_empty() => Some(text.to_string()),
        Payload::Object(map) => STRATEGIES.iter().find_map(|strategy| strategy(map)),
        _ => None,
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

/// `delta` / `text` / `content` as a string, or `delta.text` / `delta.content`
fn explicit_field(map: &Map<String, Value>) -> Option<String> {
    match map.get("delta") {
        Some(Value::String(s)) => return non_empty(s),
        Some(Value::Object(inner)) => {
            for key in ["text", "content"] {
                if let Some(s) = inner.get(key).and_then(Value::as_str) {
                    return non_empty(s);
                }
            }
        }
        _ => {}
    }

    ["text", "content"]
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_str))
        .and_then(non_empty)
}

/// `output` / `content` arrays of blocks, optionally wrapped in `result`
fn nested_blocks(map: &Map<String, Value>) -> Option<String> {
    for key in ["output", "content"] {
        if let Some(Value::Array(blocks)) = map.get(key) {
            let text = join_blocks(blocks);
            if !text.is_empty() {
                return Some(text);
            }
        }
    }

    match map.get("result") {
        Some(Value::Object(inner)) => nested_blocks(inner),
        _ => None,
    }
}

/// `response.output[].content[].text` or `choices[0].delta.content`
fn openai_response(map: &Map<String, Value>) -> Option<String> {
    if let Some(Value::Object(response)) = map.get("response") {
        if let Some(Value::Array(items)) = response.get("output") {
            let text: String = items
                .iter()
                .filter_map(|item| item.get("content").and_then(Value::as_array))
                .map(|parts| join_blocks(parts))
                .collect();
            if !text.is_empty() {
                return Some(text);
            }
        }
    }

    map.get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.pointer("/delta/content"))
        .and_then(Value::as_str)
        .and_then(non_empty)
}

fn join_blocks(blocks: &[Value]) -> String {
    blocks
        .iter()
        .filter_map(|block| match block {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => {
                // Reasoning blocks inside an output array are not assistant text
                if obj.get("type").and_then(Value::as_str) == Some("reasoning") {
                    return None;
                }
                obj.get("text")
                    .or_else(|| obj.get("content"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            }
            _ => None,
        })
        .collect()
}

/// Builds the final assistant text from streamed events
#[derive(Debug, Default)]
pub struct DeltaAccumulator {
    text: String,
    saw_message_delta: bool,
}

impl DeltaAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one event
    pub fn accept(&mut self, event: &StreamEvent) {
        if event.kind == StreamEventKind::Reasoning {
            return;
        }
        if event.name == "message.delta" {
            self.saw_message_delta = true;
        } else if event.name == "chat.end" && self.saw_message_delta {
            // chat.end repeats the whole reply once deltas have been streamed
            return;
        }
        if let Some(delta) = &event.delta {
            self.text.push_str(delta);
        }
    }

    /// Trimmed concatenation of accepted deltas
    pub fn finish(self) -> String {
        self.text.trim().to_string()
    }
}
