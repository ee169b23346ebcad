//! In-process fakes for the MCP gateway and the completion endpoint

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use toolrelay::Config;

pub const SESSION_ID: &str = "test-session";

/// Behaviour switches of the fake gateway
#[derive(Clone, Default)]
pub struct GatewayOptions {
    pub tools: Vec<Value>,
    /// Answer with `text/event-stream` bodies
    pub sse: bool,
    /// Delay before answering anything but the handshake
    pub delay: Option<Duration>,
    /// Tools per `tools/list` page (0 = everything at once)
    pub page_size: usize,
}

#[derive(Default)]
pub struct GatewayState {
    pub options: GatewayOptions,
    pub initialize_count: AtomicUsize,
    pub saw_session_header: AtomicBool,
    /// Next request carrying a session id gets a 404
    pub expire_session: AtomicBool,
    pub calls: Mutex<Vec<(String, Value)>>,
}

impl GatewayState {
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

pub fn tool(name: &str) -> Value {
    json!({
        "name": name,
        "description": format!("{} tool", name),
        "inputSchema": {"type": "object", "properties": {"path": {"type": "string"}}}
    })
}

fn envelope(state: &GatewayState, id: Value, body: Value) -> Response {
    let mut message = json!({"jsonrpc": "2.0", "id": id});
    if body.get("error").is_some() {
        message["error"] = body["error"].clone();
    } else {
        message["result"] = body;
    }

    if state.options.sse {
        let text = format!(
            ": ping\n\nevent: message\ndata: {}\n\n",
            serde_json::to_string(&message).unwrap()
        );
        ([(header::CONTENT_TYPE, "text/event-stream")], text).into_response()
    } else {
        Json(message).into_response()
    }
}

async fn gateway_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let method = body.get("method").and_then(Value::as_str).unwrap_or("");
    let id = body.get("id").cloned().unwrap_or(Value::Null);
    let session = headers
        .get("Mcp-Session-Id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if method == "initialize" {
        state.initialize_count.fetch_add(1, Ordering::SeqCst);
        let mut response = envelope(
            &state,
            id,
            json!({
                "protocolVersion": "2025-03-26",
                "capabilities": {"tools": {"listChanged": false}},
                "serverInfo": {"name": "fake-gateway", "version": "1.0.0"}
            }),
        );
        response
            .headers_mut()
            .insert("mcp-session-id", SESSION_ID.parse().unwrap());
        return response;
    }

    if method == "notifications/initialized" {
        return StatusCode::ACCEPTED.into_response();
    }

    if session.is_some() && state.expire_session.swap(false, Ordering::SeqCst) {
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    }
    if session.as_deref() == Some(SESSION_ID) {
        state.saw_session_header.store(true, Ordering::SeqCst);
    }

    if let Some(delay) = state.options.delay {
        tokio::time::sleep(delay).await;
    }

    match method {
        "tools/list" => {
            let tools = &state.options.tools;
            let start = body
                .pointer("/params/cursor")
                .and_then(Value::as_str)
                .and_then(|c| c.parse::<usize>().ok())
                .unwrap_or(0);
            let size = if state.options.page_size == 0 {
                tools.len().max(1)
            } else {
                state.options.page_size
            };
            let end = (start + size).min(tools.len());
            let page = &tools[start.min(end)..end];
            let next = (end < tools.len()).then(|| end.to_string());
            envelope(&state, id, json!({"tools": page, "nextCursor": next}))
        }
        "tools/call" => {
            let name = body
                .pointer("/params/name")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let args = body
                .pointer("/params/arguments")
                .cloned()
                .unwrap_or(Value::Null);
            state.calls.lock().unwrap().push((name.clone(), args.clone()));

            let result = match name.as_str() {
                "list_files" => json!({"content": [
                    {"type": "text", "text": "a.txt"},
                    {"type": "text", "text": "b.txt"}
                ]}),
                "stat" => json!({
                    "content": [{"type": "text", "text": "ignored"}],
                    "structuredContent": {"size": 42, "path": args.get("path")}
                }),
                "broken" => json!({
                    "isError": true,
                    "content": [{"type": "text", "text": "disk on fire"}]
                }),
                other => json!({"error": {"code": -32602, "message": format!("Unknown tool: {}", other)}}),
            };
            envelope(&state, id, result)
        }
        other => envelope(
            &state,
            id,
            json!({"error": {"code": -32601, "message": format!("Method not found: {}", other)}}),
        ),
    }
}

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Start a fake gateway; returns its MCP URL and shared state
pub async fn spawn_gateway(options: GatewayOptions) -> (String, Arc<GatewayState>) {
    let state = Arc::new(GatewayState {
        options,
        ..Default::default()
    });
    let app = Router::new()
        .route("/mcp", post(gateway_handler))
        .with_state(state.clone());
    (format!("{}/mcp", serve(app).await), state)
}

/// A URL nothing listens on
pub async fn closed_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

/// Fake completion endpoint state
#[derive(Default)]
pub struct EndpointState {
    pub hits: AtomicUsize,
    pub bodies: Mutex<Vec<Value>>,
    /// Replies for `/v1/chat/completions`, in order; the last one repeats
    pub replies: Mutex<Vec<Value>>,
    /// Frames for `/api/v1/chat` as `(event name, data)`
    pub stream: Vec<(Option<String>, String)>,
}

impl EndpointState {
    pub fn bodies(&self) -> Vec<Value> {
        self.bodies.lock().unwrap().clone()
    }
}

pub fn chat_reply(content: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "model": "fake-model",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 10, "completion_tokens": 3, "total_tokens": 13}
    })
}

pub fn tool_call_reply(id: &str, name: &str, arguments: Value) -> Value {
    json!({
        "id": "chatcmpl-2",
        "model": "fake-model",
        "choices": [{"index": 0, "message": {
            "role": "assistant",
            "content": null,
            "tool_calls": [{"id": id, "type": "function", "function": {"name": name, "arguments": arguments.to_string()}}]
        }, "finish_reason": "tool_calls"}]
    })
}

async fn completions_handler(
    State(state): State<Arc<EndpointState>>,
    Json(body): Json<Value>,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    state.bodies.lock().unwrap().push(body);
    let mut replies = state.replies.lock().unwrap();
    let reply = if replies.len() > 1 {
        replies.remove(0)
    } else {
        replies.first().cloned().unwrap_or_else(|| chat_reply("(empty script)"))
    };
    Json(reply).into_response()
}

async fn models_handler(State(state): State<Arc<EndpointState>>) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({"object": "list", "data": [{"id": "fake-model"}, {"id": "other-model"}]})).into_response()
}

async fn native_handler(
    State(state): State<Arc<EndpointState>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    state.bodies.lock().unwrap().push(body);
    let events: Vec<Result<Event, std::convert::Infallible>> = state
        .stream
        .iter()
        .map(|(name, data)| {
            let event = Event::default().data(data.clone());
            Ok(match name {
                Some(name) => event.event(name.clone()),
                None => event,
            })
        })
        .collect();
    Sse::new(tokio_stream::iter(events))
}

/// Start a fake completion endpoint; returns its root URL and shared state
pub async fn spawn_endpoint(state: EndpointState) -> (String, Arc<EndpointState>) {
    let state = Arc::new(state);
    let app = Router::new()
        .route("/v1/chat/completions", post(completions_handler))
        .route("/v1/models", get(models_handler))
        .route("/api/v1/chat", post(native_handler))
        .with_state(state.clone());
    (serve(app).await, state)
}

/// Config with every tool source off and a fixed model
pub fn base_config() -> Config {
    let mut config = Config::default();
    config.endpoint.model = "fake-model".to_string();
    config.endpoint.base_url = "http://127.0.0.1:9/v1".to_string();
    config.endpoint.native_base_url = "http://127.0.0.1:9".to_string();
    config.endpoint.api_key = None;
    config.endpoint.native_streaming = false;
    config.endpoint.timeout_secs = 10;
    config.mcp.enabled = false;
    config.mcp.api_key = None;
    config.mcp.timeout_secs = 5;
    config.shell.enabled = false;
    config.shell.workspace_root = None;
    config.agent.max_rounds = 4;
    config.agent.system_prompt = None;
    config
}
