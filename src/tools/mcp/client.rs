//! Stateful MCP client over streamable HTTP
//!
//! One instance holds one gateway session. Calls take `&mut self`, so requests
//! on a session are serialized by construction.

use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::payload::{into_result, parse_rpc_payload, CallToolResult, EXCERPT_CHARS};
use crate::core::error::excerpt;
use crate::core::config::McpConfig;
use crate::core::{RelayError, Result, ToolDescriptor};

/// Header carrying the gateway-issued session id
pub const SESSION_HEADER: &str = "Mcp-Session-Id";
/// Protocol revision announced during the handshake
pub const PROTOCOL_VERSION: &str = "2025-03-26";
const MAX_LIST_PAGES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionState {
    Uninitialized,
    Initialized { session_id: Option<String> },
}

/// Client for one MCP gateway endpoint
#[derive(Debug)]
pub struct McpClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
    session: SessionState,
    next_id: u64,
}

impl McpClient {
    /// Create a client for `endpoint` with a hard per-call deadline
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| RelayError::protocol(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: None,
            timeout,
            session: SessionState::Uninitialized,
            next_id: 1,
        })
    }

    pub fn from_config(config: &McpConfig) -> Result<Self> {
        let mut client = Self::new(&config.url, Duration::from_secs(config.timeout_secs.max(1)))?;
        client.api_key = config.api_key.clone();
        Ok(client)
    }

    /// Attach a bearer credential
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.session, SessionState::Initialized { .. })
    }

    /// Session id issued by the gateway, if any
    pub fn session_id(&self) -> Option<&str> {
        match &self.session {
            SessionState::Initialized { session_id } => session_id.as_deref(),
            SessionState::Uninitialized => None,
        }
    }

    /// Forget the session; the next call performs a fresh handshake
    pub fn reset(&mut self) {
        self.session = SessionState::Uninitialized;
    }

    /// Run the handshake unless a session is already established
    pub async fn initialize(&mut self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            }
        });

        let (headers, body) = self.exchange("initialize", params, true).await?;
        let session_id = headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let result = into_result(parse_rpc_payload(&body).await?)?;

        self.session = SessionState::Initialized {
            session_id: session_id.clone(),
        };

        if let Err(e) = self
            .exchange("notifications/initialized", json!({}), false)
            .await
        {
            self.reset();
            return Err(e);
        }

        let server = result
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        info!(
            endpoint = %self.endpoint,
            session = session_id.as_deref().unwrap_or("-"),
            server,
            "MCP session initialized"
        );
        Ok(())
    }

    /// List every tool the gateway offers, following pagination
    pub async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = match &cursor {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let result = self.request("tools/list", params).await?;

            let listed = result
                .get("tools")
                .and_then(Value::as_array)
                .ok_or_else(|| RelayError::protocol("tools/list result has no tools array"))?;

            for entry in listed {
                match serde_json::from_value::<ToolDescriptor>(entry.clone()) {
                    Ok(tool) if !tool.name.is_empty() => tools.push(tool),
                    _ => debug!(entry = %entry, "skipping malformed tool descriptor"),
                }
            }

            cursor = result
                .get("nextCursor")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(str::to_string);
            if cursor.is_none() {
                return Ok(tools);
            }
        }

        warn!(pages = MAX_LIST_PAGES, "tools/list pagination limit reached");
        Ok(tools)
    }

    /// Invoke a tool by name
    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<CallToolResult> {
        let result = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        Ok(CallToolResult::from_result(result))
    }

    async fn request(&mut self, method: &str, params: Value) -> Result<Value> {
        self.initialize().await?;
        let (_, body) = self.exchange(method, params, true).await?;
        into_result(parse_rpc_payload(&body).await?)
    }

    /// One HTTP round trip under the hard deadline
    async fn exchange(
        &mut self,
        method: &str,
        params: Value,
        expects_reply: bool,
    ) -> Result<(HeaderMap, String)> {
        let mut envelope = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        if expects_reply {
            envelope["id"] = json!(self.next_id);
            self.next_id += 1;
        }

        let deadline = self.timeout;
        match tokio::time::timeout(deadline, self.post(&envelope)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RelayError::timeout(format!(
                "MCP {} did not complete within {}s",
                method,
                deadline.as_secs()
            ))),
        }
    }

    async fn post(&mut self, envelope: &Value) -> Result<(HeaderMap, String)> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(envelope);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let sent_session = self.session_id().map(str::to_string);
        if let Some(id) = &sent_session {
            request = request.header(SESSION_HEADER, id);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                RelayError::protocol(format!("Cannot reach MCP gateway at {}", self.endpoint))
            } else {
                RelayError::protocol(format!("request failed: {}", e))
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| RelayError::protocol(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            if status == StatusCode::NOT_FOUND && sent_session.is_some() {
                debug!("gateway no longer knows the session, resetting");
                self.reset();
            }
            return Err(RelayError::protocol(format!(
                "HTTP {}: {}",
                status,
                excerpt(body.trim(), EXCERPT_CHARS)
            )));
        }

        Ok((headers, body))
    }
}
