//! Remote tool gateway - MCP JSON-RPC over HTTP

pub mod client;
pub mod payload;

pub use client::{McpClient, PROTOCOL_VERSION, SESSION_HEADER};
pub use payload::{CallToolResult, McpToolOutput};
