//! Tools module - tool sources exposed to the model
//!
//! Contains the MCP gateway client, the local command executor, and the schema
//! adapter that turns both into function-calling definitions.

pub mod mcp;
pub mod schema;
pub mod shell;

pub use mcp::{CallToolResult, McpClient, McpToolOutput};
pub use schema::{local_shell_definition, to_tool_definitions, LOCAL_SHELL_TOOL};
pub use shell::{ExecObserver, ExecResult, LocalShell, ShellRequest};
