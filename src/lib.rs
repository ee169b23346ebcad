//! toolrelay - client-side tool-calling orchestration
//!
//! Mediates between a chat completion endpoint and a set of callable tools:
//! remote tools served by an MCP gateway over JSON-RPC/HTTP, and a local shell
//! command tool.
//!
//! # Architecture
//!
//! - **Core**: Shared types, configuration, and error handling
//! - **LLM**: Completion provider abstraction, OpenAI-compatible client, SSE decoding
//! - **Tools**: MCP client, local command executor, schema adapter
//! - **Agent**: The orchestration loop, conversation state and turn trace
//! - **CLI**: Command-line interface and REPL
//!
//! # Usage
//!
//! ```rust,no_run
//! use toolrelay::{Config, Message, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> toolrelay::Result<()> {
//!     let mut orchestrator = Orchestrator::new(Config::load())?;
//!     let outcome = orchestrator
//!         .run_turn(vec![Message::user("List the files in this directory")])
//!         .await?;
//!     println!("{}", outcome.text);
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod cli;
pub mod core;
pub mod llm;
pub mod tools;

// Re-export commonly used items
pub use agent::{Orchestrator, TurnOutcome};
pub use cli::{Repl, Session};
pub use self::core::{Config, Message, RelayError, Result};
