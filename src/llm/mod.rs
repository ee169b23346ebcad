//! LLM module - completion endpoint integrations
//!
//! Provides the provider abstraction, an OpenAI-compatible client with a native
//! SSE streaming mode, and a scripted provider for tests.

pub mod mock;
pub mod openai;
pub mod sse;
pub mod traits;

pub use mock::{RecordedRequest, ScriptedProvider, ScriptedReply};
pub use openai::OpenAiClient;
pub use traits::{
    Completion, CompletionProvider, StreamEvent, StreamEventKind, StreamOutcome, TokenUsage,
};
