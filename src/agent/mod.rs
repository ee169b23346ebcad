//! Agent module - the tool-calling orchestration loop
//!
//! Contains the loop itself, its conversation state, the turn trace, and the
//! collaborator contracts it reports through.

pub mod conversation;
pub mod loop_state;
pub mod orchestrator;
pub mod sink;
pub mod trace;

pub use conversation::{Conversation, History};
pub use loop_state::TurnState;
pub use orchestrator::{Orchestrator, TurnOutcome, MAX_ROUNDS_ADVISORY};
pub use sink::{FileSessionStore, MemorySink, OutputSink, SessionStore, SinkMirror, StderrSink};
pub use trace::{Trace, TraceEvent, TraceKind};
