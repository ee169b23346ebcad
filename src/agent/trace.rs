//! Turn trace
//!
//! An append-only list of structured events describing what happened during a
//! turn. Detail blobs are capped so a chatty tool cannot bloat the trace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

/// Kind of a trace event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TraceKind {
    Start,
    Mcp,
    Round,
    Tool,
    ToolError,
    Reasoning,
    Stream,
    StreamEnd,
    Final,
    Limit,
    Error,
}

impl TraceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceKind::Start => "start",
            TraceKind::Mcp => "mcp",
            TraceKind::Round => "round",
            TraceKind::Tool => "tool",
            TraceKind::ToolError => "tool-error",
            TraceKind::Reasoning => "reasoning",
            TraceKind::Stream => "stream",
            TraceKind::StreamEnd => "stream-end",
            TraceKind::Final => "final",
            TraceKind::Limit => "limit",
            TraceKind::Error => "error",
        }
    }
}

impl std::fmt::Display for TraceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: TraceKind,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Append-only event log for one turn
#[derive(Debug, Clone)]
pub struct Trace {
    events: Vec<TraceEvent>,
    detail_cap: usize,
}

impl Trace {
    pub fn new(detail_cap: usize) -> Self {
        Self {
            events: Vec::new(),
            detail_cap,
        }
    }

    /// Append an event, capping its details
    pub fn record(&mut self, kind: TraceKind, summary: impl Into<String>, details: Option<Value>) {
        let summary = summary.into();
        debug!(kind = %kind, summary = %summary, "trace");
        self.events.push(TraceEvent {
            timestamp: Utc::now(),
            kind,
            summary,
            details: details.map(|d| cap_details(d, self.detail_cap)),
        });
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }
}

/// Replace details whose serialized form exceeds `cap` characters with a preview
pub fn cap_details(details: Value, cap: usize) -> Value {
    let serialized = details.to_string();
    match serialized.char_indices().nth(cap) {
        Some((idx, _)) => json!({
            "truncated": true,
            "preview": &serialized[..idx],
        }),
        None => details,
    }
}
