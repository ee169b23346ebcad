//! Collaborator contracts for the orchestration loop
//!
//! The loop only needs an [`OutputSink`] for human-readable progress lines and
//! callers may persist turns through a [`SessionStore`]. Small implementations
//! used by the CLI and tests live here too.

use chrono::Utc;
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::agent::trace::TraceEvent;
use crate::core::{Message, Result};
use crate::tools::shell::{ExecObserver, ExecResult};

/// Receives human-readable progress lines
pub trait OutputSink: Send + Sync {
    fn append_line(&self, line: &str);
}

/// Persists messages and trace events
pub trait SessionStore: Send + Sync {
    fn append_message(&self, message: &Message) -> Result<()>;
    fn append_trace_events(&self, events: &[TraceEvent]) -> Result<()>;
}

/// Writes progress lines to stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl OutputSink for StderrSink {
    fn append_line(&self, line: &str) {
        eprintln!("  {}", line);
    }
}

/// Keeps progress lines in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl OutputSink for MemorySink {
    fn append_line(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}

/// Append-only JSON-lines session file
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, records: impl IntoIterator<Item = serde_json::Value>) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for record in records {
            writeln!(file, "{}", serde_json::to_string(&record)?)?;
        }
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn append_message(&self, message: &Message) -> Result<()> {
        self.append([json!({
            "record": "message",
            "at": Utc::now(),
            "message": message,
        })])
    }

    fn append_trace_events(&self, events: &[TraceEvent]) -> Result<()> {
        self.append(events.iter().map(|event| {
            json!({
                "record": "trace",
                "event": event,
            })
        }))
    }
}

/// Mirrors live command output to a sink
pub struct SinkMirror<'a> {
    sink: &'a dyn OutputSink,
}

impl<'a> SinkMirror<'a> {
    pub fn new(sink: &'a dyn OutputSink) -> Self {
        Self { sink }
    }

    fn lines(&self, prefix: &str, chunk: &str) {
        for line in chunk.lines().filter(|l| !l.trim().is_empty()) {
            self.sink.append_line(&format!("{}{}", prefix, line));
        }
    }
}

impl ExecObserver for SinkMirror<'_> {
    fn on_start(&self, command: &str, cwd: &Path) -> anyhow::Result<()> {
        self.sink
            .append_line(&format!("$ {}  ({})", command, cwd.display()));
        Ok(())
    }

    fn on_stdout(&self, chunk: &str) -> anyhow::Result<()> {
        self.lines("| ", chunk);
        Ok(())
    }

    fn on_stderr(&self, chunk: &str) -> anyhow::Result<()> {
        self.lines("! ", chunk);
        Ok(())
    }

    fn on_exit(&self, result: &ExecResult) -> anyhow::Result<()> {
        let status = if result.timed_out {
            format!("timed out after {}ms", result.duration_ms)
        } else {
            format!("exit {} in {}ms", result.exit_code, result.duration_ms)
        };
        self.sink.append_line(&status);
        Ok(())
    }
}
