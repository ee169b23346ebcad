//! Interactive REPL for toolrelay
//!
//! Provides the main user interaction loop and the session state shared with
//! single-prompt mode.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing::warn;

use crate::agent::{
    FileSessionStore, History, Orchestrator, OutputSink, SessionStore, StderrSink, TraceEvent,
    TurnOutcome,
};
use crate::cli::commands::{handle_command, CommandResult};
use crate::core::{Config, Message, Result, Role};

/// Conversation state across turns
pub struct Session {
    orchestrator: Orchestrator,
    history: History,
    last_trace: Vec<TraceEvent>,
    store: Option<FileSessionStore>,
}

impl Session {
    /// Create a session talking to the configured endpoint
    pub fn new(config: Config) -> Result<Self> {
        let sink: Arc<dyn OutputSink> = Arc::new(StderrSink);
        Ok(Self::with_orchestrator(Orchestrator::new(config)?.with_sink(sink)))
    }

    pub fn with_orchestrator(orchestrator: Orchestrator) -> Self {
        let history = History::new(orchestrator.config().agent.max_history);
        Self {
            orchestrator,
            history,
            last_trace: Vec::new(),
            store: None,
        }
    }

    /// Persist every turn to a JSON-lines file
    pub fn with_store(mut self, store: FileSessionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn orchestrator_mut(&mut self) -> &mut Orchestrator {
        &mut self.orchestrator
    }

    pub fn config(&self) -> &Config {
        self.orchestrator.config()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn last_trace(&self) -> &[TraceEvent] {
        &self.last_trace
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.last_trace.clear();
    }

    /// Run one turn with `input` appended to the history
    pub async fn ask(&mut self, input: &str) -> Result<TurnOutcome> {
        let user = Message::user(input);
        let previous = self.history.get_messages(None);
        self.history.add_user(input);

        let messages = self.history.get_messages(None);
        let outcome = match self.orchestrator.run_turn(messages).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // A turn that never ran leaves no trace in the history
                self.history.replace(previous);
                return Err(e);
            }
        };

        // The orchestrator adds the system prompt itself; history keeps the rest
        let mut kept = outcome.messages.clone();
        let answered = kept.last().is_some_and(|m| {
            m.role == Role::Assistant && m.tool_calls.as_ref().map_or(true, Vec::is_empty)
        });
        if !answered {
            // Advisory or failure text the user saw
            kept.push(Message::assistant(outcome.text.clone()));
        }
        self.history.replace(kept);
        self.last_trace = outcome.trace.clone();
        self.persist(&user, &outcome);
        Ok(outcome)
    }

    fn persist(&self, user: &Message, outcome: &TurnOutcome) {
        let Some(store) = &self.store else {
            return;
        };
        let saved = store
            .append_message(user)
            .and_then(|_| store.append_message(&Message::assistant(outcome.text.clone())))
            .and_then(|_| store.append_trace_events(&outcome.trace));
        if let Err(e) = saved {
            warn!(error = %e, path = %store.path().display(), "failed to persist session");
        }
    }
}

/// Interactive REPL (Read-Eval-Print Loop)
pub struct Repl {
    session: Session,
}

impl Repl {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Run the REPL
    pub async fn run(&mut self) -> Result<()> {
        self.print_banner();

        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            print!("You: ");
            stdout.flush()?;

            let mut input = String::new();
            match stdin.lock().read_line(&mut input) {
                Ok(0) => {
                    // EOF (Ctrl+D)
                    println!("\nGoodbye!");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    eprintln!("Error reading input: {}", e);
                    continue;
                }
            }

            let input = input.trim();
            if input.is_empty() {
                continue;
            }

            match handle_command(input, &mut self.session).await {
                Ok(CommandResult::Exit) => {
                    println!("\nGoodbye!");
                    break;
                }
                Ok(CommandResult::Clear) => {
                    println!("Conversation cleared.\n");
                }
                Ok(CommandResult::Handled(output)) => {
                    println!("{}\n", output);
                }
                Ok(CommandResult::Continue(input)) => match self.session.ask(&input).await {
                    Ok(outcome) => {
                        println!("\nAssistant:\n{}\n", outcome.text);
                        if outcome.used_tools {
                            println!("({} round(s), tools used)\n", outcome.rounds);
                        }
                    }
                    Err(e) => {
                        eprintln!("\nError: {}\n", e);
                    }
                },
                Err(e) => {
                    eprintln!("Command error: {}\n", e);
                }
            }
        }

        Ok(())
    }

    fn print_banner(&self) {
        let config = self.session.config();
        println!("toolrelay {}", env!("CARGO_PKG_VERSION"));
        println!("Endpoint:   {}", config.endpoint.base_url);
        println!("Model:      {}", config.endpoint.model);
        println!(
            "MCP:        {}",
            if config.mcp.enabled {
                config.mcp.url.as_str()
            } else {
                "disabled"
            }
        );
        println!(
            "Shell:      {}",
            if config.shell.enabled { "enabled" } else { "disabled" }
        );
        println!("Commands: help, clear, tools, trace, status, exit");
        println!("─────────────────────────────────────────────");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::MAX_ROUNDS_ADVISORY;
    use crate::llm::{ScriptedProvider, ScriptedReply};

    fn config() -> Config {
        let mut config = Config::default();
        config.endpoint.model = "scripted".to_string();
        config.endpoint.base_url = "http://127.0.0.1:9/v1".to_string();
        config.endpoint.native_streaming = false;
        config.mcp.enabled = false;
        config.shell.enabled = false;
        config.agent.system_prompt = None;
        config
    }

    fn session(config: Config, replies: ScriptedProvider) -> Session {
        Session::with_orchestrator(Orchestrator::with_provider(config, Arc::new(replies)))
    }

    #[tokio::test]
    async fn test_failed_turn_leaves_history_untouched() {
        let mut session = session(config(), ScriptedProvider::new(vec![ScriptedReply::text("first")]));
        session.ask("hello").await.unwrap();
        assert_eq!(session.history_len(), 2);

        session.orchestrator_mut().config_mut().endpoint.model = String::new();
        assert!(session.ask("again").await.is_err());

        let messages = session.history.get_messages(None);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[1].content, "first");
    }

    #[tokio::test]
    async fn test_round_limit_advisory_is_kept_in_history() {
        let mut config = config();
        config.agent.max_rounds = 1;
        let replies =
            ScriptedProvider::new(vec![ScriptedReply::tools(&[("call_1", "list_files", "{}")])]);
        let mut session = session(config, replies);

        let outcome = session.ask("loop").await.unwrap();
        assert_eq!(outcome.text, MAX_ROUNDS_ADVISORY);

        let messages = session.history.get_messages(None);
        let last = messages.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, MAX_ROUNDS_ADVISORY);
        assert_eq!(messages[messages.len() - 2].role, Role::Tool);
    }
}
