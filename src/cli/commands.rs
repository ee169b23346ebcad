//! CLI commands
//!
//! Special commands that can be executed in the REPL.

use std::sync::Arc;

use crate::cli::repl::Session;
use crate::core::Result;
use crate::llm::OpenAiClient;

/// Result of parsing a command
#[derive(Debug, PartialEq)]
pub enum CommandResult {
    /// Continue processing as normal input
    Continue(String),
    /// Command was handled, show output
    Handled(String),
    /// Exit the REPL
    Exit,
    /// Clear history
    Clear,
}

/// Parse and handle special commands
pub async fn handle_command(input: &str, session: &mut Session) -> Result<CommandResult> {
    let input = input.trim();
    let (cmd, args) = match input.split_once(' ') {
        Some((cmd, args)) => (cmd.to_lowercase(), args.trim()),
        None => (input.to_lowercase(), ""),
    };
    let cmd = cmd.trim_start_matches('/');

    // Command words followed by other text are ordinary prompts
    match cmd {
        "exit" | "quit" | "q" if args.is_empty() => Ok(CommandResult::Exit),

        "clear" | "reset" if args.is_empty() => {
            session.clear();
            session.orchestrator_mut().reset_mcp();
            Ok(CommandResult::Clear)
        }

        "help" | "?" if args.is_empty() => Ok(CommandResult::Handled(help_text())),

        "models" if args.is_empty() => {
            let provider = session.orchestrator().provider().clone();
            let models = provider.list_models().await?;
            Ok(CommandResult::Handled(format!(
                "Available models:\n{}\n\nCurrent: {}",
                models
                    .iter()
                    .map(|m| format!("  - {}", m))
                    .collect::<Vec<_>>()
                    .join("\n"),
                provider.model()
            )))
        }

        "tools" if args.is_empty() => {
            let (tools, events) = session.orchestrator_mut().list_exposed_tools().await;
            let mut output = String::from("Exposed tools:\n");
            if tools.is_empty() {
                output.push_str("  (none)\n");
            }
            for tool in &tools {
                output.push_str(&format!("  {:<28} {}\n", tool.name(), tool.function.description));
            }
            for event in &events {
                output.push_str(&format!("\n[{}] {}", event.kind, event.summary));
            }
            Ok(CommandResult::Handled(output.trim_end().to_string()))
        }

        "trace" if args.is_empty() => Ok(CommandResult::Handled(format_trace(session))),

        "status" if args.is_empty() => {
            let config = session.config();
            let status = format!(
                "toolrelay status:\n\
                 ─────────────────────────────\n\
                 Model:       {}\n\
                 Endpoint:    {}\n\
                 Native:      {}\n\
                 MCP:         {}\n\
                 Shell:       {}\n\
                 Max rounds:  {}\n\
                 History:     {} messages",
                config.endpoint.model,
                config.endpoint.base_url,
                on_off(config.endpoint.native_streaming),
                if config.mcp.enabled {
                    config.mcp.url.clone()
                } else {
                    "off".to_string()
                },
                on_off(config.shell.enabled),
                config.max_rounds(),
                session.history_len(),
            );
            Ok(CommandResult::Handled(status))
        }

        "set" if is_setting(args) => handle_set_command(args, session),

        _ => {
            if input.starts_with('/') {
                Ok(CommandResult::Handled(format!(
                    "Unknown command: {}. Type 'help' for available commands.",
                    cmd
                )))
            } else {
                Ok(CommandResult::Continue(input.to_string()))
            }
        }
    }
}

fn is_setting(args: &str) -> bool {
    let key = args.split_whitespace().next().unwrap_or_default();
    key.is_empty() || ["rounds", "model", "native"].contains(&key.to_lowercase().as_str())
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

/// Handle 'set' subcommands
fn handle_set_command(args: &str, session: &mut Session) -> Result<CommandResult> {
    let (key, value) = match args.split_once(' ') {
        Some((key, value)) => (key.to_lowercase(), value.trim()),
        None => (args.to_lowercase(), ""),
    };

    match key.as_str() {
        "rounds" => match value.parse::<usize>() {
            Ok(n) if n >= 1 => {
                session.orchestrator_mut().config_mut().agent.max_rounds = n;
                Ok(CommandResult::Handled(format!("Max rounds set to: {}", n)))
            }
            _ => Ok(CommandResult::Handled(
                "Usage: set rounds <n> (n >= 1)".to_string(),
            )),
        },

        "model" => {
            if value.is_empty() {
                return Ok(CommandResult::Handled(format!(
                    "Current model: {}",
                    session.config().endpoint.model
                )));
            }
            let orchestrator = session.orchestrator_mut();
            orchestrator.config_mut().endpoint.model = value.to_string();
            let client = OpenAiClient::from_config(orchestrator.config())?;
            orchestrator.set_provider(Arc::new(client));
            Ok(CommandResult::Handled(format!("Model set to: {}", value)))
        }

        "native" => {
            let enabled = match value.to_lowercase().as_str() {
                "on" | "true" | "1" | "yes" => true,
                "off" | "false" | "0" | "no" => false,
                _ => {
                    return Ok(CommandResult::Handled(
                        "Usage: set native <on|off>".to_string(),
                    ))
                }
            };
            session
                .orchestrator_mut()
                .config_mut()
                .endpoint
                .native_streaming = enabled;
            Ok(CommandResult::Handled(format!(
                "Native streaming: {}",
                on_off(enabled)
            )))
        }

        _ => Ok(CommandResult::Handled(
            "Usage: set <rounds|model|native> <value>\n\
             Examples:\n\
               set rounds 8\n\
               set model qwen2.5-7b-instruct\n\
               set native on"
                .to_string(),
        )),
    }
}

fn format_trace(session: &Session) -> String {
    let events = session.last_trace();
    if events.is_empty() {
        return "No trace yet. Ask something first.".to_string();
    }
    events
        .iter()
        .map(|event| {
            format!(
                "{} {:<11} {}",
                event.timestamp.format("%H:%M:%S%.3f"),
                event.kind.as_str(),
                event.summary
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Generate help text
fn help_text() -> String {
    r#"toolrelay commands:
─────────────────────────────────────────────
  help, ?          Show this help message
  exit, quit, q    Exit
  clear, reset     Clear conversation history
  status           Show current configuration
  models           List models offered by the endpoint
  tools            Show the tools the model would see
  trace            Show the trace of the last turn

  set rounds <n>         Maximum tool-calling rounds per turn
  set model <id>         Switch the completion model
  set native <on|off>    Use the native streaming endpoint

Keyboard Shortcuts:
  Ctrl+D           Exit
─────────────────────────────────────────────"#
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Orchestrator;
    use crate::core::Config;
    use crate::llm::{ScriptedProvider, ScriptedReply};

    fn session() -> Session {
        let mut config = Config::default();
        config.endpoint.model = "scripted".to_string();
        config.endpoint.native_streaming = false;
        config.mcp.enabled = false;
        config.shell.enabled = false;
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedReply::text("pong")]));
        Session::with_orchestrator(Orchestrator::with_provider(config, provider))
    }

    #[tokio::test]
    async fn test_plain_input_continues() {
        let mut session = session();
        let result = handle_command("ping", &mut session).await.unwrap();
        assert_eq!(result, CommandResult::Continue("ping".to_string()));
    }

    #[tokio::test]
    async fn test_command_word_with_text_is_a_prompt() {
        let mut session = session();
        for input in ["help me list files", "set up a rust project"] {
            let result = handle_command(input, &mut session).await.unwrap();
            assert_eq!(result, CommandResult::Continue(input.to_string()));
        }
    }

    #[tokio::test]
    async fn test_set_rounds() {
        let mut session = session();
        handle_command("set rounds 7", &mut session).await.unwrap();
        assert_eq!(session.config().agent.max_rounds, 7);

        let result = handle_command("set rounds 0", &mut session).await.unwrap();
        assert!(matches!(result, CommandResult::Handled(text) if text.starts_with("Usage")));
        assert_eq!(session.config().agent.max_rounds, 7);
    }

    #[tokio::test]
    async fn test_set_native() {
        let mut session = session();
        handle_command("set native on", &mut session).await.unwrap();
        assert!(session.config().endpoint.native_streaming);
    }

    #[tokio::test]
    async fn test_trace_after_turn() {
        let mut session = session();
        let outcome = session.ask("ping").await.unwrap();
        assert_eq!(outcome.text, "pong");
        assert_eq!(session.history_len(), 2);

        let CommandResult::Handled(trace) = handle_command("trace", &mut session).await.unwrap() else {
            panic!("trace should be handled");
        };
        assert!(trace.contains("start"));
        assert!(trace.contains("final"));
    }

    #[tokio::test]
    async fn test_tools_lists_nothing_when_disabled() {
        let mut session = session();
        let CommandResult::Handled(output) = handle_command("tools", &mut session).await.unwrap() else {
            panic!("tools should be handled");
        };
        assert!(output.contains("(none)"));
    }
}
