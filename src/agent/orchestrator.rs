//! Orchestration loop
//!
//! Drives rounds of "ask the model, run the tools it requests, feed the results
//! back" until the model answers without tool calls or the round budget runs
//! out. Every step is recorded in a [`Trace`].

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::agent::conversation::Conversation;
use crate::agent::loop_state::TurnState;
use crate::agent::sink::{OutputSink, SinkMirror};
use crate::agent::trace::{Trace, TraceEvent, TraceKind};
use crate::core::{Config, Message, RelayError, Result, Role, ToolCallRequest, ToolDefinition};
use crate::llm::{CompletionProvider, OpenAiClient, StreamEvent, StreamEventKind};
use crate::tools::mcp::McpClient;
use crate::tools::schema::{local_shell_definition, to_tool_definitions, LOCAL_SHELL_TOOL};
use crate::tools::shell::{ExecObserver, LocalShell, ShellRequest};

/// Returned when the round budget runs out before a final answer
pub const MAX_ROUNDS_ADVISORY: &str = "Stopped: the model was still requesting tools when the round limit was reached. \
Raise the round limit (agent.max_rounds or --max-rounds) and ask again to let it continue.";

/// Result of one turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Final assistant text
    pub text: String,
    /// Whether any tool was invoked
    pub used_tools: bool,
    /// Completion rounds consumed
    pub rounds: usize,
    /// Everything that happened, in order
    pub trace: Vec<TraceEvent>,
    /// Working conversation at the end of the turn
    pub messages: Vec<Message>,
}

/// Tools exposed for one turn
struct TurnTools {
    definitions: Vec<ToolDefinition>,
    local: Option<LocalShell>,
    remote: bool,
}

/// Coordinates the completion endpoint and the tool sources
pub struct Orchestrator {
    config: Config,
    llm: Arc<dyn CompletionProvider>,
    mcp: Option<McpClient>,
    sink: Option<Arc<dyn OutputSink>>,
}

impl Orchestrator {
    /// Create an orchestrator talking to the configured endpoint
    pub fn new(config: Config) -> Result<Self> {
        let llm = Arc::new(OpenAiClient::from_config(&config)?);
        Ok(Self::with_provider(config, llm))
    }

    /// Create an orchestrator with a specific completion provider
    pub fn with_provider(config: Config, llm: Arc<dyn CompletionProvider>) -> Self {
        Self {
            config,
            llm,
            mcp: None,
            sink: None,
        }
    }

    /// Mirror progress to an output sink
    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Mutable configuration; takes effect on the next turn
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn provider(&self) -> &Arc<dyn CompletionProvider> {
        &self.llm
    }

    pub fn set_provider(&mut self, llm: Arc<dyn CompletionProvider>) {
        self.llm = llm;
    }

    /// Drop the gateway session; the next turn reconnects
    pub fn reset_mcp(&mut self) {
        self.mcp = None;
    }

    fn progress(&self, line: &str) {
        if let Some(sink) = &self.sink {
            sink.append_line(line);
        }
    }

    /// Run one turn over `messages`.
    ///
    /// Only configuration errors are returned; every other failure ends up in
    /// the trace and the returned text.
    pub async fn run_turn(&mut self, messages: Vec<Message>) -> Result<TurnOutcome> {
        self.config.validate()?;

        let mut trace = Trace::new(self.config.agent.trace_detail_chars);
        let conversation = Conversation::from_messages(self.with_system_prompt(messages));

        trace.record(
            TraceKind::Start,
            format!("Turn started with {} message(s)", conversation.len()),
            Some(json!({
                "model": self.llm.model(),
                "provider": self.llm.name(),
                "native_streaming": self.config.endpoint.native_streaming,
                "max_rounds": self.config.max_rounds(),
            })),
        );
        info!(model = %self.llm.model(), messages = conversation.len(), "turn started");

        if self.config.endpoint.native_streaming {
            return Ok(self.run_native(conversation, trace).await);
        }

        let tools = self.assemble_tools(&mut trace).await;
        self.run_rounds(conversation, tools, trace).await
    }

    fn with_system_prompt(&self, messages: Vec<Message>) -> Vec<Message> {
        match self.config.agent.system_prompt.as_deref() {
            Some(prompt)
                if !prompt.trim().is_empty()
                    && messages.first().map(|m| m.role) != Some(Role::System) =>
            {
                let mut with_prompt = Vec::with_capacity(messages.len() + 1);
                with_prompt.push(Message::system(prompt));
                with_prompt.extend(messages);
                with_prompt
            }
            _ => messages,
        }
    }

    /// Definitions that would be exposed on the next turn, with the trace of assembling them
    pub async fn list_exposed_tools(&mut self) -> (Vec<ToolDefinition>, Vec<TraceEvent>) {
        let mut trace = Trace::new(self.config.agent.trace_detail_chars);
        let tools = self.assemble_tools(&mut trace).await;
        (tools.definitions, trace.into_events())
    }

    async fn assemble_tools(&mut self, trace: &mut Trace) -> TurnTools {
        let local = self
            .config
            .shell
            .enabled
            .then(|| LocalShell::from_config(&self.config));

        let mut definitions = Vec::new();
        if local.is_some() {
            definitions.push(local_shell_definition());
        }

        let mut remote = false;
        if self.config.mcp.enabled {
            match self.list_remote_tools().await {
                Ok(listing) => {
                    let mut excluded = self.config.mcp.excluded_tools.clone();
                    if local.is_some() {
                        excluded.push(LOCAL_SHELL_TOOL.to_string());
                    }
                    let exposed = to_tool_definitions(&listing, &excluded);
                    let hidden: Vec<&str> = listing
                        .iter()
                        .map(|t| t.name.as_str())
                        .filter(|name| !exposed.iter().any(|d| d.name() == *name))
                        .collect();

                    // Nothing usable on the gateway switches remote tooling off for the turn
                    let disabled = exposed.is_empty();
                    let summary = if disabled {
                        format!(
                            "Remote tools disabled for this turn: gateway offers {} tool(s), none exposed",
                            listing.len()
                        )
                    } else {
                        format!(
                            "Remote gateway offers {} tool(s), {} exposed",
                            listing.len(),
                            exposed.len()
                        )
                    };
                    trace.record(
                        TraceKind::Mcp,
                        summary,
                        Some(json!({
                            "endpoint": self.config.mcp.url,
                            "exposed": exposed.iter().map(|d| d.name()).collect::<Vec<_>>(),
                            "excluded": hidden,
                            "disabled": disabled,
                        })),
                    );
                    definitions.extend(exposed);
                    remote = !disabled;
                }
                Err(e) => {
                    warn!(error = %e, "remote tools unavailable for this turn");
                    trace.record(
                        TraceKind::Mcp,
                        "Remote tools unavailable for this turn",
                        Some(json!({
                            "endpoint": self.config.mcp.url,
                            "error": e.to_string(),
                            "disabled": true,
                        })),
                    );
                }
            }
        }

        debug!(tools = definitions.len(), remote, "tools assembled");
        TurnTools {
            definitions,
            local,
            remote,
        }
    }

    async fn list_remote_tools(&mut self) -> Result<Vec<crate::core::ToolDescriptor>> {
        let stale = self
            .mcp
            .as_ref()
            .is_some_and(|client| client.endpoint() != self.config.mcp.url);
        if stale || self.mcp.is_none() {
            self.mcp = Some(McpClient::from_config(&self.config.mcp)?);
        }

        let client = self
            .mcp
            .as_mut()
            .ok_or_else(|| RelayError::protocol("MCP client not available"))?;
        client.list_tools().await
    }

    async fn run_rounds(
        &mut self,
        mut conversation: Conversation,
        tools: TurnTools,
        mut trace: Trace,
    ) -> Result<TurnOutcome> {
        let mut state = TurnState::new(self.config.max_rounds());

        while state.should_continue() {
            state.next_round();
            let label = state.label();
            trace.record(
                TraceKind::Round,
                label.clone(),
                Some(json!({
                    "messages": conversation.len(),
                    "tools": tools.definitions.len(),
                })),
            );
            self.progress(&label);

            let completion = match self
                .llm
                .complete(conversation.messages(), &tools.definitions)
                .await
            {
                Ok(completion) => completion,
                Err(e) => {
                    warn!(error = %e, round = state.round, "completion request failed");
                    trace.record(TraceKind::Error, "Completion request failed", Some(json!({ "error": e.to_string() })));
                    let text = format!("Completion request failed: {}", e.detail());
                    return Ok(finish(text, &state, trace, conversation));
                }
            };

            if completion.tool_calls.is_empty() {
                trace.record(
                    TraceKind::Final,
                    format!("Final answer after {} round(s)", state.round),
                    Some(json!({ "chars": completion.text.chars().count() })),
                );
                conversation.push(Message::assistant(completion.text.clone()))?;
                return Ok(finish(completion.text, &state, trace, conversation));
            }

            state.mark_tools_used();
            conversation.push(completion.message)?;

            // Strictly sequential: a call may depend on the recorded result of the one before it
            for call in &completion.tool_calls {
                let content = self.execute_tool(call, &tools, &mut trace).await;
                conversation.push(Message::tool_result(&call.id, &call.name, content))?;
            }
        }

        info!(rounds = state.round, "round limit reached");
        trace.record(
            TraceKind::Limit,
            format!("Round limit of {} reached", state.max_rounds),
            None,
        );
        self.progress("Round limit reached");
        Ok(finish(
            MAX_ROUNDS_ADVISORY.to_string(),
            &state,
            trace,
            conversation,
        ))
    }

    /// Run one tool call; failures become the returned text
    async fn execute_tool(&mut self, call: &ToolCallRequest, tools: &TurnTools, trace: &mut Trace) -> String {
        let arguments = call.parsed_arguments();
        self.progress(&format!("-> {}", call.name));

        if call.name == LOCAL_SHELL_TOOL {
            if let Some(shell) = &tools.local {
                return self.run_local(call, shell, ShellRequest::from_arguments(&arguments), trace).await;
            }
        }

        trace.record(
            TraceKind::Tool,
            format!("Calling remote tool {}", call.name),
            Some(json!({ "id": call.id, "arguments": Value::Object(arguments.clone()) })),
        );

        // Only names exposed this turn reach the gateway; excluded proxies never do
        let exposed = tools.remote && tools.definitions.iter().any(|d| d.name() == call.name);
        let outcome = match self.mcp.as_mut() {
            Some(client) if exposed => client.call_tool(&call.name, arguments).await,
            _ if !tools.remote => Err(RelayError::tool("remote tools are unavailable for this turn")),
            _ => Err(RelayError::tool(format!("tool '{}' is not available", call.name))),
        };

        match outcome {
            Ok(result) => {
                let text = result.to_text();
                trace.record(
                    TraceKind::Tool,
                    format!("Remote tool {} returned", call.name),
                    Some(json!({ "id": call.id, "is_error": result.is_error, "output": text })),
                );
                text
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "remote tool call failed");
                trace.record(
                    TraceKind::ToolError,
                    format!("Remote tool {} failed", call.name),
                    Some(json!({ "id": call.id, "error": e.to_string() })),
                );
                format!("MCP tool call failed: {}", e.detail())
            }
        }
    }

    async fn run_local(
        &self,
        call: &ToolCallRequest,
        shell: &LocalShell,
        request: ShellRequest,
        trace: &mut Trace,
    ) -> String {
        trace.record(
            TraceKind::Tool,
            format!("Running local command: {}", request.command.trim()),
            Some(json!({
                "id": call.id,
                "command": request.command,
                "cwd": request.cwd,
                "timeout_seconds": request.timeout_seconds,
            })),
        );

        let mirror = self.sink.as_deref().map(SinkMirror::new);
        let observer = mirror.as_ref().map(|m| m as &dyn ExecObserver);

        match shell.run(&request, observer).await {
            Ok(result) => {
                trace.record(
                    TraceKind::Tool,
                    format!("Local command exited with {}", result.exit_code),
                    Some(json!({
                        "id": call.id,
                        "exit_code": result.exit_code,
                        "signal": result.signal,
                        "timed_out": result.timed_out,
                        "duration_ms": result.duration_ms,
                        "stdout_truncated": result.stdout_truncated,
                        "stderr_truncated": result.stderr_truncated,
                    })),
                );
                result.to_json()
            }
            Err(e) => {
                trace.record(
                    TraceKind::ToolError,
                    "Local command rejected",
                    Some(json!({ "id": call.id, "error": e.to_string() })),
                );
                format!("Local command failed: {}", e.detail())
            }
        }
    }

    async fn run_native(&mut self, mut conversation: Conversation, mut trace: Trace) -> TurnOutcome {
        if self.config.tools_enabled() {
            trace.record(
                TraceKind::Stream,
                "Native streaming mode: tool calling is bypassed",
                None,
            );
        }

        let state = {
            let mut state = TurnState::new(1);
            state.next_round();
            state
        };
        self.progress("Streaming from native endpoint");

        let mut on_event = |event: &StreamEvent| {
            let kind = match event.kind {
                StreamEventKind::Reasoning => TraceKind::Reasoning,
                StreamEventKind::Terminal => TraceKind::StreamEnd,
                StreamEventKind::Content => TraceKind::Stream,
            };
            trace.record(kind, event.name.clone(), Some(event.data.clone()));
        };

        let streamed = self
            .llm
            .stream_native(conversation.messages(), &mut on_event)
            .await;

        match streamed {
            Ok(outcome) => {
                debug!(events = outcome.events.len(), "native stream complete");
                trace.record(
                    TraceKind::Final,
                    "Native stream finished",
                    Some(json!({ "events": outcome.events.len(), "chars": outcome.text.chars().count() })),
                );
                let _ = conversation.push(Message::assistant(outcome.text.clone()));
                finish(outcome.text, &state, trace, conversation)
            }
            Err(e) => {
                warn!(error = %e, "native stream failed");
                trace.record(TraceKind::Error, "Completion request failed", Some(json!({ "error": e.to_string() })));
                finish(
                    format!("Completion request failed: {}", e.detail()),
                    &state,
                    trace,
                    conversation,
                )
            }
        }
    }
}

fn finish(text: String, state: &TurnState, trace: Trace, conversation: Conversation) -> TurnOutcome {
    TurnOutcome {
        text,
        used_tools: state.used_tools,
        rounds: state.round,
        trace: trace.into_events(),
        messages: conversation.into_messages(),
    }
}
