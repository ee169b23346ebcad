//! toolrelay - tool-calling relay between a chat model and your tools
//!
//! Main entry point for the CLI application.

use clap::Parser;
use std::path::PathBuf;
use toolrelay::agent::FileSessionStore;
use toolrelay::{Config, Repl, Session};

/// toolrelay - run tool-calling turns against an OpenAI-compatible endpoint
#[derive(Parser, Debug)]
#[command(name = "toolrelay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model identifier
    #[arg(long, short = 'm')]
    model: Option<String>,

    /// OpenAI-compatible base URL (e.g. http://localhost:1234/v1)
    #[arg(long)]
    base_url: Option<String>,

    /// Base URL of the native streaming API
    #[arg(long)]
    native_base_url: Option<String>,

    /// MCP gateway URL (enables remote tools)
    #[arg(long)]
    mcp_url: Option<String>,

    /// Disable remote tools
    #[arg(long)]
    no_mcp: bool,

    /// Disable the local shell tool
    #[arg(long)]
    no_shell: bool,

    /// Stream from the native endpoint instead of tool calling
    #[arg(long)]
    native: bool,

    /// Maximum tool-calling rounds per turn
    #[arg(long)]
    max_rounds: Option<usize>,

    /// Workspace root for local commands
    #[arg(long, short = 'w')]
    workspace: Option<PathBuf>,

    /// Append messages and traces to this JSON-lines file
    #[arg(long)]
    session: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'd')]
    debug: bool,

    /// Single prompt mode (non-interactive)
    #[arg(long, short = 'p')]
    prompt: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(model) = &self.model {
            config.endpoint.model = model.clone();
        }
        if let Some(url) = &self.base_url {
            config.endpoint.base_url = url.clone();
        }
        if let Some(url) = &self.native_base_url {
            config.endpoint.native_base_url = url.clone();
        }
        if let Some(url) = &self.mcp_url {
            config.mcp.url = url.clone();
            config.mcp.enabled = true;
        }
        if self.no_mcp {
            config.mcp.enabled = false;
        }
        if self.no_shell {
            config.shell.enabled = false;
        }
        if self.native {
            config.endpoint.native_streaming = true;
        }
        if let Some(rounds) = self.max_rounds {
            config.agent.max_rounds = rounds;
        }
        if let Some(workspace) = &self.workspace {
            config.shell.workspace_root = Some(workspace.clone());
        }
        if self.debug {
            config.agent.debug = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _ = dotenvy::dotenv();

    // Installed before loading config so problems with the config file get reported
    let debug = args.debug
        || std::env::var("TOOLRELAY_DEBUG").is_ok_and(|v| v == "true" || v == "1");
    let filter = if debug { "toolrelay=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Build configuration
    let mut config = Config::load();
    args.apply(&mut config);

    config.validate()?;

    let mut session = Session::new(config)?;
    if let Some(path) = &args.session {
        session = session.with_store(FileSessionStore::new(path));
    }

    // Single prompt mode
    if let Some(prompt) = args.prompt {
        let outcome = session.ask(&prompt).await?;
        println!("{}", outcome.text);
        return Ok(());
    }

    // Interactive REPL mode
    Repl::new(session).run().await?;

    Ok(())
}
