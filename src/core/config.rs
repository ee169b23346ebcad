//! Configuration management for toolrelay
//!
//! Supports environment variables, config files, and runtime overrides.
//!
//! Config file location: ~/.config/toolrelay/config.toml

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use tracing::warn;
use url::Url;

use crate::core::error::{RelayError, Result};

/// Tool names reserved for gateway-internal execution proxies. Never exposed to the model.
pub const DEFAULT_EXCLUDED_TOOLS: [&str; 2] = ["run_host_command", "run_host_script"];

/// Main configuration for toolrelay
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Completion endpoint configuration
    #[serde(default)]
    pub endpoint: EndpointConfig,
    /// Remote tool gateway configuration
    #[serde(default)]
    pub mcp: McpConfig,
    /// Local shell tool configuration
    #[serde(default)]
    pub shell: ShellConfig,
    /// Orchestration loop configuration
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Chat completion endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// OpenAI-compatible base URL (`{base}/chat/completions`, `{base}/models`)
    pub base_url: String,
    /// Base URL of the native streaming API (`{native}/api/v1/chat`)
    pub native_base_url: String,
    /// Bearer credential, if the endpoint needs one
    pub api_key: Option<String>,
    /// Model identifier
    pub model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// HTTP request timeout in seconds
    pub timeout_secs: u64,
    /// Use the native streaming endpoint instead of tool calling
    pub native_streaming: bool,
}

/// Remote tool gateway (MCP over streamable HTTP) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    /// Whether remote tools are offered to the model
    pub enabled: bool,
    /// Gateway endpoint URL
    pub url: String,
    /// Bearer credential for the gateway
    pub api_key: Option<String>,
    /// Hard per-call deadline in seconds
    pub timeout_secs: u64,
    /// Remote tool names that are never exposed to the model
    pub excluded_tools: Vec<String>,
}

/// Local shell tool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Whether the local command tool is exposed
    pub enabled: bool,
    /// Directory relative working directories resolve against (default: current dir)
    pub workspace_root: Option<PathBuf>,
    /// Timeout used when the model does not ask for one
    pub default_timeout_secs: u64,
    /// Upper bound for requested timeouts
    pub max_timeout_secs: u64,
    /// Per-stream output cap used when the model does not ask for one
    pub default_max_output_chars: usize,
    /// Upper bound for requested output caps
    pub max_output_chars: usize,
}

/// Orchestration loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum completion rounds per turn
    /// Default: 4
    pub max_rounds: usize,
    /// Whether to log debug output
    pub debug: bool,
    /// System prompt prepended to every turn
    pub system_prompt: Option<String>,
    /// Maximum serialized size of a trace event's details
    pub trace_detail_chars: usize,
    /// Messages kept in interactive history
    pub max_history: usize,
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

fn parsed<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: env::var("TOOLRELAY_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:1234/v1".to_string()),
            native_base_url: env::var("TOOLRELAY_NATIVE_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:1234".to_string()),
            api_key: env::var("TOOLRELAY_API_KEY").ok().filter(|k| !k.is_empty()),
            model: env::var("TOOLRELAY_MODEL").unwrap_or_default(),
            temperature: env_parse("TOOLRELAY_TEMPERATURE").unwrap_or(0.2),
            max_tokens: env_parse("TOOLRELAY_MAX_TOKENS"),
            timeout_secs: 120,
            native_streaming: env_flag("TOOLRELAY_NATIVE_STREAMING", false),
        }
    }
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            enabled: env_flag("TOOLRELAY_MCP_ENABLED", false),
            url: env::var("TOOLRELAY_MCP_URL")
                .unwrap_or_else(|_| "http://localhost:8765/mcp".to_string()),
            api_key: env::var("TOOLRELAY_MCP_API_KEY").ok().filter(|k| !k.is_empty()),
            timeout_secs: 15,
            excluded_tools: DEFAULT_EXCLUDED_TOOLS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            enabled: env_flag("TOOLRELAY_SHELL_ENABLED", true),
            workspace_root: env::var("TOOLRELAY_WORKSPACE").ok().map(PathBuf::from),
            default_timeout_secs: 60,
            max_timeout_secs: 900,
            default_max_output_chars: 20_000,
            max_output_chars: 200_000,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: env_parse("TOOLRELAY_MAX_ROUNDS").unwrap_or(4),
            debug: env_flag("TOOLRELAY_DEBUG", false),
            system_prompt: None,
            trace_detail_chars: 4000,
            max_history: 200,
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("toolrelay")
    }

    /// Get the config file path
    pub fn config_file() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from file, environment, and defaults
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load() -> Self {
        // Try to load .env file if it exists
        let _ = dotenvy::dotenv();

        let mut config = match Self::load_from_file() {
            Ok(config) => config,
            Err(e) => {
                if Self::config_file().exists() {
                    warn!(error = %e, path = %Self::config_file().display(), "ignoring config file");
                }
                Self::default()
            }
        };

        // Environment wins over the file
        config.apply_env();
        config
    }

    /// Override loaded values with `TOOLRELAY_*` environment variables
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| env::var(name).ok());
    }

    /// Override loaded values from `lookup`; unset, empty or unparsable values are ignored
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let text = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let flag = |name: &str| text(name).map(|v| v == "true" || v == "1");

        if let Some(v) = text("TOOLRELAY_BASE_URL") {
            self.endpoint.base_url = v;
        }
        if let Some(v) = text("TOOLRELAY_NATIVE_BASE_URL") {
            self.endpoint.native_base_url = v;
        }
        if let Some(v) = text("TOOLRELAY_API_KEY") {
            self.endpoint.api_key = Some(v);
        }
        if let Some(v) = text("TOOLRELAY_MODEL") {
            self.endpoint.model = v;
        }
        if let Some(v) = parsed(text("TOOLRELAY_TEMPERATURE")) {
            self.endpoint.temperature = v;
        }
        if let Some(v) = parsed(text("TOOLRELAY_MAX_TOKENS")) {
            self.endpoint.max_tokens = Some(v);
        }
        if let Some(v) = flag("TOOLRELAY_NATIVE_STREAMING") {
            self.endpoint.native_streaming = v;
        }
        if let Some(v) = flag("TOOLRELAY_MCP_ENABLED") {
            self.mcp.enabled = v;
        }
        if let Some(v) = text("TOOLRELAY_MCP_URL") {
            self.mcp.url = v;
        }
        if let Some(v) = text("TOOLRELAY_MCP_API_KEY") {
            self.mcp.api_key = Some(v);
        }
        if let Some(v) = flag("TOOLRELAY_SHELL_ENABLED") {
            self.shell.enabled = v;
        }
        if let Some(v) = text("TOOLRELAY_WORKSPACE") {
            self.shell.workspace_root = Some(PathBuf::from(v));
        }
        if let Some(v) = parsed(text("TOOLRELAY_MAX_ROUNDS")) {
            self.agent.max_rounds = v;
        }
        if let Some(v) = flag("TOOLRELAY_DEBUG") {
            self.agent.debug = v;
        }
    }

    /// Load configuration from file only
    pub fn load_from_file() -> Result<Self> {
        let config_path = Self::config_file();

        if !config_path.exists() {
            return Err(RelayError::config("Config file not found"));
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|e| RelayError::config(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text; missing sections take their defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| RelayError::config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<PathBuf> {
        let config_dir = Self::config_dir();
        let config_path = Self::config_file();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .map_err(|e| RelayError::config(format!("Failed to create config dir: {}", e)))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| RelayError::config(format!("Failed to serialize config: {}", e)))?;

        fs::write(&config_path, content)
            .map_err(|e| RelayError::config(format!("Failed to write config: {}", e)))?;

        Ok(config_path)
    }

    /// Check that everything a turn needs before touching the network is present
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.model.trim().is_empty() {
            return Err(RelayError::config(
                "No model configured (set endpoint.model or TOOLRELAY_MODEL)",
            ));
        }

        if self.endpoint.native_streaming {
            check_http_url("endpoint.native_base_url", &self.endpoint.native_base_url)
        } else {
            check_http_url("endpoint.base_url", &self.endpoint.base_url)
        }
    }

    /// Round budget per turn, never below one
    pub fn max_rounds(&self) -> usize {
        self.agent.max_rounds.max(1)
    }

    /// Root directory for the local shell tool
    pub fn workspace_root(&self) -> PathBuf {
        self.shell
            .workspace_root
            .clone()
            .or_else(|| env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Whether any tool source is switched on
    pub fn tools_enabled(&self) -> bool {
        self.shell.enabled || self.mcp.enabled
    }

    /// Generate a default config file content for display
    pub fn default_config_toml() -> String {
        toml::to_string_pretty(&Config::default())
            .unwrap_or_else(|_| String::from("# Error generating config"))
    }
}

fn check_http_url(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(RelayError::config(format!("{} is not set", field)));
    }

    let parsed = Url::parse(value.trim())
        .map_err(|e| RelayError::config(format!("{} is not a valid URL ({}): {}", field, e, value)))?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(RelayError::config(format!(
            "{} must use http or https, got '{}'",
            field, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.endpoint.base_url = "http://localhost:1234/v1".to_string();
        config.endpoint.model = "qwen2.5-7b-instruct".to_string();
        config.endpoint.native_streaming = false;
        config
    }

    #[test]
    fn test_default_sections() {
        let config = Config::default();
        assert_eq!(config.mcp.timeout_secs, 15);
        assert_eq!(config.shell.max_timeout_secs, 900);
        assert_eq!(config.shell.max_output_chars, 200_000);
        assert_eq!(config.agent.trace_detail_chars, 4000);
        assert!(config
            .mcp
            .excluded_tools
            .contains(&"run_host_command".to_string()));
    }

    #[test]
    fn test_validate_requires_model() {
        let mut config = valid_config();
        config.endpoint.model = "  ".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn test_validate_requires_base_url() {
        let mut config = valid_config();
        config.endpoint.base_url = String::new();
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));

        config.endpoint.base_url = "ftp://models.local".to_string();
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));
    }

    #[test]
    fn test_validate_native_mode_checks_native_url() {
        let mut config = valid_config();
        config.endpoint.native_streaming = true;
        config.endpoint.base_url = String::new();
        config.endpoint.native_base_url = "http://localhost:1234".to_string();
        assert!(config.validate().is_ok());

        config.endpoint.native_base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_rounds_minimum_one() {
        let mut config = valid_config();
        config.agent.max_rounds = 0;
        assert_eq!(config.max_rounds(), 1);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml(
            r#"
            [endpoint]
            model = "llama-3.1-8b"

            [agent]
            max_rounds = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.endpoint.model, "llama-3.1-8b");
        assert_eq!(config.agent.max_rounds, 7);
        assert_eq!(config.shell.max_timeout_secs, 900);
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config::from_toml(
            r#"
            [endpoint]
            model = "from-file"
            base_url = "http://file.local/v1"

            [mcp]
            url = "http://file.local/mcp"

            [agent]
            max_rounds = 7
            "#,
        )
        .unwrap();

        let env: std::collections::HashMap<&str, &str> = [
            ("TOOLRELAY_MODEL", "from-env"),
            ("TOOLRELAY_MCP_URL", "http://env.local/mcp"),
            ("TOOLRELAY_MCP_ENABLED", "1"),
            ("TOOLRELAY_MAX_ROUNDS", "not a number"),
            ("TOOLRELAY_BASE_URL", ""),
        ]
        .into_iter()
        .collect();
        config.apply_env_from(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.endpoint.model, "from-env");
        assert_eq!(config.mcp.url, "http://env.local/mcp");
        assert!(config.mcp.enabled);
        // unparsable and empty values leave the file's setting in place
        assert_eq!(config.agent.max_rounds, 7);
        assert_eq!(config.endpoint.base_url, "http://file.local/v1");
    }

    #[test]
    fn test_config_serialization() {
        let toml_str = Config::default_config_toml();
        assert!(toml_str.contains("[endpoint]"));
        assert!(toml_str.contains("excluded_tools"));
    }

    #[test]
    fn test_config_dir() {
        let dir = Config::config_dir();
        assert!(dir.to_string_lossy().contains("toolrelay"));
    }
}
