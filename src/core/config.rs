//! Configuration management for stepwise
//!
//! Supports environment variables, config files, and runtime overrides.
//! The loaded `Config` is passed explicitly to whatever needs it.
//!
//! Config file location: ~/.config/stepwise/config.toml

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::error::{Result, StepwiseError};

/// Main configuration for stepwise
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Model endpoint configuration
    #[serde(default)]
    pub llm: LlmConfig,
    /// Execution agent configuration
    #[serde(default)]
    pub agent: AgentConfig,
    /// Planning flow configuration
    #[serde(default)]
    pub plan: PlanConfig,
    /// Browser configuration
    #[serde(default)]
    pub browser: BrowserConfig,
    /// Web search configuration
    #[serde(default)]
    pub search: SearchConfig,
}

/// Model endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Model identifier sent with every request
    pub model: String,
    /// Base URL of an OpenAI-compatible API (without `/chat/completions`)
    pub base_url: String,
    /// Bearer token; usually supplied through the environment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Maximum tokens to generate per response
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Per-attempt request timeout in seconds
    pub timeout_secs: u64,
    /// Maximum attempts per model call (first try included)
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds
    pub retry_base_ms: u64,
    /// Upper bound for a single retry delay, in milliseconds
    pub retry_max_ms: u64,
    /// Estimated token budget for one formatted request
    pub token_budget: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: env::var("STEPWISE_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            base_url: env::var("STEPWISE_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            api_key: env::var("STEPWISE_API_KEY")
                .or_else(|_| env::var("OPENAI_API_KEY"))
                .ok(),
            max_tokens: 4096,
            temperature: 0.0,
            timeout_secs: 120,
            max_attempts: 6,
            retry_base_ms: 1000,
            retry_max_ms: 60_000,
            token_budget: 100_000,
        }
    }
}

/// Agent behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum think/act steps per run
    /// Default: 20
    pub max_steps: usize,
    /// Maximum messages kept in memory (0 = unbounded)
    pub max_history: usize,
    /// Consecutive turns without tool calls before the run is stopped
    pub stuck_threshold: usize,
    /// Timeout for a single tool invocation in seconds
    pub tool_timeout_secs: u64,
    /// Where file-producing tools write by default
    pub output_dir: PathBuf,
    /// Whether to show debug output
    pub debug: bool,
    /// System prompt override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 20,
            max_history: 0,
            stuck_threshold: 3,
            tool_timeout_secs: 120,
            output_dir: PathBuf::from("output"),
            debug: env::var("STEPWISE_DEBUG")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            system_prompt: None,
        }
    }
}

/// Which driver handles a request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowType {
    /// A single execution agent
    #[default]
    Agent,
    /// Plan first, then run one agent per step
    Planning,
}

impl std::str::FromStr for FlowType {
    type Err = StepwiseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "agent" => Ok(FlowType::Agent),
            "planning" | "plan" => Ok(FlowType::Planning),
            other => Err(StepwiseError::config(format!("Unknown flow type: {}", other))),
        }
    }
}

impl std::fmt::Display for FlowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowType::Agent => f.write_str("agent"),
            FlowType::Planning => f.write_str("planning"),
        }
    }
}

/// Planning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    /// Flow selector
    pub flow: FlowType,
    /// Ready steps executed at the same time
    pub max_concurrency: usize,
    /// Retries granted to one failing step before the plan aborts
    pub max_step_retries: u32,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            flow: env::var("STEPWISE_FLOW")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            max_concurrency: 4,
            max_step_retries: 2,
        }
    }
}

/// Browser automation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Whether the browser tool is registered
    pub enabled: bool,
    /// Session name for agent-browser
    pub session_name: String,
    /// Whether to run in headed mode (visible browser)
    pub headed: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: env::var("STEPWISE_BROWSER_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            session_name: env::var("STEPWISE_BROWSER_SESSION")
                .unwrap_or_else(|_| "stepwise".to_string()),
            headed: false,
        }
    }
}

/// Web search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Whether the web search tool is registered
    pub enabled: bool,
    /// HTML search endpoint queried with `?q=`
    pub endpoint: String,
    /// Results returned when the model does not ask for a number
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: env::var("STEPWISE_SEARCH_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            endpoint: "https://html.duckduckgo.com/html/".to_string(),
            max_results: 5,
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stepwise")
    }

    /// Get the config file path
    pub fn config_file() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from file, environment, and defaults
    /// Priority: CLI args > config file > env vars > defaults
    ///
    /// A missing config file means defaults; a file that is present but
    /// unreadable or invalid is an error.
    pub fn load() -> Result<Self> {
        // Try to load .env file if it exists
        let _ = dotenvy::dotenv();
        Self::load_or_default(&Self::config_file())
    }

    /// Load `path`, or the defaults when it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(path)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(StepwiseError::config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| StepwiseError::config(format!("Failed to read config: {}", e)))?;

        let config = Self::from_toml(&content).map_err(|e| match e {
            StepwiseError::Config(msg) => {
                StepwiseError::config(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| StepwiseError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.llm.base_url).map_err(|e| {
            StepwiseError::config(format!("Invalid base_url '{}': {}", self.llm.base_url, e))
        })?;

        if self.llm.max_attempts == 0 {
            return Err(StepwiseError::config("llm.max_attempts must be at least 1"));
        }
        if self.agent.max_steps == 0 {
            return Err(StepwiseError::config("agent.max_steps must be at least 1"));
        }
        if self.search.enabled {
            url::Url::parse(&self.search.endpoint).map_err(|e| {
                StepwiseError::config(format!(
                    "Invalid search.endpoint '{}': {}",
                    self.search.endpoint, e
                ))
            })?;
        }
        if self.plan.max_concurrency == 0 {
            return Err(StepwiseError::config(
                "plan.max_concurrency must be at least 1",
            ));
        }
        Ok(())
    }

    /// Per-attempt model request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.timeout_secs)
    }

    /// Timeout for one tool invocation
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.tool_timeout_secs)
    }

    /// The chat completions URL derived from `base_url`
    pub fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.llm.base_url.trim_end_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.agent.max_steps, 20);
        assert_eq!(config.plan.max_concurrency, 4);
        assert!(config.llm.max_attempts >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml(
            r#"
            [llm]
            model = "local-model"
            base_url = "http://localhost:11434/v1"

            [agent]
            max_steps = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.llm.model, "local-model");
        assert_eq!(config.agent.max_steps, 7);
        assert_eq!(config.agent.stuck_threshold, 3);
        assert_eq!(
            config.completions_url(),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let err = Config::from_toml(
            r#"
            [llm]
            base_url = "not a url"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, StepwiseError::Config(_)));
    }

    #[test]
    fn test_flow_type_parse() {
        assert_eq!("planning".parse::<FlowType>().unwrap(), FlowType::Planning);
        assert_eq!("Agent".parse::<FlowType>().unwrap(), FlowType::Agent);
        assert!("swarm".parse::<FlowType>().is_err());
    }

    #[test]
    fn test_missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.agent.max_steps, 20);
    }

    #[test]
    fn test_broken_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        fs::write(&path, "[llm\nmodel = 'x'").unwrap();
        let err = Config::load_or_default(&path).unwrap_err();
        assert!(matches!(err, StepwiseError::Config(_)));
        assert!(err.to_string().contains("config.toml"));

        fs::write(&path, "[llm]\nbase_url = 'not a url'\n").unwrap();
        assert!(Config::load_or_default(&path).is_err());

        fs::write(&path, "[agent]\nmax_steps = 9\n").unwrap();
        assert_eq!(Config::load_or_default(&path).unwrap().agent.max_steps, 9);
    }

    #[test]
    fn test_config_dir() {
        let dir = Config::config_dir();
        assert!(dir.to_string_lossy().contains("stepwise"));
    }
}
