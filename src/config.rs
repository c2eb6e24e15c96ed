//! Configuration management for Scout Agent.
//!
//! Configuration can be set via environment variables:
//! - `OLLAMA_URL` - Optional. Base URL of the Ollama server. Defaults to `http://localhost:11434`.
//! - `DEFAULT_MODEL` - Optional. The model to plan with. Defaults to `qwen3:8b`.
//! - `SANDBOX_PATH` - Optional. Directory all file writes and script runs are confined to. Defaults to `./code_output`.
//! - `MAX_ITERATIONS` - Optional. Maximum agent loop iterations. Defaults to `20`.
//! - `SEARCH_BASE_URL` - Optional. Shop the product search tool queries. Defaults to `https://www.foxtrot.com.ua`.
//! - `WIKIPEDIA_BASE_URL` - Optional. Wiki the Wikipedia tools query. Defaults to `https://en.wikipedia.org`.
//! - `ARXIV_BASE_URL` - Optional. arXiv API host. Defaults to `https://export.arxiv.org`.
//! - `SCRIPT_INTERPRETER` - Optional. Program that runs scripts. Defaults to `python3`.
//!
//! The tool time limits are not configurable from the environment.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Settings handed to the built-in tools at construction.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    /// Shop base URL; search pages and product links are built from it
    pub search_base_url: String,

    /// Wall-clock limit for one request by any of the web tools
    pub search_timeout: Duration,

    /// Wikipedia site; the action API lives at `/w/api.php` under it
    pub wikipedia_base_url: String,

    /// arXiv API host; searches go to `/api/query` under it
    pub arxiv_base_url: String,

    /// Papers returned when the engine does not ask for a number
    pub arxiv_max_results: usize,

    /// Unit appended to extracted prices
    pub currency: String,

    /// Program invoked as `<interpreter> <script path>`
    pub script_interpreter: String,

    /// Wall-clock limit for one script run
    pub script_timeout: Duration,

    /// Captured script output beyond this many characters is cut off
    pub max_output_chars: usize,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            search_base_url: "https://www.foxtrot.com.ua".to_string(),
            search_timeout: Duration::from_secs(20),
            wikipedia_base_url: "https://en.wikipedia.org".to_string(),
            arxiv_base_url: "https://export.arxiv.org".to_string(),
            arxiv_max_results: 3,
            currency: "UAH".to_string(),
            script_interpreter: "python3".to_string(),
            script_timeout: Duration::from_secs(30),
            max_output_chars: 10_000,
        }
    }
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Ollama server base URL
    pub ollama_url: String,

    /// Model identifier (Ollama tag)
    pub default_model: String,

    /// Request timeout for one engine round trip
    pub llm_timeout: Duration,

    /// Sandbox directory for file writes and script runs
    pub sandbox_path: PathBuf,

    /// Maximum planning iterations for the agent loop
    pub max_iterations: usize,

    /// Built-in tool settings
    pub tools: ToolSettings,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if `MAX_ITERATIONS` is not a positive integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::new(
            std::env::var("SANDBOX_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./code_output")),
        );

        if let Ok(url) = std::env::var("OLLAMA_URL") {
            config.ollama_url = url;
        }

        if let Ok(model) = std::env::var("DEFAULT_MODEL") {
            config.default_model = model;
        }

        if let Ok(raw) = std::env::var("MAX_ITERATIONS") {
            config.max_iterations = parse_iterations(&raw)
                .map_err(|e| ConfigError::InvalidValue("MAX_ITERATIONS".to_string(), e))?;
        }

        if let Ok(url) = std::env::var("SEARCH_BASE_URL") {
            config.tools.search_base_url = url;
        }

        if let Ok(url) = std::env::var("WIKIPEDIA_BASE_URL") {
            config.tools.wikipedia_base_url = url;
        }

        if let Ok(url) = std::env::var("ARXIV_BASE_URL") {
            config.tools.arxiv_base_url = url;
        }

        if let Ok(interpreter) = std::env::var("SCRIPT_INTERPRETER") {
            config.tools.script_interpreter = interpreter;
        }

        Ok(config)
    }

    /// Create a config with default values (useful for testing).
    pub fn new(sandbox_path: PathBuf) -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            default_model: "qwen3:8b".to_string(),
            llm_timeout: Duration::from_secs(300),
            sandbox_path,
            max_iterations: 20,
            tools: ToolSettings::default(),
        }
    }
}

fn parse_iterations(value: &str) -> Result<usize, String> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("{}", e)),
    }
}
