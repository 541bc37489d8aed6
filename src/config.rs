use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use axum::http::HeaderValue;
use thiserror::Error;

use crate::models::GenerationConfig;

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 200;
pub const DEFAULT_PORT: u16 = 4000;
pub const DEFAULT_ORIGINS: [&str; 2] = ["http://localhost:5173", "http://localhost:8080"];

/// Sent as Gemini `systemInstruction` unless replaced or cleared.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly Medical Assistant chatbot designed to answer health-related questions.
Follow these rules:
1. For greetings like 'hello', 'hi', or 'hey', respond with 'Hi! I'm your Medical Assistant, ready to help with health questions.'
2. For questions about yourself (e.g., 'who are you', 'tell me about yourself'), introduce yourself as: 'I'm a Medical Assistant chatbot, built to answer your health questions using reliable medical information.'
3. For vague queries (e.g., 'more', 'anything else'), refer to the conversation history to continue the previous topic or ask for clarification if no history exists.
4. For health-related questions, answer concisely and accurately. Include all relevant information, such as specific drug names and their side effects.
5. If the question includes 'in points' or similar, format the answer as bullet points, one per line, each starting with '* '.
6. If you have no reliable information for a health question, respond with 'I don't know.'
7. Keep answers clear, natural, and avoid mentioning sources directly.";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
  #[error("GEMINI_API_KEY is not set")]
  MissingApiKey,

  #[error("temperature must be within 0.0..=2.0, got {0}")]
  InvalidTemperature(f32),

  #[error("max output tokens must be greater than zero")]
  InvalidMaxOutputTokens,

  #[error("invalid CORS origin: {0}")]
  InvalidOrigin(String),

  #[error("upstream timeout must be greater than zero seconds")]
  InvalidTimeout,
}

/// Options for the `serve` subcommand; every flag has an env fallback.
#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
  /// API key for the Gemini API.
  #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
  pub api_key: Option<String>,

  /// Interface to listen on.
  #[arg(long, env = "HOST", default_value = "0.0.0.0")]
  pub host: String,

  /// Port to listen on.
  #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
  pub port: u16,

  /// Gemini model identifier.
  #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_MODEL)]
  pub model: String,

  /// Base URL of the Gemini REST API, without the `/models/...` suffix.
  #[arg(long, env = "GEMINI_BASE_URL", default_value = DEFAULT_BASE_URL)]
  pub base_url: String,

  #[arg(long, env = "RELAY_TEMPERATURE", default_value_t = DEFAULT_TEMPERATURE)]
  pub temperature: f32,

  #[arg(long, env = "RELAY_MAX_OUTPUT_TOKENS", default_value_t = DEFAULT_MAX_OUTPUT_TOKENS)]
  pub max_output_tokens: u32,

  /// Origins allowed by CORS (comma separated).
  #[arg(
    long = "allowed-origin",
    env = "RELAY_ALLOWED_ORIGINS",
    value_delimiter = ',',
    default_values = DEFAULT_ORIGINS
  )]
  pub allowed_origins: Vec<String>,

  /// System instruction sent with every Gemini call. An empty value sends none.
  #[arg(
    long,
    env = "RELAY_SYSTEM_PROMPT",
    default_value = DEFAULT_SYSTEM_PROMPT,
    hide_default_value = true
  )]
  pub system_prompt: String,

  /// Give up on the provider after this many seconds. Unset means the HTTP client default.
  #[arg(long, env = "RELAY_UPSTREAM_TIMEOUT_SECS")]
  pub upstream_timeout_secs: Option<u64>,

  /// Also append log lines to this file.
  #[arg(long, env = "RELAY_LOG_FILE")]
  pub log_file: Option<PathBuf>,
}

#[derive(Clone)]
pub struct RelayConfig {
  pub api_key: String,
  pub host: String,
  pub port: u16,
  pub model: String,
  pub base_url: String,
  pub generation: GenerationConfig,
  pub allowed_origins: Vec<String>,
  pub upstream_timeout: Option<Duration>,
  pub system_prompt: Option<String>,
}

impl RelayConfig {
  /// Defaults everywhere except the key. Handy for tests and embedding.
  pub fn new(api_key: impl Into<String>) -> Self {
    Self {
      api_key: api_key.into(),
      host: "0.0.0.0".to_string(),
      port: DEFAULT_PORT,
      model: DEFAULT_MODEL.to_string(),
      base_url: DEFAULT_BASE_URL.to_string(),
      generation: GenerationConfig {
        temperature: DEFAULT_TEMPERATURE,
        max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
      },
      allowed_origins: DEFAULT_ORIGINS.iter().map(|o| o.to_string()).collect(),
      upstream_timeout: None,
      system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
    }
  }

  pub fn from_args(args: &ServeArgs) -> Result<Self, ConfigError> {
    let api_key = args
      .api_key
      .as_deref()
      .map(str::trim)
      .filter(|k| !k.is_empty())
      .ok_or(ConfigError::MissingApiKey)?;

    let config = Self {
      api_key: api_key.to_string(),
      host: args.host.clone(),
      port: args.port,
      model: args.model.trim().to_string(),
      base_url: args.base_url.trim().trim_end_matches('/').to_string(),
      generation: GenerationConfig {
        temperature: args.temperature,
        max_output_tokens: args.max_output_tokens,
      },
      allowed_origins: args
        .allowed_origins
        .iter()
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .collect(),
      upstream_timeout: match args.upstream_timeout_secs {
        Some(0) => return Err(ConfigError::InvalidTimeout),
        Some(secs) => Some(Duration::from_secs(secs)),
        None => None,
      },
      system_prompt: Some(args.system_prompt.trim())
        .filter(|p| !p.is_empty())
        .map(str::to_string),
    };
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.api_key.trim().is_empty() {
      return Err(ConfigError::MissingApiKey);
    }
    if !(0.0..=2.0).contains(&self.generation.temperature) {
      return Err(ConfigError::InvalidTemperature(self.generation.temperature));
    }
    if self.generation.max_output_tokens == 0 {
      return Err(ConfigError::InvalidMaxOutputTokens);
    }
    self.origin_headers()?;
    Ok(())
  }

  pub fn origin_headers(&self) -> Result<Vec<HeaderValue>, ConfigError> {
    self
      .allowed_origins
      .iter()
      .map(|o| HeaderValue::from_str(o).map_err(|_| ConfigError::InvalidOrigin(o.clone())))
      .collect()
  }

  pub fn bind_addr(&self) -> String {
    format!("{}:{}", self.host, self.port)
  }

  pub fn generate_url(&self) -> String {
    format!("{}/models/{}:generateContent", self.base_url, self.model)
  }
}

impl fmt::Debug for RelayConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RelayConfig")
      .field("api_key", &"<redacted>")
      .field("host", &self.host)
      .field("port", &self.port)
      .field("model", &self.model)
      .field("base_url", &self.base_url)
      .field("generation", &self.generation)
      .field("allowed_origins", &self.allowed_origins)
      .field("upstream_timeout", &self.upstream_timeout)
      .field("system_prompt", &self.system_prompt.as_ref().map(String::len))
      .finish()
  }
}
