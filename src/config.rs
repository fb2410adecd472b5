//! Configuration loader and validator for the study material pipeline.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Environment variable that overrides `ai.api_key`.
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub ai: Ai,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Chat-completion provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ai {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub question_model: String,
    pub overview_model: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub referer: Option<String>,
    #[serde(default)]
    pub app_title: Option<String>,
}

fn default_timeout_seconds() -> u64 {
    120
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Default SQLite location inside the data directory.
    pub fn database_url(&self) -> String {
        format!(
            "sqlite://{}/studyflow.db",
            self.app.data_dir.trim_end_matches('/')
        )
    }
}

/// Load configuration from a YAML file, apply environment overrides and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    apply_env(&mut cfg, std::env::var(API_KEY_ENV).ok());
    validate(&cfg)?;
    Ok(cfg)
}

fn apply_env(cfg: &mut Config, api_key: Option<String>) {
    if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
        cfg.ai.api_key = key;
    }
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if cfg.ai.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "ai.api_key must be non-empty (or set OPENROUTER_API_KEY)",
        ));
    }
    if reqwest::Url::parse(&cfg.ai.base_url).is_err() {
        return Err(ConfigError::Invalid("ai.base_url must be an absolute URL"));
    }
    if cfg.ai.question_model.trim().is_empty() {
        return Err(ConfigError::Invalid("ai.question_model must be non-empty"));
    }
    if cfg.ai.overview_model.trim().is_empty() {
        return Err(ConfigError::Invalid("ai.overview_model must be non-empty"));
    }
    if cfg.ai.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("ai.timeout_seconds must be > 0"));
    }

    Ok(())
}

/// Returns the example YAML content.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

ai:
  base_url: "https://openrouter.ai/api/v1/"
  api_key: "YOUR_OPENROUTER_API_KEY"
  question_model: "openai/gpt-4o-mini"
  overview_model: "openai/gpt-4o-mini"
  timeout_seconds: 120
  referer: "http://localhost:4200"
  app_title: "Study Buddy"
"#
}
