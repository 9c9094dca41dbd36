//! Configuration loader and validator for the check-in bot.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

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
    pub channel: Channel,
    pub recognizer: Recognizer,
    pub messages: Messages,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub bind_addr: String,
}

/// Messaging-gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    pub gateway_url: String,
    pub api_token: Option<String>,
    pub country_code: String,
    pub send_interval_ms: u64,
}

/// Face-recognition service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recognizer {
    pub service_url: String,
}

/// Default message templates. `{name}` and `{seat}` are the recognized
/// placeholders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Messages {
    pub checkin_caption: String,
    pub broadcast_text: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.bind_addr.trim().is_empty() {
        return Err(ConfigError::Invalid("app.bind_addr must be non-empty"));
    }

    if cfg.channel.gateway_url.trim().is_empty() {
        return Err(ConfigError::Invalid("channel.gateway_url must be non-empty"));
    }
    if cfg.channel.country_code.is_empty() || !cfg.channel.country_code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ConfigError::Invalid("channel.country_code must be a digit string"));
    }
    if cfg.channel.send_interval_ms == 0 {
        return Err(ConfigError::Invalid("channel.send_interval_ms must be > 0"));
    }

    if cfg.recognizer.service_url.trim().is_empty() {
        return Err(ConfigError::Invalid("recognizer.service_url must be non-empty"));
    }

    if cfg.messages.checkin_caption.trim().is_empty() {
        return Err(ConfigError::Invalid("messages.checkin_caption must be non-empty"));
    }
    if cfg.messages.broadcast_text.trim().is_empty() {
        return Err(ConfigError::Invalid("messages.broadcast_text must be non-empty"));
    }

    Ok(())
}

/// Returns an example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  bind_addr: "127.0.0.1:8000"

channel:
  gateway_url: "http://127.0.0.1:3333"
  api_token: null
  country_code: "91"
  send_interval_ms: 4000

recognizer:
  service_url: "http://127.0.0.1:5001"

messages:
  checkin_caption: "Dear {name} San\n\n*Access Granted*\nSeat: {seat}\n\nEnjoy the day!"
  broadcast_text: "Hello {name}, welcome! Your seat is {seat}."
"#
}
