//! Relaybot Configuration
//!
//! TOML configuration loading and validation

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";
pub const DEFAULT_INFERENCE_BASE_URL: &str = "https://api.a4f.co/v1";
pub const DEFAULT_INFERENCE_MODEL: &str = "provider-3/gemini-2.5-pro-preview-06-05";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,
    pub telegram: TelegramConfig,
    pub inference: InferenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoreConfig {
    pub data_dir: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    #[serde(default)]
    pub api_url: Option<String>,
}

impl TelegramConfig {
    pub fn api_url(&self) -> &str {
        self.api_url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .unwrap_or(DEFAULT_TELEGRAM_API_URL)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub api_key: String,
    #[serde(default = "default_inference_base_url")]
    pub base_url: String,
    #[serde(default = "default_inference_model")]
    pub model: String,
    /// Absent means the completion call may block indefinitely.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub detect_image_type: bool,
}

fn default_poll_timeout_secs() -> u64 {
    60
}

fn default_inference_base_url() -> String {
    DEFAULT_INFERENCE_BASE_URL.to_string()
}

fn default_inference_model() -> String {
    DEFAULT_INFERENCE_MODEL.to_string()
}

/// Numeric bot id prefix of a Telegram token, used as a log tag.
pub fn telegram_account_tag(bot_token: &str) -> String {
    let token = bot_token.trim();
    token.split(':').next().unwrap_or(token).trim().to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("relaybot").join("config.toml"))
    }

    pub fn data_dir(&self) -> PathBuf {
        match self.core.data_dir.as_deref() {
            Some("~") => dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")),
            Some(dir) if dir.starts_with("~/") => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(dir.trim_start_matches("~/")),
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".relaybot"),
        }
    }

    pub fn log_level(&self) -> &str {
        self.core.log_level.as_deref().unwrap_or("info")
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let token = self.telegram.bot_token.trim();
        if token.is_empty() {
            anyhow::bail!("telegram.bot_token cannot be empty");
        }
        match token.split_once(':') {
            Some((id, secret))
                if !id.is_empty()
                    && id.chars().all(|c| c.is_ascii_digit())
                    && !secret.is_empty() => {}
            _ => anyhow::bail!("telegram.bot_token must look like '<bot_id>:<secret>'"),
        }
        if self.telegram.poll_timeout_secs == 0 {
            anyhow::bail!("telegram.poll_timeout_secs must be greater than zero");
        }
        if let Some(api_url) = &self.telegram.api_url {
            validate_http_url("telegram.api_url", api_url)?;
        }

        if self.inference.api_key.trim().is_empty() {
            anyhow::bail!("inference.api_key cannot be empty");
        }
        if self.inference.model.trim().is_empty() {
            anyhow::bail!("inference.model cannot be empty");
        }
        validate_http_url("inference.base_url", &self.inference.base_url)?;
        if self.inference.request_timeout_secs == Some(0) {
            anyhow::bail!("inference.request_timeout_secs must be greater than zero when set");
        }

        Ok(())
    }

    /// Copy of the config with every secret replaced, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.telegram.bot_token = format!(
            "{}:***REDACTED***",
            telegram_account_tag(&self.telegram.bot_token)
        );
        copy.inference.api_key = "***REDACTED***".to_string();
        copy
    }
}

fn validate_http_url(field: &str, value: &str) -> anyhow::Result<()> {
    let parsed = url::Url::parse(value.trim())
        .map_err(|e| anyhow::anyhow!("{} '{}' is not a valid URL: {}", field, value, e))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => anyhow::bail!("{} must use http or https, got '{}'", field, other),
    }
}
