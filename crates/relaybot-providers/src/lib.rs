//! Relaybot Providers
//!
//! OpenAI-compatible chat-completion client (blocking) and the translator
//! that turns chat input into a single multimodal request

pub mod translator;

pub use translator::{
    image_data_uri, sniff_image_media_type, RequestTranslator, DEFAULT_IMAGE_PROMPT,
};

use relaybot_config::InferenceConfig;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn user(content: MessageContent) -> Self {
        Self {
            role: "user".to_string(),
            content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("inference request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("inference HTTP {status} at {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },
    #[error("inference response decode failed: {0}")]
    Decode(String),
    #[error("inference API error: {0}")]
    Api(String),
    #[error("inference response has no reply text")]
    EmptyReply,
}

/// Synchronous chat-completion backend.
///
/// Implementations block the calling thread for the whole network round
/// trip, so async callers must run them on a blocking worker.
pub trait InferenceClient: Send + Sync {
    fn name(&self) -> &str;
    fn complete(&self, request: &InferenceRequest) -> Result<String, InferenceError>;
}

pub struct OpenAICompatibleClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAICompatibleClient {
    /// Builds the blocking HTTP client. Must not be called from inside an
    /// async runtime context.
    pub fn new(
        api_key: String,
        base_url: String,
        request_timeout: Option<Duration>,
    ) -> Result<Self, InferenceError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &InferenceConfig) -> Result<Self, InferenceError> {
        Self::new(
            config.api_key.clone(),
            config.base_url.clone(),
            config.request_timeout_secs.map(Duration::from_secs),
        )
    }

    fn truncate_for_error(text: &str, max_chars: usize) -> String {
        if text.chars().count() <= max_chars {
            text.to_string()
        } else {
            let truncated: String = text.chars().take(max_chars).collect();
            format!("{}...", truncated)
        }
    }

    fn parse_response(response: serde_json::Value) -> Result<String, InferenceError> {
        if let Some(error) = response.get("error") {
            let detail = error
                .get("message")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| error.to_string());
            return Err(InferenceError::Api(detail));
        }

        let choices = response
            .get("choices")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                InferenceError::Decode("missing 'choices' array in provider response".to_string())
            })?;

        let message = choices
            .first()
            .ok_or(InferenceError::EmptyReply)?
            .get("message")
            .ok_or_else(|| {
                InferenceError::Decode("missing 'message' object in provider response".to_string())
            })?;

        match message.get("content") {
            Some(serde_json::Value::String(content)) if !content.is_empty() => {
                Ok(content.clone())
            }
            // Some gateways answer with typed content parts instead of a string.
            Some(serde_json::Value::Array(items)) => {
                let parts: Vec<&str> = items
                    .iter()
                    .filter_map(|item| item.get("text").and_then(|v| v.as_str()))
                    .filter(|text| !text.is_empty())
                    .collect();
                if parts.is_empty() {
                    Err(InferenceError::EmptyReply)
                } else {
                    Ok(parts.join("\n"))
                }
            }
            _ => Err(InferenceError::EmptyReply),
        }
    }
}

impl InferenceClient for OpenAICompatibleClient {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    fn complete(&self, request: &InferenceRequest) -> Result<String, InferenceError> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()?;

        let status = response.status();
        let raw_body = response.text()?;

        if !status.is_success() {
            let body = Self::truncate_for_error(&raw_body, 600);
            tracing::warn!(
                status = status.as_u16(),
                model = %request.model,
                "Inference endpoint returned an error status"
            );
            return Err(InferenceError::Status {
                status: status.as_u16(),
                url,
                body,
            });
        }

        let parsed: serde_json::Value = serde_json::from_str(&raw_body).map_err(|e| {
            InferenceError::Decode(format!(
                "{} | body={}",
                e,
                Self::truncate_for_error(&raw_body, 600)
            ))
        })?;

        Self::parse_response(parsed)
    }
}
