//! Relaybot Telegram Adapter
//!
//! Telegram Bot API long-polling, update classification, plain-text replies
//! with chunking, typing indicator, and photo download

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use relaybot_config::{telegram_account_tag, TelegramConfig};
use relaybot_core::{BotCommand, ChatTransport, Dispatcher, ImageSource, InboundEvent};
use reqwest::{Client, ClientBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub photo: Option<Vec<TelegramPhotoSize>>,
    pub chat: TelegramChat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramPhotoSize {
    pub file_id: String,
    pub width: i64,
    pub height: i64,
    #[serde(default)]
    pub file_size: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TelegramFile {
    #[serde(default)]
    file_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramAdapter {
    client: Client,
    account_tag: String,
    api_url: String,
    file_url: String,
    poll_timeout_secs: u64,
    bot_username: Option<String>,
}

impl TelegramAdapter {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let base = config.api_url();
        let client = Self::build_client(config.poll_timeout_secs)?;

        Ok(Self {
            client,
            account_tag: telegram_account_tag(&config.bot_token),
            api_url: format!("{}/bot{}", base, config.bot_token),
            file_url: format!("{}/file/bot{}", base, config.bot_token),
            poll_timeout_secs: config.poll_timeout_secs,
            bot_username: None,
        })
    }

    /// Commands addressed to another bot (`/help@other_bot`) are ignored
    /// once the own username is known.
    pub fn with_bot_username(mut self, username: Option<String>) -> Self {
        self.bot_username = username;
        self
    }

    pub fn account_tag(&self) -> &str {
        &self.account_tag
    }

    fn build_client(poll_timeout_secs: u64) -> Result<Client> {
        ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(600))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .timeout(Duration::from_secs(poll_timeout_secs + 30))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow!("failed to build Telegram HTTP client: {}", e))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: &serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}/{}", self.api_url, method);
        let resp = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| anyhow!("telegram {} request failed: {}", method, e.without_url()))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let parsed: ApiResponse<T> = serde_json::from_str(&body).map_err(|e| {
            anyhow!(
                "telegram {} HTTP {} decode failed: {} | body={}",
                method,
                status,
                e,
                body.chars().take(400).collect::<String>()
            )
        })?;

        if !parsed.ok {
            return Err(anyhow!(
                "telegram {} HTTP {}: {}",
                method,
                status,
                parsed
                    .description
                    .unwrap_or_else(|| "ok=false".to_string())
            ));
        }

        parsed
            .result
            .ok_or_else(|| anyhow!("telegram {} returned no result", method))
    }

    pub async fn get_me(&self) -> Result<TelegramUser> {
        self.call("getMe", &serde_json::json!({})).await
    }

    pub async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<TelegramUpdate>> {
        let mut payload = serde_json::json!({
            "timeout": self.poll_timeout_secs,
            "allowed_updates": [],
        });

        if let Some(offset) = offset {
            payload["offset"] = serde_json::json!(offset);
        }

        self.call("getUpdates", &payload).await
    }

    /// Sends `text` in chunks of at most 4096 characters, replying to
    /// `reply_to` with the first one. Only a failure of the first chunk is an
    /// error; later chunks are best-effort.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<()> {
        let chunks = Self::chunk_message(text);

        for (i, chunk) in chunks.iter().enumerate() {
            let mut payload = serde_json::json!({
                "chat_id": chat_id,
                "text": chunk,
            });

            if let Some(reply_to_message_id) = reply_to {
                if i == 0 {
                    payload["reply_to_message_id"] = serde_json::json!(reply_to_message_id);
                }
            }

            if let Err(err) = self.send_with_reply_fallback(payload).await {
                if i == 0 {
                    return Err(err);
                }
                warn!(
                    chat_id,
                    chunk = i + 1,
                    chunks = chunks.len(),
                    error = %err,
                    "telegram sendMessage failed for a continuation chunk; sending the rest"
                );
            }
        }

        Ok(())
    }

    async fn send_with_reply_fallback(&self, payload: serde_json::Value) -> Result<()> {
        match self.call::<serde_json::Value>("sendMessage", &payload).await {
            Ok(_) => Ok(()),
            Err(err) if Self::is_reply_target_missing(&err.to_string()) => {
                let mut no_reply_payload = payload;
                if !Self::remove_reply_to_message_id(&mut no_reply_payload) {
                    return Err(err);
                }
                warn!(
                    "telegram sendMessage failed due to missing reply target; retrying without reply_to_message_id"
                );
                self.call::<serde_json::Value>("sendMessage", &no_reply_payload)
                    .await
                    .map(|_| ())
            }
            Err(err) => Err(err),
        }
    }

    fn remove_reply_to_message_id(payload: &mut serde_json::Value) -> bool {
        payload
            .as_object_mut()
            .map(|obj| obj.remove("reply_to_message_id").is_some())
            .unwrap_or(false)
    }

    fn is_reply_target_missing(body: &str) -> bool {
        body.to_ascii_lowercase()
            .contains("message to be replied not found")
    }

    pub async fn send_chat_action(&self, chat_id: i64, action: &str) -> Result<()> {
        let payload = serde_json::json!({
            "chat_id": chat_id,
            "action": action,
        });
        self.call::<bool>("sendChatAction", &payload).await.map(|_| ())
    }

    pub async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        let file: TelegramFile = self
            .call("getFile", &serde_json::json!({ "file_id": file_id }))
            .await?;
        let file_path = file
            .file_path
            .ok_or_else(|| anyhow!("telegram getFile returned no file_path"))?;

        let resp = self
            .client
            .get(format!("{}/{}", self.file_url, file_path))
            .send()
            .await
            .map_err(|e| anyhow!("telegram file download failed: {}", e.without_url()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!(
                "telegram file download failed with HTTP {}",
                status.as_u16()
            ));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| anyhow!("telegram file download read failed: {}", e.without_url()))?;
        Ok(bytes.to_vec())
    }

    pub async fn sync_bot_commands(&self) -> Result<()> {
        let commands: Vec<serde_json::Value> = BotCommand::all()
            .iter()
            .map(|command| {
                serde_json::json!({
                    "command": command.name(),
                    "description": command.description(),
                })
            })
            .collect();

        self.call::<bool>("setMyCommands", &serde_json::json!({ "commands": commands }))
            .await
            .map(|_| ())
    }

    fn chunk_message(text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        if chars.len() <= TELEGRAM_MAX_MESSAGE_LEN {
            return vec![text.to_string()];
        }

        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < chars.len() {
            let mut end = (start + TELEGRAM_MAX_MESSAGE_LEN).min(chars.len());

            if end < chars.len() {
                let mut split = end;
                for i in (start..end).rev() {
                    let c = chars[i];
                    if c == '\n' || c == ' ' || c == '.' || c == '!' || c == '?' {
                        split = i + 1;
                        break;
                    }
                }
                if split > start {
                    end = split;
                }
            }

            chunks.push(chars[start..end].iter().collect::<String>());
            start = end;
        }

        chunks
    }

    /// Classifies a message: a leading `/name` token is a command, a photo is
    /// an image, other text is a text prompt. Everything else yields `None`.
    pub fn inbound_event(
        message: &TelegramMessage,
        bot_username: Option<&str>,
    ) -> Option<InboundEvent> {
        let user = message.from.as_ref()?;
        let chat_id = message.chat.id;

        if let Some(sizes) = message.photo.as_ref().filter(|sizes| !sizes.is_empty()) {
            let best = sizes
                .iter()
                .max_by_key(|size| size.width.saturating_mul(size.height))?;
            let event = InboundEvent::image(
                user.id,
                chat_id,
                message.caption.clone(),
                ImageSource::Remote {
                    file_id: best.file_id.clone(),
                },
            );
            return Some(event.with_message_id(message.message_id));
        }

        let text = message.text.as_deref()?;
        let event = if Self::is_command_text(text) {
            if !Self::is_addressed_to(text, bot_username) {
                return None;
            }
            InboundEvent::command(user.id, chat_id, text)
        } else {
            InboundEvent::text(user.id, chat_id, text)
        };

        Some(event.with_message_id(message.message_id))
    }

    /// Bot API command syntax: `/` plus 1-32 of `[A-Za-z0-9_]`, optionally `@bot`.
    fn is_command_text(text: &str) -> bool {
        let Some(rest) = text.strip_prefix('/') else {
            return false;
        };
        let token = rest.split(char::is_whitespace).next().unwrap_or_default();
        let name = token.split('@').next().unwrap_or_default();
        (1..=32).contains(&name.len())
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    fn is_addressed_to(command_text: &str, bot_username: Option<&str>) -> bool {
        let token = command_text.split_whitespace().next().unwrap_or_default();
        match (token.split_once('@'), bot_username) {
            (Some((_, target)), Some(own)) => target.eq_ignore_ascii_case(own),
            _ => true,
        }
    }

    /// Long-polls forever, handing each classified message to the dispatcher.
    pub async fn poll(&self, dispatcher: &Dispatcher) -> Result<()> {
        let mut offset: Option<i64> = None;

        info!(account = %self.account_tag, "Telegram polling started");

        if let Err(err) = self.sync_bot_commands().await {
            warn!("Failed to sync Telegram bot commands: {}", err);
        } else {
            info!("Telegram bot commands synced");
        }

        loop {
            let updates = match self.get_updates(offset).await {
                Ok(v) => v,
                Err(err) => {
                    warn!("Telegram polling error: {}", err);
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                    continue;
                }
            };

            for update in updates {
                offset = Some(update.update_id + 1);

                let Some(message) = &update.message else {
                    debug!(update_id = update.update_id, "Skipping update without message");
                    continue;
                };

                match Self::inbound_event(message, self.bot_username.as_deref()) {
                    Some(event) => {
                        dispatcher.dispatch(event);
                    }
                    None => debug!(
                        update_id = update.update_id,
                        chat_id = message.chat.id,
                        "Skipping unsupported message"
                    ),
                }
            }
        }
    }
}

#[async_trait]
impl ChatTransport for TelegramAdapter {
    async fn send_typing(&self, chat_id: i64) -> Result<()> {
        self.send_chat_action(chat_id, "typing").await
    }

    async fn send_reply(&self, chat_id: i64, reply_to: Option<i64>, text: &str) -> Result<()> {
        self.send_message(chat_id, text, reply_to).await
    }

    async fn fetch_image(&self, file_id: &str) -> Result<Vec<u8>> {
        self.download_file(file_id).await
    }
}
