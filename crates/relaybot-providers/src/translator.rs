//! Chat input to chat-completions request translation

use crate::{
    ChatMessage, ContentPart, ImageUrl, InferenceClient, InferenceError, InferenceRequest,
    MessageContent,
};
use base64::Engine;
use std::sync::Arc;

pub const DEFAULT_IMAGE_PROMPT: &str = "What is in this image?";
const DEFAULT_IMAGE_MEDIA_TYPE: &str = "image/jpeg";

/// Builds exactly one inference request per chat input and runs it against
/// the configured backend.
#[derive(Clone)]
pub struct RequestTranslator {
    client: Arc<dyn InferenceClient>,
    model: String,
    detect_image_type: bool,
}

impl RequestTranslator {
    pub fn new(client: Arc<dyn InferenceClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            detect_image_type: false,
        }
    }

    /// When enabled, PNG/GIF/WebP uploads are labeled with their real media
    /// type instead of the fixed JPEG label.
    pub fn with_image_type_detection(mut self, enabled: bool) -> Self {
        self.detect_image_type = enabled;
        self
    }

    pub fn text_request(&self, prompt: &str) -> InferenceRequest {
        InferenceRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::user(MessageContent::Text(prompt.to_string()))],
        }
    }

    pub fn image_request(&self, caption: Option<&str>, image: &[u8]) -> InferenceRequest {
        let caption = caption
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_IMAGE_PROMPT);

        let media_type = if self.detect_image_type {
            sniff_image_media_type(image).unwrap_or(DEFAULT_IMAGE_MEDIA_TYPE)
        } else {
            DEFAULT_IMAGE_MEDIA_TYPE
        };

        InferenceRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::user(MessageContent::Parts(vec![
                ContentPart::Text {
                    text: caption.to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image_data_uri(media_type, image),
                    },
                },
            ]))],
        }
    }

    /// Blocks until the backend answers.
    pub fn complete(&self, request: &InferenceRequest) -> Result<String, InferenceError> {
        tracing::debug!(
            backend = self.client.name(),
            model = %request.model,
            "Sending inference request"
        );
        self.client.complete(request)
    }

    pub fn reply_to_text(&self, prompt: &str) -> Result<String, InferenceError> {
        self.complete(&self.text_request(prompt))
    }

    pub fn reply_to_image(
        &self,
        caption: Option<&str>,
        image: &[u8],
    ) -> Result<String, InferenceError> {
        self.complete(&self.image_request(caption, image))
    }
}

pub fn image_data_uri(media_type: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        media_type,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

pub fn sniff_image_media_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}
