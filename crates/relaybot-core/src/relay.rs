//! Reply relay: typing indicator, off-loop inference, single reply per event

use crate::event::{EventKind, ImageSource, InboundEvent};
use crate::observe::{log_error, log_request, log_response};
use async_trait::async_trait;
use relaybot_providers::{InferenceError, RequestTranslator, DEFAULT_IMAGE_PROMPT};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

pub const TEXT_APOLOGY: &str = "⚠️ Sorry, I encountered an error processing your text message.";
pub const IMAGE_APOLOGY: &str = "⚠️ Sorry, I couldn't process your image. Please try again.";

/// Outbound side of the chat platform.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_typing(&self, chat_id: i64) -> anyhow::Result<()>;
    async fn send_reply(
        &self,
        chat_id: i64,
        reply_to: Option<i64>,
        text: &str,
    ) -> anyhow::Result<()>;
    async fn fetch_image(&self, file_id: &str) -> anyhow::Result<Vec<u8>>;
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("event has no text to translate")]
    MissingText,
    #[error("event has no image attached")]
    MissingImage,
    #[error("image download failed: {0:#}")]
    Download(anyhow::Error),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("inference worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Received,
    TypingSent,
    AwaitingResult,
    Replied,
    Failed,
}

impl RelayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayState::Received => "received",
            RelayState::TypingSent => "typing_sent",
            RelayState::AwaitingResult => "awaiting_result",
            RelayState::Replied => "replied",
            RelayState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Text,
    Image,
}

impl PromptKind {
    pub fn apology(&self) -> &'static str {
        match self {
            PromptKind::Text => TEXT_APOLOGY,
            PromptKind::Image => IMAGE_APOLOGY,
        }
    }
}

pub struct ReplyRelay {
    transport: Arc<dyn ChatTransport>,
    translator: RequestTranslator,
}

impl ReplyRelay {
    pub fn new(transport: Arc<dyn ChatTransport>, translator: RequestTranslator) -> Self {
        Self {
            transport,
            translator,
        }
    }

    pub async fn handle_command(&self, event: InboundEvent) -> RelayState {
        let Some(command) = event.bot_command() else {
            return RelayState::Received;
        };
        log_request(
            event.source_user_id,
            EventKind::Command.as_str(),
            &format!("/{}", command.name()),
        );
        self.send_typing(&event).await;
        self.deliver(&event, command.reply_text()).await
    }

    pub async fn handle_text(&self, event: InboundEvent) -> RelayState {
        let prompt = event.text.clone().unwrap_or_default();
        log_request(event.source_user_id, EventKind::Text.as_str(), &prompt);

        self.send_typing(&event).await;
        let started = Instant::now();
        debug!(user_id = event.source_user_id, state = RelayState::AwaitingResult.as_str());

        let result = if prompt.is_empty() {
            Err(RelayError::MissingText)
        } else {
            let translator = self.translator.clone();
            tokio::task::spawn_blocking(move || translator.reply_to_text(&prompt))
                .await
                .map_err(RelayError::from)
                .and_then(|reply| reply.map_err(RelayError::from))
        };

        self.finish(&event, PromptKind::Text, started, result).await
    }

    pub async fn handle_image(&self, event: InboundEvent) -> RelayState {
        let caption = event
            .caption
            .clone()
            .filter(|caption| !caption.is_empty())
            .unwrap_or_else(|| DEFAULT_IMAGE_PROMPT.to_string());
        log_request(
            event.source_user_id,
            EventKind::Image.as_str(),
            &format!("Caption: {}", caption),
        );

        self.send_typing(&event).await;
        let started = Instant::now();
        debug!(user_id = event.source_user_id, state = RelayState::AwaitingResult.as_str());

        let result = match self.resolve_image(&event).await {
            Ok(bytes) => {
                let translator = self.translator.clone();
                tokio::task::spawn_blocking(move || {
                    translator.reply_to_image(Some(caption.as_str()), &bytes)
                })
                .await
                .map_err(RelayError::from)
                .and_then(|reply| reply.map_err(RelayError::from))
            }
            Err(err) => Err(err),
        };

        self.finish(&event, PromptKind::Image, started, result).await
    }

    async fn resolve_image(&self, event: &InboundEvent) -> Result<Vec<u8>, RelayError> {
        match &event.image {
            Some(ImageSource::Bytes(bytes)) => Ok(bytes.clone()),
            Some(ImageSource::Remote { file_id }) => self
                .transport
                .fetch_image(file_id)
                .await
                .map_err(RelayError::Download),
            None => Err(RelayError::MissingImage),
        }
    }

    async fn send_typing(&self, event: &InboundEvent) {
        if let Err(err) = self.transport.send_typing(event.conversation_id).await {
            warn!(
                user_id = event.source_user_id,
                chat_id = event.conversation_id,
                error = %err,
                "Failed to send typing indicator"
            );
            return;
        }
        debug!(user_id = event.source_user_id, state = RelayState::TypingSent.as_str());
    }

    async fn finish(
        &self,
        event: &InboundEvent,
        kind: PromptKind,
        started: Instant,
        result: Result<String, RelayError>,
    ) -> RelayState {
        match result {
            Ok(reply) => {
                log_response(event.source_user_id, &reply, started.elapsed());
                self.deliver(event, &reply).await
            }
            Err(err) => {
                log_error(event.source_user_id, &err);
                self.deliver(event, kind.apology()).await;
                RelayState::Failed
            }
        }
    }

    async fn deliver(&self, event: &InboundEvent, text: &str) -> RelayState {
        match self
            .transport
            .send_reply(event.conversation_id, event.message_id, text)
            .await
        {
            Ok(()) => RelayState::Replied,
            Err(err) => {
                log_error(event.source_user_id, &format!("{:#}", err));
                RelayState::Failed
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{ChatTransport, RelayState, ReplyRelay, IMAGE_APOLOGY, TEXT_APOLOGY};
    use crate::event::{ImageSource, InboundEvent, HELP_TEXT, WELCOME_TEXT};
    use async_trait::async_trait;
    use relaybot_providers::{
        ContentPart, InferenceClient, InferenceError, InferenceRequest, MessageContent,
        RequestTranslator,
    };
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::thread::ThreadId;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Sent {
        Typing(i64),
        Reply {
            chat_id: i64,
            reply_to: Option<i64>,
            text: String,
        },
    }

    #[derive(Default)]
    pub(crate) struct FakeTransport {
        pub sent: Mutex<Vec<Sent>>,
        pub fail_typing: bool,
        pub files: HashMap<String, Vec<u8>>,
    }

    impl FakeTransport {
        pub fn replies(&self) -> Vec<(i64, String)> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter_map(|sent| match sent {
                    Sent::Reply { chat_id, text, .. } => Some((*chat_id, text.clone())),
                    Sent::Typing(_) => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl ChatTransport for FakeTransport {
        async fn send_typing(&self, chat_id: i64) -> anyhow::Result<()> {
            if self.fail_typing {
                anyhow::bail!("typing unavailable");
            }
            self.sent.lock().unwrap().push(Sent::Typing(chat_id));
            Ok(())
        }

        async fn send_reply(
            &self,
            chat_id: i64,
            reply_to: Option<i64>,
            text: &str,
        ) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(Sent::Reply {
                chat_id,
                reply_to,
                text: text.to_string(),
            });
            Ok(())
        }

        async fn fetch_image(&self, file_id: &str) -> anyhow::Result<Vec<u8>> {
            self.files
                .get(file_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("file {} not found", file_id))
        }
    }

    /// Echoes the prompt text back, optionally failing, panicking or sleeping first.
    #[derive(Default)]
    pub(crate) struct EchoClient {
        pub fail: bool,
        pub panic: bool,
        pub delay: Option<Duration>,
        pub requests: Mutex<Vec<InferenceRequest>>,
        pub threads: Mutex<Vec<ThreadId>>,
    }

    impl InferenceClient for EchoClient {
        fn name(&self) -> &str {
            "echo"
        }

        fn complete(&self, request: &InferenceRequest) -> Result<String, InferenceError> {
            self.threads.lock().unwrap().push(std::thread::current().id());
            self.requests.lock().unwrap().push(request.clone());
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            if self.panic {
                panic!("inference worker crashed");
            }
            if self.fail {
                return Err(InferenceError::Api("quota exceeded".to_string()));
            }
            let prompt = match &request.messages[0].content {
                MessageContent::Text(text) => text.clone(),
                MessageContent::Parts(parts) => match &parts[0] {
                    ContentPart::Text { text } => format!("image: {}", text),
                    ContentPart::ImageUrl { .. } => "image".to_string(),
                },
            };
            Ok(format!("echo {}", prompt))
        }
    }

    fn relay_with(transport: Arc<FakeTransport>, client: Arc<EchoClient>) -> ReplyRelay {
        ReplyRelay::new(transport, RequestTranslator::new(client, "test-model"))
    }

    #[tokio::test]
    async fn text_event_gets_typing_then_verbatim_reply() {
        let transport = Arc::new(FakeTransport::default());
        let client = Arc::new(EchoClient::default());
        let relay = relay_with(transport.clone(), client.clone());

        let state = relay
            .handle_text(InboundEvent::text(10, 20, "hello there").with_message_id(5))
            .await;

        assert_eq!(state, RelayState::Replied);
        assert_eq!(
            *transport.sent.lock().unwrap(),
            vec![
                Sent::Typing(20),
                Sent::Reply {
                    chat_id: 20,
                    reply_to: Some(5),
                    text: "echo hello there".to_string(),
                },
            ]
        );
        assert_eq!(client.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn text_failure_sends_text_apology_once() {
        let transport = Arc::new(FakeTransport::default());
        let client = Arc::new(EchoClient {
            fail: true,
            ..Default::default()
        });
        let relay = relay_with(transport.clone(), client);

        let state = relay.handle_text(InboundEvent::text(1, 2, "question")).await;

        assert_eq!(state, RelayState::Failed);
        assert_eq!(transport.replies(), vec![(2, TEXT_APOLOGY.to_string())]);
    }

    #[tokio::test]
    async fn image_failure_sends_image_apology_once() {
        let transport = Arc::new(FakeTransport::default());
        let client = Arc::new(EchoClient {
            fail: true,
            ..Default::default()
        });
        let relay = relay_with(transport.clone(), client);

        let event = InboundEvent::image(1, 2, None, ImageSource::Bytes(vec![1, 2, 3]));
        let state = relay.handle_image(event).await;

        assert_eq!(state, RelayState::Failed);
        assert_eq!(transport.replies(), vec![(2, IMAGE_APOLOGY.to_string())]);
    }

    #[tokio::test]
    async fn worker_panic_sends_matching_apology_once() {
        let transport = Arc::new(FakeTransport::default());
        let client = Arc::new(EchoClient {
            panic: true,
            ..Default::default()
        });
        let relay = relay_with(transport.clone(), client);

        let text_state = relay.handle_text(InboundEvent::text(1, 2, "question")).await;
        assert_eq!(text_state, RelayState::Failed);
        assert_eq!(transport.replies(), vec![(2, TEXT_APOLOGY.to_string())]);

        let event = InboundEvent::image(1, 3, None, ImageSource::Bytes(vec![1, 2, 3]));
        let image_state = relay.handle_image(event).await;
        assert_eq!(image_state, RelayState::Failed);
        assert_eq!(
            transport.replies(),
            vec![
                (2, TEXT_APOLOGY.to_string()),
                (3, IMAGE_APOLOGY.to_string())
            ]
        );
    }

    #[tokio::test]
    async fn image_download_failure_uses_image_apology_without_inference() {
        let transport = Arc::new(FakeTransport::default());
        let client = Arc::new(EchoClient::default());
        let relay = relay_with(transport.clone(), client.clone());

        let event = InboundEvent::image(
            1,
            2,
            Some("what is this?".to_string()),
            ImageSource::Remote {
                file_id: "missing".to_string(),
            },
        );
        let state = relay.handle_image(event).await;

        assert_eq!(state, RelayState::Failed);
        assert_eq!(transport.replies(), vec![(2, IMAGE_APOLOGY.to_string())]);
        assert!(client.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn remote_image_is_fetched_and_caption_defaulted() {
        let mut files = HashMap::new();
        files.insert("photo-1".to_string(), vec![0xFF, 0xD8, 0xFF, 0x00]);
        let transport = Arc::new(FakeTransport {
            files,
            ..Default::default()
        });
        let client = Arc::new(EchoClient::default());
        let relay = relay_with(transport.clone(), client.clone());

        let event = InboundEvent::image(
            3,
            4,
            None,
            ImageSource::Remote {
                file_id: "photo-1".to_string(),
            },
        );
        let state = relay.handle_image(event).await;

        assert_eq!(state, RelayState::Replied);
        assert_eq!(
            transport.replies(),
            vec![(4, "echo image: What is in this image?".to_string())]
        );

        let requests = client.requests.lock().unwrap();
        let MessageContent::Parts(parts) = &requests[0].messages[0].content else {
            panic!("expected multimodal request");
        };
        let ContentPart::ImageUrl { image_url } = &parts[1] else {
            panic!("expected image part");
        };
        let encoded = image_url
            .url
            .strip_prefix("data:image/jpeg;base64,")
            .expect("jpeg data uri");
        use base64::Engine;
        assert_eq!(
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .expect("valid base64"),
            vec![0xFF, 0xD8, 0xFF, 0x00]
        );
    }

    #[tokio::test]
    async fn typing_failure_does_not_abort_reply() {
        let transport = Arc::new(FakeTransport {
            fail_typing: true,
            ..Default::default()
        });
        let relay = relay_with(transport.clone(), Arc::new(EchoClient::default()));

        let state = relay.handle_text(InboundEvent::text(1, 2, "still works")).await;

        assert_eq!(state, RelayState::Replied);
        assert_eq!(transport.replies(), vec![(2, "echo still works".to_string())]);
    }

    #[tokio::test]
    async fn commands_reply_with_fixed_texts_regardless_of_arguments() {
        let transport = Arc::new(FakeTransport::default());
        let client = Arc::new(EchoClient::default());
        let relay = relay_with(transport.clone(), client.clone());

        relay
            .handle_command(InboundEvent::command(1, 2, "/start please"))
            .await;
        relay
            .handle_command(InboundEvent::command(1, 2, "/help me now"))
            .await;

        assert_eq!(
            transport.replies(),
            vec![(2, WELCOME_TEXT.to_string()), (2, HELP_TEXT.to_string())]
        );
        assert!(client.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn inference_runs_off_the_event_loop_thread() {
        let transport = Arc::new(FakeTransport::default());
        let client = Arc::new(EchoClient::default());
        let relay = relay_with(transport, client.clone());

        relay.handle_text(InboundEvent::text(1, 2, "where?")).await;

        let loop_thread = std::thread::current().id();
        let threads = client.threads.lock().unwrap();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], loop_thread);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_events_get_independent_replies() {
        let transport = Arc::new(FakeTransport::default());
        let client = Arc::new(EchoClient {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let relay = Arc::new(relay_with(transport.clone(), client));

        let first = {
            let relay = relay.clone();
            tokio::spawn(async move {
                relay
                    .handle_text(InboundEvent::text(100, 1000, "alpha"))
                    .await
            })
        };
        let second = {
            let relay = relay.clone();
            tokio::spawn(async move {
                relay
                    .handle_text(InboundEvent::text(200, 2000, "beta"))
                    .await
            })
        };

        assert_eq!(first.await.expect("task"), RelayState::Replied);
        assert_eq!(second.await.expect("task"), RelayState::Replied);

        let mut replies = transport.replies();
        replies.sort();
        assert_eq!(
            replies,
            vec![
                (1000, "echo alpha".to_string()),
                (2000, "echo beta".to_string())
            ]
        );
    }
}
