//! Inbound chat events

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Command,
    Text,
    Image,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Command => "Command",
            EventKind::Text => "Text",
            EventKind::Image => "Image",
        }
    }
}

/// Where the bytes of an image event come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Bytes(Vec<u8>),
    /// Platform file id, fetched through the transport when the event is handled.
    Remote { file_id: String },
}

/// One received chat update that needs a reply. Lives for a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub source_user_id: i64,
    pub conversation_id: i64,
    pub message_id: Option<i64>,
    pub kind: EventKind,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub image: Option<ImageSource>,
}

impl InboundEvent {
    pub fn command(user_id: i64, chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            source_user_id: user_id,
            conversation_id: chat_id,
            message_id: None,
            kind: EventKind::Command,
            text: Some(text.into()),
            caption: None,
            image: None,
        }
    }

    pub fn text(user_id: i64, chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            source_user_id: user_id,
            conversation_id: chat_id,
            message_id: None,
            kind: EventKind::Text,
            text: Some(text.into()),
            caption: None,
            image: None,
        }
    }

    pub fn image(user_id: i64, chat_id: i64, caption: Option<String>, image: ImageSource) -> Self {
        Self {
            source_user_id: user_id,
            conversation_id: chat_id,
            message_id: None,
            kind: EventKind::Image,
            text: None,
            caption,
            image: Some(image),
        }
    }

    pub fn with_message_id(mut self, message_id: i64) -> Self {
        self.message_id = Some(message_id);
        self
    }

    pub fn bot_command(&self) -> Option<BotCommand> {
        if self.kind != EventKind::Command {
            return None;
        }
        self.text.as_deref().and_then(BotCommand::parse)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Help,
}

impl BotCommand {
    /// Parses the leading `/command[@bot]` token; trailing arguments are ignored.
    pub fn parse(text: &str) -> Option<Self> {
        let token = text.split_whitespace().next()?.strip_prefix('/')?;
        let name = token.split('@').next().unwrap_or(token);
        match name.to_ascii_lowercase().as_str() {
            "start" => Some(BotCommand::Start),
            "help" => Some(BotCommand::Help),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BotCommand::Start => "start",
            BotCommand::Help => "help",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            BotCommand::Start => "Show the welcome message",
            BotCommand::Help => "Show how to use the bot",
        }
    }

    pub fn all() -> [BotCommand; 2] {
        [BotCommand::Start, BotCommand::Help]
    }

    pub fn reply_text(&self) -> &'static str {
        match self {
            BotCommand::Start => WELCOME_TEXT,
            BotCommand::Help => HELP_TEXT,
        }
    }
}

pub const WELCOME_TEXT: &str = "👋 Hello! I'm your AI assistant. You can:\n\
- Ask me anything in text\n\
- Send me images with questions in the caption\n\
- I'll do my best to understand and respond!";

pub const HELP_TEXT: &str = concat!(
    "\n",
    "    🤖 Bot Help Guide:\n",
    "    \n",
    "    📝 Text Messages:\n",
    "    Just send me any text question or message, and I'll respond.\n",
    "    \n",
    "    🖼️ Image Messages:\n",
    "    Send an image with a caption/question like:\n",
    "    - \"What is this landmark?\"\n",
    "    - \"Explain this diagram\"\n",
    "    - \"What's in this picture?\"\n",
    "    \n",
    "    I'll analyze both the image and your question to provide the best answer.\n",
    "    ",
);

#[cfg(test)]
mod tests {
    use super::{BotCommand, EventKind, ImageSource, InboundEvent, HELP_TEXT};

    #[test]
    fn help_text_keeps_its_indented_layout() {
        let lines: Vec<&str> = HELP_TEXT.split('\n').collect();
        assert_eq!(lines.first(), Some(&""));
        assert_eq!(lines[1], "    🤖 Bot Help Guide:");
        assert_eq!(lines[2], "    ");
        assert_eq!(lines.last(), Some(&"    "));
        assert!(lines[1..].iter().all(|line| line.starts_with("    ")));
        assert!(HELP_TEXT.contains("    - \"Explain this diagram\"\n"));
    }

    #[test]
    fn parse_ignores_trailing_arguments_and_bot_suffix() {
        assert_eq!(BotCommand::parse("/start"), Some(BotCommand::Start));
        assert_eq!(BotCommand::parse("/start now please"), Some(BotCommand::Start));
        assert_eq!(BotCommand::parse("/help@relay_bot extra"), Some(BotCommand::Help));
        assert_eq!(BotCommand::parse("/HELP"), Some(BotCommand::Help));
    }

    #[test]
    fn parse_rejects_unknown_and_non_commands() {
        assert_eq!(BotCommand::parse("/settings"), None);
        assert_eq!(BotCommand::parse("start"), None);
        assert_eq!(BotCommand::parse(""), None);
        assert_eq!(BotCommand::parse("   "), None);
    }

    #[test]
    fn bot_command_requires_command_kind() {
        let text = InboundEvent::text(1, 2, "/start");
        assert_eq!(text.bot_command(), None);

        let command = InboundEvent::command(1, 2, "/start");
        assert_eq!(command.bot_command(), Some(BotCommand::Start));
    }

    #[test]
    fn image_constructor_sets_kind_and_payload() {
        let event = InboundEvent::image(
            7,
            8,
            None,
            ImageSource::Remote {
                file_id: "abc".to_string(),
            },
        )
        .with_message_id(99);
        assert_eq!(event.kind, EventKind::Image);
        assert_eq!(event.message_id, Some(99));
        assert!(event.text.is_none());
        assert!(event.caption.is_none());
    }
}
