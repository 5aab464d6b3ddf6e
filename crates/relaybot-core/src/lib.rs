//! Relaybot Core
//!
//! Inbound event model, dispatcher, and the reply relay that turns each chat
//! event into exactly one reply

pub mod dispatcher;
pub mod event;
pub mod observe;
pub mod relay;

pub use dispatcher::{Dispatcher, EventHandler};
pub use event::{BotCommand, EventKind, ImageSource, InboundEvent, HELP_TEXT, WELCOME_TEXT};
pub use relay::{
    ChatTransport, PromptKind, RelayError, RelayState, ReplyRelay, IMAGE_APOLOGY, TEXT_APOLOGY,
};

use std::sync::Arc;

/// Binding table in priority order: commands, then images, then text.
pub fn standard_dispatcher(relay: Arc<ReplyRelay>) -> Dispatcher {
    let mut dispatcher = Dispatcher::new();

    let commands = Arc::clone(&relay);
    dispatcher.register(
        |event: &InboundEvent| event.bot_command().is_some(),
        move |event: InboundEvent| {
            let relay = Arc::clone(&commands);
            async move {
                relay.handle_command(event).await;
            }
        },
    );

    let images = Arc::clone(&relay);
    dispatcher.register(
        |event: &InboundEvent| event.kind == EventKind::Image && event.image.is_some(),
        move |event: InboundEvent| {
            let relay = Arc::clone(&images);
            async move {
                relay.handle_image(event).await;
            }
        },
    );

    dispatcher.register(
        |event: &InboundEvent| {
            event.kind == EventKind::Text && event.text.as_deref().is_some_and(|t| !t.is_empty())
        },
        move |event: InboundEvent| {
            let relay = Arc::clone(&relay);
            async move {
                relay.handle_text(event).await;
            }
        },
    );

    dispatcher
}
