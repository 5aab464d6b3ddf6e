//! Predicate-based routing of inbound events to handlers

use crate::event::InboundEvent;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: InboundEvent);
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(InboundEvent) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, event: InboundEvent) {
        (self)(event).await
    }
}

type Predicate = Box<dyn Fn(&InboundEvent) -> bool + Send + Sync>;

struct Binding {
    predicate: Predicate,
    handler: Arc<dyn EventHandler>,
}

/// First matching binding wins; bindings are tried in registration order.
#[derive(Default)]
pub struct Dispatcher {
    bindings: Vec<Binding>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P, H>(&mut self, predicate: P, handler: H)
    where
        P: Fn(&InboundEvent) -> bool + Send + Sync + 'static,
        H: EventHandler + 'static,
    {
        self.bindings.push(Binding {
            predicate: Box::new(predicate),
            handler: Arc::new(handler),
        });
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Spawns the matching handler as its own task and returns without
    /// waiting for it. Unmatched events are dropped.
    pub fn dispatch(&self, event: InboundEvent) -> Option<JoinHandle<()>> {
        let Some(binding) = self.bindings.iter().find(|b| (b.predicate)(&event)) else {
            debug!(
                user_id = event.source_user_id,
                chat_id = event.conversation_id,
                kind = event.kind.as_str(),
                "No handler for event, ignoring"
            );
            return None;
        };

        let handler = Arc::clone(&binding.handler);
        Some(tokio::spawn(async move {
            handler.handle(event).await;
        }))
    }
}
