//! Ordered delivery of events to the router.
//!
//! Every conversation gets its own queue drained by one worker task, so
//! turns of a dialog are handled in the order they arrived while separate
//! chats proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use billbot_backend::ChatId;

use crate::event::InboundEvent;
use crate::router::{Router, conversation_of};

/// Fans events out to per-conversation queues
pub struct Dispatcher {
    router: Arc<Router>,
    queues: HashMap<ChatId, mpsc::UnboundedSender<InboundEvent>>,
    workers: JoinSet<()>,
}

impl Dispatcher {
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            queues: HashMap::new(),
            workers: JoinSet::new(),
        }
    }

    /// Queue an event behind the earlier events of its conversation
    pub fn submit(&mut self, event: InboundEvent) {
        let conversation = conversation_of(&event);
        let queue = self.queues.entry(conversation).or_insert_with(|| {
            tracing::debug!("Starting event queue for chat {}", conversation);
            let (sender, mut receiver) = mpsc::unbounded_channel::<InboundEvent>();
            let router = self.router.clone();
            self.workers.spawn(async move {
                while let Some(event) = receiver.recv().await {
                    router.dispatch(&event).await;
                }
            });
            sender
        });

        if let Err(e) = queue.send(event) {
            tracing::error!("Event queue for chat {} is closed", conversation);
            self.queues.remove(&conversation);
            // the worker is gone; start a fresh queue for the event
            self.submit(e.0);
        }
    }

    /// Number of conversations with a queue
    pub fn conversations(&self) -> usize {
        self.queues.len()
    }

    /// Stop accepting events and wait until every queued event is handled
    pub async fn shutdown(mut self) {
        self.queues.clear();
        while let Some(result) = self.workers.join_next().await {
            if let Err(e) = result {
                tracing::error!("Event worker failed: {}", e);
            }
        }
    }
}
