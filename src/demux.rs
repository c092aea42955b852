//! Update demultiplexer.
//!
//! Classifies each envelope onto exactly one of two unbounded flows: messages
//! (covering plain, edited, and channel-post variants) or callback queries.
//! Anything else is logged and dropped. Unbounded is deliberate: the server's
//! batch limit caps what can arrive per poll, and the pump must never block
//! on slow dispatch.

use tokio::sync::mpsc;
use tracing::warn;

use crate::api::{CallbackQuery, Message, Update};

/// Writer half of the two flows.
pub struct Demultiplexer {
    messages: mpsc::UnboundedSender<Message>,
    callbacks: mpsc::UnboundedSender<CallbackQuery>,
}

/// Reader halves handed to the dispatcher.
pub struct UpdateFlows {
    pub messages: mpsc::UnboundedReceiver<Message>,
    pub callbacks: mpsc::UnboundedReceiver<CallbackQuery>,
}

impl Demultiplexer {
    /// Creates the demultiplexer and its paired receivers.
    #[must_use]
    pub fn channel() -> (Self, UpdateFlows) {
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();
        let (callbacks_tx, callbacks_rx) = mpsc::unbounded_channel();
        (
            Self {
                messages: messages_tx,
                callbacks: callbacks_tx,
            },
            UpdateFlows {
                messages: messages_rx,
                callbacks: callbacks_rx,
            },
        )
    }

    /// Routes one update. Returns `false` when the consuming side is gone,
    /// which tells the pump to stop emitting.
    pub fn route(&self, mut update: Update) -> bool {
        let update_id = update.update_id;
        if let Some(callback) = update.callback_query.take() {
            return self.callbacks.send(callback).is_ok();
        }
        let extra = update.extra_keys().join(",");
        match update.into_message() {
            Some(message) => self.messages.send(message).is_ok(),
            None => {
                warn!(update_id, variants = %extra, "dropping unsupported update variant");
                true
            }
        }
    }
}
