//! The conversation-handler boundary.
//!
//! Application logic plugs in through [`ChatHandler`] (per-session callbacks)
//! and [`ChatHandlerFactory`] (construction plus the process-wide start/stop
//! hooks). Handlers never see the runtime itself — they get a
//! [`SessionControl`], a narrow operator interface for sending replies and
//! requesting their own session's end, which keeps the session↔handler
//! reference graph acyclic.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::api::{AnswerCallbackQuery, ApiError, BotApi, CallbackQuery, Message, SendMessage, User};
use crate::chat_id::ChatId;
use crate::send::{answer_callback_resilient, send_message_resilient};

/// Per-session conversation logic.
///
/// All callbacks for one session run serialized — no two overlap in time —
/// and may suspend freely. Callbacks are cancellable: at shutdown or session
/// expiry an in-flight callback is dropped at its next await point, so any
/// cleanup must live in `end` or in `Drop`. Handlers must not poll updates
/// themselves.
#[async_trait]
pub trait ChatHandler: Send {
    /// Called once, before the first `handle_*` for this session. `user` is
    /// the sender that caused the session to exist, when known.
    async fn begin(&mut self, user: Option<&User>) -> Result<()> {
        let _ = user;
        Ok(())
    }

    /// One inbound message (including edits and channel posts).
    async fn handle_message(&mut self, message: Message) -> Result<()>;

    /// One inbound callback query.
    async fn handle_callback(&mut self, callback: CallbackQuery) -> Result<()> {
        let _ = callback;
        Ok(())
    }

    /// A `handle_*` fault, routed here instead of escaping. An error from
    /// this callback is logged and swallowed.
    async fn on_error(&mut self, error: anyhow::Error) -> Result<()> {
        let _ = error;
        Ok(())
    }

    /// Called once when the session ends, after every in-flight `handle_*`
    /// has returned or been cancelled.
    async fn end(&mut self, user: Option<&User>) -> Result<()> {
        let _ = user;
        Ok(())
    }
}

/// Builds handlers and carries the bot-wide lifecycle hooks.
#[async_trait]
pub trait ChatHandlerFactory: Send + Sync + 'static {
    /// One-shot, whole-bot initialization (e.g. publish the command list).
    /// A failure here aborts the runtime before any polling starts.
    async fn start(&self, api: Arc<dyn BotApi>) -> Result<()> {
        let _ = api;
        Ok(())
    }

    /// Builds the handler for one new session.
    fn create(&self, control: SessionControl) -> Box<dyn ChatHandler>;

    /// Bot-wide teardown; runs whenever `start` succeeded, even if everything
    /// after it failed.
    async fn stop(&self, api: Arc<dyn BotApi>) -> Result<()> {
        let _ = api;
        Ok(())
    }
}

/// The operator surface a handler is allowed to touch: outbound sends for its
/// own chat, and a request to end its own session.
#[derive(Clone)]
pub struct SessionControl {
    chat_id: ChatId,
    api: Arc<dyn BotApi>,
    stop_tx: mpsc::UnboundedSender<ChatId>,
}

impl SessionControl {
    pub(crate) fn new(
        chat_id: ChatId,
        api: Arc<dyn BotApi>,
        stop_tx: mpsc::UnboundedSender<ChatId>,
    ) -> Self {
        Self {
            chat_id,
            api,
            stop_tx,
        }
    }

    /// The chat this session belongs to.
    #[must_use]
    pub const fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    /// The shared API client, for calls this surface has no helper for.
    #[must_use]
    pub fn api(&self) -> Arc<dyn BotApi> {
        Arc::clone(&self.api)
    }

    /// Sends `text` to this session's chat, with transient-failure retries.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`ApiError`] once retries are exhausted.
    pub async fn send(&self, text: impl Into<String> + Send) -> Result<Message, ApiError> {
        send_message_resilient(&*self.api, SendMessage::new(self.chat_id.clone(), text)).await
    }

    /// Sends `text` as a reply to `message`.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`ApiError`] once retries are exhausted.
    pub async fn reply(
        &self,
        message: &Message,
        text: impl Into<String> + Send,
    ) -> Result<Message, ApiError> {
        let request =
            SendMessage::new(self.chat_id.clone(), text).reply_to(message.message_id);
        send_message_resilient(&*self.api, request).await
    }

    /// Acknowledges a callback query.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`ApiError`] once retries are exhausted.
    pub async fn answer_callback(
        &self,
        callback: &CallbackQuery,
        text: Option<String>,
    ) -> Result<bool, ApiError> {
        let mut request = AnswerCallbackQuery::new(callback.id.clone());
        request.text = text;
        answer_callback_resilient(&*self.api, request).await
    }

    /// Requests the end of this session. The request is asynchronous: the
    /// current callback finishes normally, then the runtime removes the
    /// session and runs `end`.
    pub fn stop(&self) {
        debug!(chat_id = %self.chat_id, "session stop requested by handler");
        let _ = self.stop_tx.send(self.chat_id.clone());
    }
}
