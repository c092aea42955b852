//! Dispatcher: the bridge from the two update flows to per-chat sessions.
//!
//! Two symmetric loops (messages, callbacks) resolve each item to its session
//! and enqueue it. Enqueueing is synchronous and cheap — a slow handler for
//! chat A never blocks chat B, because the work itself runs on the sessions'
//! own workers.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{BotApi, CallbackQuery, Message};
use crate::chat_id::ChatId;
use crate::config::RuntimeConfig;
use crate::handler::{ChatHandlerFactory, SessionControl};
use crate::registry::SessionRegistry;
use crate::session::Session;

pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    api: Arc<dyn BotApi>,
    factory: Arc<dyn ChatHandlerFactory>,
    config: RuntimeConfig,
    shutdown: CancellationToken,
    stop_tx: mpsc::UnboundedSender<ChatId>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        api: Arc<dyn BotApi>,
        factory: Arc<dyn ChatHandlerFactory>,
        config: RuntimeConfig,
        shutdown: CancellationToken,
        stop_tx: mpsc::UnboundedSender<ChatId>,
    ) -> Self {
        Self {
            registry,
            api,
            factory,
            config,
            shutdown,
            stop_tx,
        }
    }

    /// Consumes the message flow until shutdown or flow closure.
    pub async fn run_messages(&self, mut rx: mpsc::UnboundedReceiver<Message>) {
        loop {
            let message = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                item = rx.recv() => match item {
                    Some(message) => message,
                    None => break,
                },
            };
            self.deliver_message(message);
        }
        debug!("message dispatch loop stopped");
    }

    /// Consumes the callback flow until shutdown or flow closure.
    pub async fn run_callbacks(&self, mut rx: mpsc::UnboundedReceiver<CallbackQuery>) {
        loop {
            let callback = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                item = rx.recv() => match item {
                    Some(callback) => callback,
                    None => break,
                },
            };
            self.deliver_callback(callback);
        }
        debug!("callback dispatch loop stopped");
    }

    fn resolve(&self, chat_id: &ChatId) -> (Arc<Session>, bool) {
        self.registry.get_or_create(chat_id, || {
            let control = SessionControl::new(
                chat_id.clone(),
                Arc::clone(&self.api),
                self.stop_tx.clone(),
            );
            let handler = self.factory.create(control);
            debug!(chat_id = %chat_id, "creating session");
            Session::spawn(
                chat_id.clone(),
                handler,
                self.shutdown.clone(),
                &self.config,
                self.stop_tx.clone(),
            )
        })
    }

    fn deliver_message(&self, message: Message) {
        let chat_id = message.chat.id.clone();
        let (session, created) = self.resolve(&chat_id);
        if created {
            session.enqueue_begin(message.from.clone());
        }
        if session.enqueue_message(message.clone()) {
            return;
        }
        // The session retired between resolve and enqueue. Evict it (unless
        // something newer already took its slot) and deliver to a fresh one.
        self.registry.remove_if_same(&chat_id, &session);
        let (fresh, created) = self.resolve(&chat_id);
        if created {
            fresh.enqueue_begin(message.from.clone());
        }
        if !fresh.enqueue_message(message) {
            warn!(chat_id = %chat_id, "dropping message; session is ending");
        }
    }

    fn deliver_callback(&self, callback: CallbackQuery) {
        // Private-chat convention: the callback sender's user id doubles as
        // the chat id. Group callbacks would want callback.message.chat.id;
        // this runtime keeps the sender-keyed behavior.
        let chat_id = ChatId::Id(callback.from.id);
        let (session, created) = self.resolve(&chat_id);
        if created {
            session.enqueue_begin(None);
        }
        if session.enqueue_callback(callback.clone()) {
            return;
        }
        self.registry.remove_if_same(&chat_id, &session);
        let (fresh, created) = self.resolve(&chat_id);
        if created {
            fresh.enqueue_begin(None);
        }
        if !fresh.enqueue_callback(callback) {
            warn!(chat_id = %chat_id, "dropping callback; session is ending");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{
        AnswerCallbackQuery, ApiError, BotUser, Chat, GetUpdates, SendMessage, SetMyCommands,
        Update, User,
    };
    use crate::handler::ChatHandler;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct NullApi;

    #[async_trait]
    impl BotApi for NullApi {
        async fn get_updates(&self, _request: GetUpdates) -> Result<Vec<Update>, ApiError> {
            Ok(Vec::new())
        }

        async fn send_message(&self, request: SendMessage) -> Result<Message, ApiError> {
            Ok(Message {
                message_id: 1,
                from: None,
                chat: Chat::new(request.chat_id),
                date: 0,
                edit_date: None,
                text: Some(request.text),
                entities: None,
            })
        }

        async fn answer_callback_query(
            &self,
            _request: AnswerCallbackQuery,
        ) -> Result<bool, ApiError> {
            Ok(true)
        }

        async fn set_my_commands(&self, _request: SetMyCommands) -> Result<bool, ApiError> {
            Ok(true)
        }

        async fn get_me(&self) -> Result<BotUser, ApiError> {
            Ok(BotUser {
                id: 0,
                first_name: "bot".into(),
                username: None,
            })
        }
    }

    type EventLog = Arc<Mutex<Vec<(ChatId, String)>>>;

    struct RecordingFactory {
        log: EventLog,
    }

    struct RecordingHandler {
        chat_id: ChatId,
        log: EventLog,
    }

    impl RecordingHandler {
        fn record(&self, event: impl Into<String>) {
            self.log
                .lock()
                .unwrap()
                .push((self.chat_id.clone(), event.into()));
        }
    }

    #[async_trait]
    impl ChatHandlerFactory for RecordingFactory {
        fn create(&self, control: SessionControl) -> Box<dyn ChatHandler> {
            Box::new(RecordingHandler {
                chat_id: control.chat_id().clone(),
                log: Arc::clone(&self.log),
            })
        }
    }

    #[async_trait]
    impl ChatHandler for RecordingHandler {
        async fn begin(&mut self, user: Option<&User>) -> anyhow::Result<()> {
            self.record(format!(
                "begin:{}",
                user.map_or("-".into(), |u| u.first_name.clone())
            ));
            Ok(())
        }

        async fn handle_message(&mut self, message: Message) -> anyhow::Result<()> {
            self.record(format!("message:{}", message.text.unwrap_or_default()));
            Ok(())
        }

        async fn handle_callback(&mut self, callback: CallbackQuery) -> anyhow::Result<()> {
            self.record(format!("callback:{}", callback.data.unwrap_or_default()));
            Ok(())
        }
    }

    struct Fixture {
        dispatcher: Dispatcher,
        registry: Arc<SessionRegistry>,
        log: EventLog,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(SessionRegistry::new());
        let log: EventLog = Arc::default();
        let (stop_tx, _stop_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::new(NullApi),
            Arc::new(RecordingFactory {
                log: Arc::clone(&log),
            }),
            RuntimeConfig::default(),
            CancellationToken::new(),
            stop_tx,
        );
        Fixture {
            dispatcher,
            registry,
            log,
        }
    }

    fn message(chat: i64, text: &str) -> Message {
        Message {
            message_id: 1,
            from: Some(User {
                id: 9,
                is_bot: false,
                first_name: "A".into(),
                last_name: None,
                username: None,
            }),
            chat: Chat::new(chat),
            date: 0,
            edit_date: None,
            text: Some(text.to_string()),
            entities: None,
        }
    }

    fn events_for(log: &EventLog, chat: i64) -> Vec<String> {
        log.lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == ChatId::Id(chat))
            .map(|(_, e)| e.clone())
            .collect()
    }

    async fn drain(registry: &SessionRegistry) {
        for session in registry.snapshot() {
            session.end(None).await;
        }
    }

    #[tokio::test]
    async fn interleaved_chats_get_separate_sessions_in_per_chat_order() {
        let f = fixture();
        f.dispatcher.deliver_message(message(1, "first"));
        f.dispatcher.deliver_message(message(2, "other"));
        f.dispatcher.deliver_message(message(1, "second"));

        assert_eq!(f.registry.len(), 2);
        drain(&f.registry).await;

        assert_eq!(
            events_for(&f.log, 1),
            vec!["begin:A", "message:first", "message:second"]
        );
        assert_eq!(events_for(&f.log, 2), vec!["begin:A", "message:other"]);
    }

    #[tokio::test]
    async fn callbacks_key_sessions_by_sender_and_begin_without_a_user() {
        let f = fixture();
        f.dispatcher.deliver_callback(CallbackQuery {
            id: "cb1".into(),
            from: User {
                id: 77,
                is_bot: false,
                first_name: "B".into(),
                last_name: None,
                username: None,
            },
            message: None,
            data: Some("pressed".into()),
        });

        assert_eq!(f.registry.len(), 1);
        drain(&f.registry).await;
        assert_eq!(
            events_for(&f.log, 77),
            vec!["begin:-", "callback:pressed"]
        );
    }

    #[tokio::test]
    async fn a_retired_session_is_replaced_on_the_next_message() {
        let f = fixture();
        f.dispatcher.deliver_message(message(5, "before"));
        let (old, created) = f.dispatcher.resolve(&ChatId::Id(5));
        assert!(!created);
        old.end(None).await;

        // The registry still holds the ended session; delivery must evict it
        // and start a fresh one.
        f.dispatcher.deliver_message(message(5, "after"));
        drain(&f.registry).await;

        let events = events_for(&f.log, 5);
        assert_eq!(
            events,
            vec![
                "begin:A",
                "message:before",
                "begin:A",
                "message:after",
            ]
        );
    }
}
