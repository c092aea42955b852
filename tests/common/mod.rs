//! Shared fixtures: a scripted in-memory Bot API and a recording handler set.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chatflow::api::{
    AnswerCallbackQuery, ApiError, BotApi, BotUser, CallbackQuery, Chat, GetUpdates, Message,
    SendMessage, SetMyCommands, Update, User,
};
use chatflow::chat_id::ChatId;
use chatflow::handler::{ChatHandler, ChatHandlerFactory, SessionControl};

/// One scripted `getUpdates` response, optionally held back for a while to
/// model a long poll that takes time to produce.
pub struct ScriptStep {
    delay: Duration,
    result: Result<Vec<Update>, ApiError>,
}

impl ScriptStep {
    pub fn from_result(result: Result<Vec<Update>, ApiError>) -> Self {
        Self {
            delay: Duration::ZERO,
            result,
        }
    }

    pub fn delayed(delay_secs: u64, result: Result<Vec<Update>, ApiError>) -> Self {
        Self {
            delay: Duration::from_secs(delay_secs),
            result,
        }
    }
}

/// Scripted `getUpdates` source. Steps are served in order; once the script
/// is exhausted the fake hangs like a real long poll with nothing pending.
pub struct FakeApi {
    script: Mutex<VecDeque<ScriptStep>>,
    offsets: Mutex<Vec<i64>>,
    sent: Mutex<Vec<SendMessage>>,
}

impl FakeApi {
    pub fn new(script: Vec<Result<Vec<Update>, ApiError>>) -> Arc<Self> {
        Self::scripted(script.into_iter().map(ScriptStep::from_result).collect())
    }

    pub fn scripted(script: Vec<ScriptStep>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            offsets: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn offsets(&self) -> Vec<i64> {
        self.offsets.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn sent(&self) -> Vec<SendMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn poll_count(&self) -> usize {
        self.offsets.lock().unwrap().len()
    }
}

#[async_trait]
impl BotApi for FakeApi {
    async fn get_updates(&self, request: GetUpdates) -> Result<Vec<Update>, ApiError> {
        self.offsets
            .lock()
            .unwrap()
            .push(request.offset.unwrap_or_default());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(step) => {
                if !step.delay.is_zero() {
                    tokio::time::sleep(step.delay).await;
                }
                step.result
            }
            None => std::future::pending().await,
        }
    }

    async fn send_message(&self, request: SendMessage) -> Result<Message, ApiError> {
        self.sent.lock().unwrap().push(request.clone());
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

    async fn answer_callback_query(&self, _request: AnswerCallbackQuery) -> Result<bool, ApiError> {
        Ok(true)
    }

    async fn set_my_commands(&self, _request: SetMyCommands) -> Result<bool, ApiError> {
        Ok(true)
    }

    async fn get_me(&self) -> Result<BotUser, ApiError> {
        Ok(BotUser {
            id: 1,
            first_name: "fake".into(),
            username: Some("fake_bot".into()),
        })
    }
}

/// One recorded event: which chat (None for bot-wide hooks) saw what.
pub type EventLog = Arc<Mutex<Vec<(Option<ChatId>, String)>>>;

pub struct RecordingFactory {
    pub log: EventLog,
    /// Message text that makes the handler return an error.
    pub fail_on: Option<&'static str>,
    /// Message text that makes the handler stall (until cancelled).
    pub stall_on: Option<&'static str>,
    /// Message text on which the handler requests its own session's end.
    pub stop_on: Option<&'static str>,
    /// When set, the start hook fails.
    pub fail_start: bool,
}

impl RecordingFactory {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            fail_on: None,
            stall_on: None,
            stop_on: None,
            fail_start: false,
        }
    }
}

#[async_trait]
impl ChatHandlerFactory for RecordingFactory {
    async fn start(&self, _api: Arc<dyn BotApi>) -> anyhow::Result<()> {
        self.log.lock().unwrap().push((None, "hook:start".into()));
        if self.fail_start {
            anyhow::bail!("induced start failure");
        }
        Ok(())
    }

    fn create(&self, control: SessionControl) -> Box<dyn ChatHandler> {
        Box::new(RecordingHandler {
            chat_id: control.chat_id().clone(),
            control,
            log: Arc::clone(&self.log),
            fail_on: self.fail_on,
            stall_on: self.stall_on,
            stop_on: self.stop_on,
        })
    }

    async fn stop(&self, _api: Arc<dyn BotApi>) -> anyhow::Result<()> {
        self.log.lock().unwrap().push((None, "hook:stop".into()));
        Ok(())
    }
}

pub struct RecordingHandler {
    chat_id: ChatId,
    control: SessionControl,
    log: EventLog,
    fail_on: Option<&'static str>,
    stall_on: Option<&'static str>,
    stop_on: Option<&'static str>,
}

impl RecordingHandler {
    fn record(&self, event: impl Into<String>) {
        self.log
            .lock()
            .unwrap()
            .push((Some(self.chat_id.clone()), event.into()));
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
        let text = message.text.unwrap_or_default();
        self.record(format!("message:{text}"));
        if self.stall_on == Some(text.as_str()) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail_on == Some(text.as_str()) {
            anyhow::bail!("induced fault on {text}");
        }
        if self.stop_on == Some(text.as_str()) {
            self.control.stop();
        }
        self.record(format!("message-done:{text}"));
        Ok(())
    }

    async fn handle_callback(&mut self, callback: CallbackQuery) -> anyhow::Result<()> {
        self.record(format!(
            "callback:{}",
            callback.data.unwrap_or_default()
        ));
        Ok(())
    }

    async fn on_error(&mut self, error: anyhow::Error) -> anyhow::Result<()> {
        self.record(format!("on_error:{error}"));
        Ok(())
    }

    async fn end(&mut self, user: Option<&User>) -> anyhow::Result<()> {
        self.record(format!(
            "end:{}",
            user.map_or("-".into(), |u| u.first_name.clone())
        ));
        Ok(())
    }
}

pub fn user(id: i64, name: &str) -> User {
    User {
        id,
        is_bot: false,
        first_name: name.to_string(),
        last_name: None,
        username: None,
    }
}

pub fn message_update(update_id: i64, chat: i64, from: Option<User>, text: &str) -> Update {
    Update {
        update_id,
        message: Some(Message {
            message_id: update_id,
            from,
            chat: Chat::new(chat),
            date: 1_700_000_000,
            edit_date: None,
            text: Some(text.to_string()),
            entities: None,
        }),
        ..Update::default()
    }
}

pub fn callback_update(update_id: i64, from: User, data: &str) -> Update {
    Update {
        update_id,
        callback_query: Some(CallbackQuery {
            id: format!("cb{update_id}"),
            from,
            message: None,
            data: Some(data.to_string()),
        }),
        ..Update::default()
    }
}

/// Events recorded for one chat, in order.
pub fn events_for(log: &EventLog, chat: i64) -> Vec<String> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|(id, _)| id.as_ref() == Some(&ChatId::Id(chat)))
        .map(|(_, e)| e.clone())
        .collect()
}

/// All events, flattened, in order.
pub fn all_events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().iter().map(|(_, e)| e.clone()).collect()
}

/// Polls until `pred` holds or the (auto-advanced) clock runs out.
pub async fn wait_for(log: &EventLog, pred: impl Fn(&[String]) -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(300);
    loop {
        if pred(&all_events(log)) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached; events: {:?}",
            all_events(log)
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
