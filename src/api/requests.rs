//! Typed requests.
//!
//! Each request names its wire method and its result shape at the type level,
//! so the client needs a single generic execute path and no runtime
//! reflection.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::types::{BotCommand, BotUser, Message, Update};
use crate::chat_id::ChatId;

/// A Bot API request: a serializable payload tagged with its method name and
/// carrying its result type.
pub trait ApiRequest: Serialize + Send + Sync {
    /// Wire method name, e.g. `getUpdates`.
    const METHOD: &'static str;
    /// Decoded shape of the envelope's `result` field.
    type Response: DeserializeOwned + Send + 'static;
}

/// Update kinds a client may subscribe to; serialized as the set of
/// non-default flag names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowedUpdate {
    Message,
    EditedMessage,
    ChannelPost,
    EditedChannelPost,
    CallbackQuery,
}

/// Long-poll for pending updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetUpdates {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_updates: Option<Vec<AllowedUpdate>>,
}

impl ApiRequest for GetUpdates {
    const METHOD: &'static str = "getUpdates";
    type Response = Vec<Update>;
}

/// Text formatting applied by the server to an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseMode {
    #[serde(rename = "HTML")]
    Html,
    MarkdownV2,
}

/// Send a text message to a chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessage {
    pub chat_id: ChatId,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<ParseMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_notification: Option<bool>,
}

impl SendMessage {
    #[must_use]
    pub fn new(chat_id: impl Into<ChatId>, text: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            text: text.into(),
            parse_mode: None,
            reply_to_message_id: None,
            disable_notification: None,
        }
    }

    #[must_use]
    pub fn reply_to(mut self, message_id: i64) -> Self {
        self.reply_to_message_id = Some(message_id);
        self
    }

    #[must_use]
    pub const fn parse_mode(mut self, mode: ParseMode) -> Self {
        self.parse_mode = Some(mode);
        self
    }
}

impl ApiRequest for SendMessage {
    const METHOD: &'static str = "sendMessage";
    type Response = Message;
}

/// Acknowledge a callback query so the client stops its spinner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerCallbackQuery {
    pub callback_query_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_alert: Option<bool>,
}

impl AnswerCallbackQuery {
    #[must_use]
    pub fn new(callback_query_id: impl Into<String>) -> Self {
        Self {
            callback_query_id: callback_query_id.into(),
            text: None,
            show_alert: None,
        }
    }
}

impl ApiRequest for AnswerCallbackQuery {
    const METHOD: &'static str = "answerCallbackQuery";
    type Response = bool;
}

/// Publish the bot's command list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetMyCommands {
    pub commands: Vec<BotCommand>,
}

impl ApiRequest for SetMyCommands {
    const METHOD: &'static str = "setMyCommands";
    type Response = bool;
}

/// Fetch the bot's own identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetMe {}

impl ApiRequest for GetMe {
    const METHOD: &'static str = "getMe";
    type Response = BotUser;
}
