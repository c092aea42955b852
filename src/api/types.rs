//! Wire records for the Bot API.
//!
//! All records use `snake_case` keys and omit `None` fields on write. Entity
//! offsets address UTF-16 code units, never bytes — substring extraction must
//! go through [`utf16_substring`].

use serde::{Deserialize, Deserializer, Serialize};

use crate::chat_id::ChatId;

/// Dates past this magnitude cannot be Unix seconds and are read as
/// milliseconds.
const MAX_UNIX_SECONDS: i64 = 99_999_999_999;

fn normalize_unix_seconds(raw: i64) -> i64 {
    if raw.abs() > MAX_UNIX_SECONDS {
        raw / 1000
    } else {
        raw
    }
}

fn de_unix_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    i64::deserialize(deserializer).map(normalize_unix_seconds)
}

fn de_opt_unix_seconds<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<i64>, D::Error> {
    Ok(Option::<i64>::deserialize(deserializer)?.map(normalize_unix_seconds))
}

/// One envelope from the long-poll endpoint. At most one event variant is
/// populated; variants this runtime does not consume land in `extra` so the
/// demultiplexer can name them when it drops the update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_message: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_post: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_channel_post: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_query: Option<CallbackQuery>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Update {
    /// First populated message-flow variant, in the wire's precedence order.
    #[must_use]
    pub fn into_message(self) -> Option<Message> {
        self.message
            .or(self.edited_message)
            .or(self.channel_post)
            .or(self.edited_channel_post)
    }

    /// Names of the unrecognized variant keys, for drop logging.
    #[must_use]
    pub fn extra_keys(&self) -> Vec<&str> {
        self.extra.keys().map(String::as_str).collect()
    }
}

/// A chat as seen inside an update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl Chat {
    #[must_use]
    pub fn new(id: impl Into<ChatId>) -> Self {
        Self {
            id: id.into(),
            title: None,
            username: None,
        }
    }
}

/// A Telegram user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// The bot's own identity, as returned by `getMe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotUser {
    pub id: i64,
    pub first_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Kinds of message entities the runtime distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Mention,
    Hashtag,
    BotCommand,
    Url,
    Email,
    Bold,
    Italic,
    Code,
    Pre,
    TextLink,
    #[serde(other)]
    Unknown,
}

/// A span of message text. `offset` and `length` count UTF-16 code units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEntity {
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub offset: i64,
    pub length: i64,
}

/// An inbound chat message (also covers edited messages and channel posts).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default, deserialize_with = "de_unix_seconds")]
    pub date: i64,
    #[serde(
        default,
        deserialize_with = "de_opt_unix_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub edit_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<MessageEntity>>,
}

impl Message {
    /// Extracts the bot command this message carries, if any.
    ///
    /// An entity of kind `bot_command` wins. Without entities, a text whose
    /// first character is `/` counts as a command when its first whitespace
    /// sits past position 1 (or is absent). Positions are UTF-16 code units.
    /// The result is lower-cased and stripped of the leading `/` and of any
    /// `@botname` suffix.
    #[must_use]
    pub fn bot_command(&self) -> Option<String> {
        let text = self.text.as_deref()?;
        if let Some(entities) = &self.entities {
            let entity = entities.iter().find(|e| e.kind == EntityKind::BotCommand)?;
            let offset = usize::try_from(entity.offset).ok()?;
            let length = usize::try_from(entity.length).ok()?;
            let raw = utf16_substring(text, offset, length)?;
            return normalize_command(&raw);
        }

        if !text.starts_with('/') {
            return None;
        }
        let mut pos = 0usize;
        let mut first_whitespace = None;
        for c in text.chars() {
            if c.is_whitespace() {
                first_whitespace = Some(pos);
                break;
            }
            pos += c.len_utf16();
        }
        match first_whitespace {
            None if pos > 1 => normalize_command(text),
            Some(ws) if ws > 1 => {
                let head = utf16_substring(text, 0, ws)?;
                normalize_command(&head)
            }
            _ => None,
        }
    }
}

fn normalize_command(raw: &str) -> Option<String> {
    let body = raw.strip_prefix('/')?;
    let body = body.split('@').next().unwrap_or(body);
    if body.is_empty() {
        return None;
    }
    Some(body.to_lowercase())
}

/// An inbound callback query (inline-keyboard button press).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// A command entry for `setMyCommands`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotCommand {
    pub command: String,
    pub description: String,
}

impl BotCommand {
    #[must_use]
    pub fn new(command: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            description: description.into(),
        }
    }
}

/// Extracts `text[offset..offset + length]` addressed in UTF-16 code units.
///
/// Returns `None` when the range exceeds the text or splits a surrogate pair.
#[must_use]
pub fn utf16_substring(text: &str, offset: usize, length: usize) -> Option<String> {
    let end = offset.checked_add(length)?;
    let mut out = String::new();
    let mut pos = 0usize;
    for c in text.chars() {
        if pos >= end {
            break;
        }
        let units = c.len_utf16();
        if pos >= offset {
            if pos + units > end {
                // Range ends inside a surrogate pair.
                return None;
            }
            out.push(c);
        } else if pos + units > offset {
            // Range starts inside a surrogate pair.
            return None;
        }
        pos += units;
    }
    if pos < end {
        return None;
    }
    Some(out)
}
