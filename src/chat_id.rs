//! Chat identifiers.
//!
//! Telegram addresses a chat either by a signed 64-bit id or by a public
//! `@handle`. Both shapes flow through the runtime as one value type so the
//! registry can key on whichever the wire delivered.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A chat identifier: numeric id or textual `@handle`.
///
/// Handles compare and hash ASCII case-insensitively and without the leading
/// `@`; rendering always prepends the `@`. The ordering places every numeric
/// id above every handle — an internal tie-break for deterministic iteration,
/// not a domain statement.
#[derive(Debug, Clone)]
pub enum ChatId {
    /// Numeric chat id (private chats, groups, channels).
    Id(i64),
    /// Public handle, stored without the leading `@`.
    Handle(String),
}

impl ChatId {
    /// True for the numeric variant.
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Id(_))
    }

    /// Numeric value, if this is the numeric variant.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Id(id) => Some(*id),
            Self::Handle(_) => None,
        }
    }

    fn handle_key(handle: &str) -> impl Iterator<Item = char> + '_ {
        handle.chars().map(|c| c.to_ascii_lowercase())
    }
}

impl From<i64> for ChatId {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

impl FromStr for ChatId {
    type Err = std::convert::Infallible;

    /// Purely numeric input becomes the numeric variant; anything else is a
    /// handle, with at most one leading `@` stripped.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(id) = trimmed.parse::<i64>() {
            return Ok(Self::Id(id));
        }
        let handle = trimmed.strip_prefix('@').unwrap_or(trimmed);
        Ok(Self::Handle(handle.to_string()))
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Handle(handle) => write!(f, "@{handle}"),
        }
    }
}

impl PartialEq for ChatId {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Id(a), Self::Id(b)) => a == b,
            (Self::Handle(a), Self::Handle(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        }
    }
}

impl Eq for ChatId {}

impl Hash for ChatId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Id(id) => {
                0u8.hash(state);
                id.hash(state);
            }
            Self::Handle(handle) => {
                1u8.hash(state);
                for c in Self::handle_key(handle) {
                    c.hash(state);
                }
            }
        }
    }
}

impl PartialOrd for ChatId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChatId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Id(a), Self::Id(b)) => a.cmp(b),
            (Self::Handle(a), Self::Handle(b)) => {
                Self::handle_key(a).cmp(Self::handle_key(b))
            }
            // Numeric ids sort above handles.
            (Self::Id(_), Self::Handle(_)) => Ordering::Greater,
            (Self::Handle(_), Self::Id(_)) => Ordering::Less,
        }
    }
}

impl Serialize for ChatId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Id(id) => serializer.serialize_i64(*id),
            Self::Handle(_) => serializer.serialize_str(&self.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for ChatId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ChatIdVisitor;

        impl Visitor<'_> for ChatIdVisitor {
            type Value = ChatId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an integer chat id or a string handle")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<ChatId, E> {
                Ok(ChatId::Id(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<ChatId, E> {
                i64::try_from(v)
                    .map(ChatId::Id)
                    .map_err(|_| E::custom("chat id out of range for i64"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ChatId, E> {
                match v.parse() {
                    Ok(id) => Ok(id),
                    Err(never) => match never {},
                }
            }
        }

        deserializer.deserialize_any(ChatIdVisitor)
    }
}
