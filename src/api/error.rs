//! Error taxonomy for Bot API calls.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Synthetic code reported for errors the server never numbered (malformed
/// bodies, `ok=true` envelopes without a result).
pub const SYNTHETIC_ERROR_CODE: i64 = -1;

/// Optional hints the server attaches to an error envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migrate_to_chat_id: Option<i64>,
}

/// Errors that can occur while executing a Bot API request.
#[derive(Debug, Error)]
pub enum ApiError {
    /// I/O or HTTP-status failure before a well-formed envelope was read.
    /// Retriable by caller policy.
    #[error("transport error: {0}")]
    Transport(String),

    /// Well-formed response with `ok=false`.
    #[error("api error {error_code}: {description}")]
    Protocol {
        description: String,
        error_code: i64,
        retry_after: Option<u64>,
        migrate_to_chat_id: Option<i64>,
    },

    /// Malformed body on a successful transport exchange. Fatal to the call;
    /// treated like a protocol error with a synthetic code.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ApiError {
    /// Server-supplied minimum wait before retrying, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<u64> {
        match self {
            Self::Protocol { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Chat-migration hint, surfaced to the handler's error callback.
    #[must_use]
    pub const fn migrate_to_chat_id(&self) -> Option<i64> {
        match self {
            Self::Protocol {
                migrate_to_chat_id, ..
            } => *migrate_to_chat_id,
            _ => None,
        }
    }

    /// Error code, with [`SYNTHETIC_ERROR_CODE`] standing in where the server
    /// supplied none.
    #[must_use]
    pub const fn error_code(&self) -> Option<i64> {
        match self {
            Self::Protocol { error_code, .. } => Some(*error_code),
            Self::Decode(_) => Some(SYNTHETIC_ERROR_CODE),
            Self::Transport(_) => None,
        }
    }

    /// Whether a retry might succeed: network faults, rate limits, and
    /// server-side 5xx responses.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Protocol { error_code, .. } => {
                *error_code == 429 || (*error_code >= 500 && *error_code < 600)
            }
            Self::Decode(_) => false,
        }
    }
}
