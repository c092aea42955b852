//! Resilient outbound helpers.
//!
//! Wrap Bot API send operations with bounded exponential backoff and jitter
//! for transient failures. The update pump never goes through here — its
//! back-off schedule is fixed by contract.

use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::warn;

use crate::api::{AnswerCallbackQuery, ApiError, BotApi, Message, SendMessage};
use crate::config::{
    SEND_RETRY_INITIAL_BACKOFF_MS, SEND_RETRY_MAX_ATTEMPTS, SEND_RETRY_MAX_BACKOFF_MS,
};

fn retry_strategy() -> impl Iterator<Item = std::time::Duration> {
    ExponentialBackoff::from_millis(SEND_RETRY_INITIAL_BACKOFF_MS)
        .max_delay(std::time::Duration::from_millis(SEND_RETRY_MAX_BACKOFF_MS))
        .map(jitter)
        .take(SEND_RETRY_MAX_ATTEMPTS)
}

/// Sends a message, retrying transient failures with exponential backoff.
///
/// # Errors
///
/// Returns the last [`ApiError`] once the attempts are exhausted, or the
/// first non-transient one.
pub async fn send_message_resilient(
    api: &dyn BotApi,
    request: SendMessage,
) -> Result<Message, ApiError> {
    let chat_id = request.chat_id.clone();
    RetryIf::spawn(
        retry_strategy(),
        || api.send_message(request.clone()),
        ApiError::is_transient,
    )
    .await
    .map_err(|e| {
        warn!(chat_id = %chat_id, error = %e, "send_message failed after retries");
        e
    })
}

/// Answers a callback query, retrying transient failures.
///
/// # Errors
///
/// Returns the last [`ApiError`] once the attempts are exhausted, or the
/// first non-transient one.
pub async fn answer_callback_resilient(
    api: &dyn BotApi,
    request: AnswerCallbackQuery,
) -> Result<bool, ApiError> {
    RetryIf::spawn(
        retry_strategy(),
        || api.answer_callback_query(request.clone()),
        ApiError::is_transient,
    )
    .await
    .map_err(|e| {
        warn!(error = %e, "answer_callback_query failed after retries");
        e
    })
}
