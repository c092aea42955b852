//! Bot API client.
//!
//! One operation: execute a typed request, returning a typed result or a
//! structured [`ApiError`]. The client is agnostic to retries; retry policy
//! lives with the callers (the pump backs off on its own schedule, outbound
//! sends go through [`crate::send`]).

pub mod error;
pub mod requests;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::trace;

pub use error::{ApiError, ResponseParameters, SYNTHETIC_ERROR_CODE};
pub use requests::{
    AllowedUpdate, AnswerCallbackQuery, ApiRequest, GetMe, GetUpdates, ParseMode, SendMessage,
    SetMyCommands,
};
pub use types::{
    BotCommand, BotUser, CallbackQuery, Chat, EntityKind, Message, MessageEntity, Update, User,
};

/// Headroom added to the server-side long-poll timeout so the transport
/// timeout never fires before the server responds.
const LONG_POLL_MARGIN: Duration = Duration::from_secs(10);

/// The slice of the Bot API the runtime and its handlers call. `ApiClient` is
/// the production implementation; tests substitute scripted fakes.
#[async_trait]
pub trait BotApi: Send + Sync {
    async fn get_updates(&self, request: GetUpdates) -> Result<Vec<Update>, ApiError>;

    async fn send_message(&self, request: SendMessage) -> Result<Message, ApiError>;

    async fn answer_callback_query(&self, request: AnswerCallbackQuery)
        -> Result<bool, ApiError>;

    async fn set_my_commands(&self, request: SetMyCommands) -> Result<bool, ApiError>;

    async fn get_me(&self) -> Result<BotUser, ApiError>;
}

/// Response envelope shared by every method.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
    parameters: Option<ResponseParameters>,
}

/// HTTPS client for one bot token. Safe for concurrent use.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    /// Creates a client against the given API base (no trailing slash
    /// required) with a transport-level timeout.
    #[must_use]
    pub fn new(token: impl Into<String>, api_base: impl Into<String>, http_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let base = api_base.into();
        Self {
            http,
            base_url: base.trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// The request URL embeds the token; anything derived from it that can
    /// reach logs or error text goes through here first.
    fn redact(&self, text: &str) -> String {
        text.replace(&self.token, "[REDACTED]")
    }

    async fn execute<R: ApiRequest>(
        &self,
        request: &R,
        timeout: Option<Duration>,
    ) -> Result<R::Response, ApiError> {
        let url = format!("{}/bot{}/{}", self.base_url, self.token, R::METHOD);
        trace!(method = R::METHOD, "executing api request");

        let mut builder = self.http.post(&url).json(request);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::Transport(self.redact(&e.to_string())))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::Transport(self.redact(&e.to_string())))?;

        let envelope: ApiResponse<R::Response> = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => {
                return Err(ApiError::Decode(format!("{}: {e}", R::METHOD)));
            }
            Err(_) => {
                return Err(ApiError::Transport(format!(
                    "{}: http status {status}",
                    R::METHOD
                )));
            }
        };

        if !envelope.ok {
            let parameters = envelope.parameters.unwrap_or_default();
            return Err(ApiError::Protocol {
                description: envelope
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
                error_code: envelope.error_code.unwrap_or(SYNTHETIC_ERROR_CODE),
                retry_after: parameters.retry_after,
                migrate_to_chat_id: parameters.migrate_to_chat_id,
            });
        }

        envelope.result.ok_or_else(|| ApiError::Protocol {
            description: format!("{}: ok=true but result is missing", R::METHOD),
            error_code: SYNTHETIC_ERROR_CODE,
            retry_after: None,
            migrate_to_chat_id: None,
        })
    }
}

#[async_trait]
impl BotApi for ApiClient {
    async fn get_updates(&self, request: GetUpdates) -> Result<Vec<Update>, ApiError> {
        // The server holds this request open for up to `timeout` seconds.
        let poll = Duration::from_secs(request.timeout.unwrap_or(0));
        self.execute(&request, Some(poll + LONG_POLL_MARGIN)).await
    }

    async fn send_message(&self, request: SendMessage) -> Result<Message, ApiError> {
        self.execute(&request, None).await
    }

    async fn answer_callback_query(
        &self,
        request: AnswerCallbackQuery,
    ) -> Result<bool, ApiError> {
        self.execute(&request, None).await
    }

    async fn set_my_commands(&self, request: SetMyCommands) -> Result<bool, ApiError> {
        self.execute(&request, None).await
    }

    async fn get_me(&self) -> Result<BotUser, ApiError> {
        self.execute(&GetMe {}, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client_for(server: &MockServer) -> ApiClient {
        ApiClient::new("test-token", server.base_url(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn successful_envelope_decodes_the_typed_result() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/bottest-token/getMe")
                .json_body(json!({}));
            then.status(200).json_body(json!({
                "ok": true,
                "result": {"id": 7, "first_name": "flowbot", "username": "flow_bot"}
            }));
        });

        let me = client_for(&server).get_me().await.expect("getMe");
        assert_eq!(me.id, 7);
        assert_eq!(me.username.as_deref(), Some("flow_bot"));
        mock.assert();
    }

    #[tokio::test]
    async fn ok_false_maps_to_protocol_with_server_hints() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/bottest-token/getUpdates");
            then.status(429).json_body(json!({
                "ok": false,
                "description": "Too Many Requests: retry after 30",
                "error_code": 429,
                "parameters": {"retry_after": 30}
            }));
        });

        let err = client_for(&server)
            .get_updates(GetUpdates::default())
            .await
            .expect_err("must fail");
        assert!(matches!(err, ApiError::Protocol { error_code: 429, .. }));
        assert_eq!(err.retry_after(), Some(30));
    }

    #[tokio::test]
    async fn ok_true_without_result_is_a_protocol_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/bottest-token/getMe");
            then.status(200).json_body(json!({"ok": true}));
        });

        let err = client_for(&server).get_me().await.expect_err("must fail");
        assert!(
            matches!(err, ApiError::Protocol { error_code, .. } if error_code == SYNTHETIC_ERROR_CODE)
        );
    }

    #[tokio::test]
    async fn malformed_success_body_is_a_decode_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/bottest-token/getMe");
            then.status(200).body("not json");
        });

        let err = client_for(&server).get_me().await.expect_err("must fail");
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[tokio::test]
    async fn http_failure_without_envelope_is_transport() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/bottest-token/getMe");
            then.status(502).body("<html>bad gateway</html>");
        });

        let err = client_for(&server).get_me().await.expect_err("must fail");
        assert!(matches!(err, ApiError::Transport(_)));
    }

    #[tokio::test]
    async fn transport_errors_never_leak_the_token() {
        // Nothing listens on this port; the connection error text embeds the
        // request URL, which embeds the token.
        let client = ApiClient::new(
            "123:very-secret",
            "http://127.0.0.1:1",
            Duration::from_millis(250),
        );
        let err = client.get_me().await.expect_err("must fail");
        assert!(!err.to_string().contains("very-secret"), "{err}");
    }
}
