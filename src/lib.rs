//! chatflow — a concurrent Telegram bot runtime.
//!
//! One long-polling producer feeds many per-chat consumers. The crate owns the
//! dispatch layer: the update pump, the demultiplexer, the chat-keyed session
//! registry, per-session serialization and fault isolation, and deterministic
//! shutdown. Conversation logic is supplied by the application through the
//! [`handler::ChatHandler`] interface; the crate never interprets chat content
//! beyond routing it.
//!
//! Data flow:
//!
//! ```text
//! ApiClient ⇒ UpdatePump ⇒ Demultiplexer ⇒ (messages, callbacks)
//!           ⇒ Dispatcher ⇒ SessionRegistry ⇒ Session ⇒ ChatHandler
//! ```

pub mod api;
pub mod chat_id;
pub mod config;
pub mod demux;
pub mod dispatch;
pub mod handler;
pub mod pump;
pub mod registry;
pub mod runtime;
pub mod send;
pub mod session;

pub use api::{ApiClient, ApiError, BotApi};
pub use chat_id::ChatId;
pub use config::{RuntimeConfig, Settings};
pub use handler::{ChatHandler, ChatHandlerFactory, SessionControl};
pub use runtime::{Runtime, RuntimeError};
