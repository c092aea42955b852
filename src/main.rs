use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chatflow::api::{ApiClient, BotApi, BotCommand, CallbackQuery, Message, SetMyCommands};
use chatflow::handler::{ChatHandler, ChatHandlerFactory, SessionControl};
use chatflow::{Runtime, Settings};
use dotenvy::dotenv;
use regex::Regex;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting the bot token from log output.
struct RedactionPatterns {
    token_in_url: Regex,
    bare_token: Regex,
}

impl RedactionPatterns {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token_in_url: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)")?,
            bare_token: Regex::new(r"[0-9]{8,10}:[A-Za-z0-9_-]{35}")?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let output = self
            .token_in_url
            .replace_all(input, "$1[TELEGRAM_TOKEN]")
            .to_string();
        self.bare_token
            .replace_all(&output, "[TELEGRAM_TOKEN]")
            .to_string()
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // Report the original length to satisfy the Write contract even when
        // the redacted string differs in size.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: (self.make_inner)(),
            patterns: self.patterns.clone(),
        }
    }
}

/// Minimal conversation logic: echoes text back, understands /start and
/// /stop. Doubles as the smallest realistic handler for manual testing.
struct EchoHandler {
    control: SessionControl,
}

#[async_trait]
impl ChatHandler for EchoHandler {
    async fn begin(&mut self, user: Option<&chatflow::api::User>) -> Result<()> {
        info!(
            chat_id = %self.control.chat_id(),
            user = user.map(|u| u.first_name.as_str()).unwrap_or("-"),
            "conversation started"
        );
        Ok(())
    }

    async fn handle_message(&mut self, message: Message) -> Result<()> {
        match message.bot_command().as_deref() {
            Some("start") => {
                self.control
                    .send("Hi! Send me anything and I will echo it back. /stop ends the chat.")
                    .await?;
            }
            Some("stop") => {
                self.control.send("Bye!").await?;
                self.control.stop();
            }
            Some(other) => {
                self.control.send(format!("Unknown command: /{other}")).await?;
            }
            None => {
                if let Some(text) = message.text.as_deref() {
                    self.control.reply(&message, text).await?;
                }
            }
        }
        Ok(())
    }

    async fn handle_callback(&mut self, callback: CallbackQuery) -> Result<()> {
        let data = callback.data.clone().unwrap_or_default();
        self.control.answer_callback(&callback, None).await?;
        self.control.send(format!("Button: {data}")).await?;
        Ok(())
    }

    async fn on_error(&mut self, error: anyhow::Error) -> Result<()> {
        warn!(chat_id = %self.control.chat_id(), error = %error, "handler error");
        self.control.send("Something went wrong, try again.").await?;
        Ok(())
    }

    async fn end(&mut self, _user: Option<&chatflow::api::User>) -> Result<()> {
        info!(chat_id = %self.control.chat_id(), "conversation ended");
        Ok(())
    }
}

struct EchoFactory;

#[async_trait]
impl ChatHandlerFactory for EchoFactory {
    async fn start(&self, api: Arc<dyn BotApi>) -> Result<()> {
        let me = api.get_me().await?;
        info!(bot = me.username.as_deref().unwrap_or(&me.first_name), "bot identified");
        api.set_my_commands(SetMyCommands {
            commands: vec![
                BotCommand::new("start", "Start the conversation"),
                BotCommand::new("stop", "End the conversation"),
            ],
        })
        .await?;
        Ok(())
    }

    fn create(&self, control: SessionControl) -> Box<dyn ChatHandler> {
        Box::new(EchoHandler { control })
    }

    async fn stop(&self, _api: Arc<dyn BotApi>) -> Result<()> {
        info!("echo bot stopped");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile redaction patterns: {e}");
        e
    })?);
    init_logging(patterns);

    info!("Starting chatflow echo bot...");

    let settings = match Settings::new() {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let api = Arc::new(ApiClient::new(
        settings.telegram_token.clone(),
        settings.api_base.clone(),
        settings.http_timeout(),
    ));

    let runtime = Runtime::new(api, Arc::new(EchoFactory), settings.runtime_config());
    let shutdown = runtime.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received; shutting down");
            shutdown.cancel();
        }
    });

    runtime.run().await?;
    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter {
        make_inner: io::stderr,
        patterns,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}
