//! Configuration and settings management.
//!
//! [`Settings`] is the environment-backed configuration the binary loads;
//! [`RuntimeConfig`] is the plain knob set the library consumes, so embedders
//! and tests can construct one without touching the environment.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Default server-side long-poll timeout, in seconds.
pub const DEFAULT_LONG_POLL_TIMEOUT_SECS: u64 = 60;
/// Default `getUpdates` batch limit.
pub const DEFAULT_UPDATE_LIMIT: u32 = 100;
/// Default bound on each session's `end` callback at teardown, in seconds.
pub const DEFAULT_END_GRACE_SECS: u64 = 10;
/// Default transport-level HTTP timeout, in seconds. Must exceed the
/// long-poll timeout.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 90;

/// Initial backoff for outbound send retries, in milliseconds.
pub const SEND_RETRY_INITIAL_BACKOFF_MS: u64 = 500;
/// Backoff ceiling for outbound send retries, in milliseconds.
pub const SEND_RETRY_MAX_BACKOFF_MS: u64 = 4_000;
/// Attempts per outbound send before the error is surfaced.
pub const SEND_RETRY_MAX_ATTEMPTS: usize = 3;

/// Application settings loaded from environment variables (and optional
/// `config/*` files).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Telegram Bot API token.
    pub telegram_token: String,

    /// API base URL; override for tests or local API servers.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Server-side long-poll timeout in seconds.
    #[serde(default = "default_long_poll_timeout_secs")]
    pub long_poll_timeout_secs: u64,

    /// Maximum updates per `getUpdates` batch.
    #[serde(default = "default_update_limit")]
    pub update_limit: u32,

    /// Idle seconds after which a session is retired. Off when absent.
    pub inactivity_timeout_secs: Option<u64>,

    /// Bound on each session's `end` callback at teardown, in seconds.
    #[serde(default = "default_end_grace_secs")]
    pub end_grace_secs: u64,

    /// Transport-level HTTP timeout in seconds.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

const fn default_long_poll_timeout_secs() -> u64 {
    DEFAULT_LONG_POLL_TIMEOUT_SECS
}

const fn default_update_limit() -> u32 {
    DEFAULT_UPDATE_LIMIT
}

const fn default_end_grace_secs() -> u64 {
    DEFAULT_END_GRACE_SECS
}

const fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

impl Settings {
    /// Loads settings from optional `config/*` files and the environment.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` when a source fails to load, a required key is
    /// missing, or validation rejects the combination.
    pub fn new() -> Result<Self, ConfigError> {
        let settings: Self = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::default().ignore_empty(true))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram_token.trim().is_empty() {
            return Err(ConfigError::Message("telegram_token is empty".into()));
        }
        if self.http_timeout_secs <= self.long_poll_timeout_secs {
            return Err(ConfigError::Message(format!(
                "http_timeout_secs ({}) must exceed long_poll_timeout_secs ({})",
                self.http_timeout_secs, self.long_poll_timeout_secs
            )));
        }
        Ok(())
    }

    /// The knob subset the runtime consumes.
    #[must_use]
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            long_poll_timeout: Duration::from_secs(self.long_poll_timeout_secs),
            update_limit: self.update_limit,
            inactivity_timeout: self.inactivity_timeout_secs.map(Duration::from_secs),
            end_grace: Duration::from_secs(self.end_grace_secs),
        }
    }

    /// Transport-level HTTP timeout.
    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Runtime knobs, decoupled from the environment.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Server-side long-poll timeout; also the pump's retry back-off.
    pub long_poll_timeout: Duration,
    /// Maximum updates per `getUpdates` batch.
    pub update_limit: u32,
    /// Idle span after which a session is retired; `None` disables the timer.
    pub inactivity_timeout: Option<Duration>,
    /// Bound on each session's `end` callback at teardown.
    pub end_grace: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            long_poll_timeout: Duration::from_secs(DEFAULT_LONG_POLL_TIMEOUT_SECS),
            update_limit: DEFAULT_UPDATE_LIMIT,
            inactivity_timeout: None,
            end_grace: Duration::from_secs(DEFAULT_END_GRACE_SECS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_settings() -> Settings {
        Settings {
            telegram_token: "123:abc".into(),
            api_base: default_api_base(),
            long_poll_timeout_secs: 60,
            update_limit: 100,
            inactivity_timeout_secs: None,
            end_grace_secs: 10,
            http_timeout_secs: 90,
        }
    }

    #[test]
    fn validation_rejects_http_timeout_below_long_poll() {
        let mut settings = base_settings();
        settings.http_timeout_secs = 30;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validation_rejects_empty_token() {
        let mut settings = base_settings();
        settings.telegram_token = "  ".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn runtime_config_mirrors_the_settings() {
        let mut settings = base_settings();
        settings.inactivity_timeout_secs = Some(300);
        let config = settings.runtime_config();
        assert_eq!(config.long_poll_timeout, Duration::from_secs(60));
        assert_eq!(config.inactivity_timeout, Some(Duration::from_secs(300)));
        assert_eq!(config.update_limit, 100);
    }
}
