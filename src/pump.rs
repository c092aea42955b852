//! Update pump.
//!
//! One long-polling producer: turns `getUpdates` batches into an ordered
//! stream for the demultiplexer. The server redelivers anything it has not
//! seen acknowledged, so the offset is advanced only after a batch has been
//! emitted downstream — a crash in between means redelivery, never loss.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ApiError, BotApi, GetUpdates};
use crate::config::RuntimeConfig;
use crate::demux::Demultiplexer;

/// Long-poll loop with monotonic acknowledgement offset and fixed back-off.
pub struct UpdatePump {
    api: Arc<dyn BotApi>,
    config: RuntimeConfig,
    shutdown: CancellationToken,
}

impl UpdatePump {
    #[must_use]
    pub fn new(api: Arc<dyn BotApi>, config: RuntimeConfig, shutdown: CancellationToken) -> Self {
        Self {
            api,
            config,
            shutdown,
        }
    }

    /// Runs until the shutdown token fires. API failures are logged and
    /// retried after a back-off equal to the long-poll timeout, stretched to
    /// any server-supplied `retry_after`.
    ///
    /// # Errors
    ///
    /// Returns an error only when the downstream flows close while the
    /// runtime is still live — a dispatcher died underneath the pump.
    pub async fn run(self, demux: Demultiplexer) -> Result<(), ApiError> {
        let poll_timeout = self.config.long_poll_timeout.as_secs();
        let mut next_offset: i64 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                info!("update pump stopped");
                return Ok(());
            }

            let request = GetUpdates {
                offset: Some(next_offset),
                limit: Some(self.config.update_limit),
                timeout: Some(poll_timeout),
                allowed_updates: None,
            };

            let batch = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("update pump stopped");
                    return Ok(());
                }
                result = self.api.get_updates(request) => result,
            };

            match batch {
                Ok(updates) => {
                    if updates.is_empty() {
                        continue;
                    }
                    let batch_max = updates
                        .iter()
                        .map(|u| u.update_id)
                        .max()
                        .unwrap_or(next_offset);
                    debug!(count = updates.len(), batch_max, "emitting update batch");
                    for update in updates {
                        if !demux.route(update) {
                            if self.shutdown.is_cancelled() {
                                return Ok(());
                            }
                            return Err(ApiError::Transport(
                                "update flows closed while runtime is live".to_string(),
                            ));
                        }
                    }
                    // Acknowledge only after the whole batch went downstream.
                    next_offset = batch_max + 1;
                }
                Err(e) => {
                    let wait = poll_timeout.max(e.retry_after().unwrap_or(0));
                    warn!(
                        error = %e,
                        wait_secs = wait,
                        next_offset,
                        "getUpdates failed; backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => {
                            info!("update pump stopped");
                            return Ok(());
                        }
                        () = tokio::time::sleep(Duration::from_secs(wait)) => {}
                    }
                }
            }
        }
    }
}
