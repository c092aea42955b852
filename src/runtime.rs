//! Runtime choreography.
//!
//! `Start` → (pump ∥ message dispatch ∥ callback dispatch) → shutdown. The
//! shutdown path is deterministic: cancel the runtime scope, let the loops
//! wind down, end every live session under a fresh scope with a bounded
//! deadline, clear the registry, then run the `Stop` hook. `Stop` runs
//! whenever `Start` succeeded — even when everything in between failed — and
//! never when `Start` failed.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ApiError, BotApi};
use crate::config::RuntimeConfig;
use crate::demux::Demultiplexer;
use crate::dispatch::Dispatcher;
use crate::handler::ChatHandlerFactory;
use crate::pump::UpdatePump;
use crate::registry::SessionRegistry;

/// Why the runtime refused to run or stopped running.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The start hook failed; nothing was launched and the stop hook did not
    /// run.
    #[error("start hook failed: {0}")]
    Start(anyhow::Error),

    /// The update pump died for a reason other than cancellation.
    #[error("update pump failed: {0}")]
    Pump(#[from] ApiError),
}

/// One bot instance. Owns its registry; two runtimes never share sessions.
pub struct Runtime {
    api: Arc<dyn BotApi>,
    factory: Arc<dyn ChatHandlerFactory>,
    config: RuntimeConfig,
    shutdown: CancellationToken,
}

impl Runtime {
    #[must_use]
    pub fn new(
        api: Arc<dyn BotApi>,
        factory: Arc<dyn ChatHandlerFactory>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            api,
            factory,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops this runtime when cancelled. Cancellation counts as a
    /// successful exit.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs the bot until the shutdown token fires or the pump dies.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Start`] when the start hook fails;
    /// [`RuntimeError::Pump`] when the pump exits with a non-cancellation
    /// error (that error is the exit reason, reported after teardown).
    pub async fn run(self) -> Result<(), RuntimeError> {
        self.factory
            .start(Arc::clone(&self.api))
            .await
            .map_err(RuntimeError::Start)?;
        info!("start hook completed");

        let registry = Arc::new(SessionRegistry::new());
        let (demux, flows) = Demultiplexer::channel();
        let (stop_tx, stop_rx) = mpsc::unbounded_channel();

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&self.api),
            Arc::clone(&self.factory),
            self.config.clone(),
            self.shutdown.clone(),
            stop_tx,
        ));

        let pump = UpdatePump::new(
            Arc::clone(&self.api),
            self.config.clone(),
            self.shutdown.clone(),
        );
        let mut pump_task = tokio::spawn(pump.run(demux));

        let crate::demux::UpdateFlows {
            messages,
            callbacks,
        } = flows;
        let message_task = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.run_messages(messages).await })
        };
        let callback_task = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.run_callbacks(callbacks).await })
        };
        let retire_task = tokio::spawn(retire_loop(
            Arc::clone(&registry),
            self.shutdown.clone(),
            stop_rx,
        ));
        info!("runtime started");

        // Run until told to stop, or until the pump gives up on its own.
        let pump_result = tokio::select! {
            _ = self.shutdown.cancelled() => None,
            joined = &mut pump_task => Some(joined),
        };
        self.shutdown.cancel();
        let pump_result = match pump_result {
            Some(joined) => joined,
            None => pump_task.await,
        };
        let pump_result = pump_result
            .unwrap_or_else(|e| Err(ApiError::Transport(format!("update pump task failed: {e}"))));

        let _ = message_task.await;
        let _ = callback_task.await;
        let _ = retire_task.await;

        let sessions = registry.snapshot();
        info!(count = sessions.len(), "ending live sessions");
        let mut ends = Vec::with_capacity(sessions.len());
        for session in sessions {
            ends.push(tokio::spawn(async move { session.end(None).await }));
        }
        for end in ends {
            let _ = end.await;
        }
        registry.clear();

        if let Err(e) = self.factory.stop(Arc::clone(&self.api)).await {
            warn!(error = %e, "stop hook failed");
        }
        info!("runtime stopped");

        pump_result.map_err(RuntimeError::Pump)
    }
}

/// Serves session-stop requests (handler `stop()` calls and inactivity
/// expiries): removes the session from the registry, then ends it. Each end
/// runs on its own task so one chat's teardown never delays another's.
async fn retire_loop(
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
    mut stop_rx: mpsc::UnboundedReceiver<crate::chat_id::ChatId>,
) {
    let mut ends: Vec<tokio::task::JoinHandle<()>> = Vec::new();
    loop {
        let chat_id = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            item = stop_rx.recv() => match item {
                Some(chat_id) => chat_id,
                None => break,
            },
        };
        ends.retain(|end| !end.is_finished());
        if let Some(session) = registry.remove(&chat_id) {
            debug!(chat_id = %chat_id, "retiring session");
            ends.push(tokio::spawn(async move { session.end(None).await }));
        }
    }
    // Retired sessions must finish ending before the runtime moves on to its
    // stop hook.
    for end in ends {
        let _ = end.await;
    }
}
