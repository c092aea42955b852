//! Per-chat sessions.
//!
//! A session owns one `ChatHandler` exclusively and serializes every callback
//! for its chat through a mailbox drained by a dedicated worker task. The
//! mailbox preserves arrival order, so per-chat FIFO falls out of the design;
//! parallelism across chats comes from each session having its own worker.
//!
//! Cancellation is two signals racing every invocation: the runtime shutdown
//! token and the session's inactivity deadline. An in-flight callback is
//! dropped at its next await point when either fires; the completion token
//! flips once `end` has returned.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{CallbackQuery, Message, User};
use crate::chat_id::ChatId;
use crate::config::RuntimeConfig;
use crate::handler::ChatHandler;

/// Where a session is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, `begin` not yet completed.
    Fresh,
    /// `begin` completed; handling traffic.
    Active,
    /// End requested; no new work accepted.
    Ending,
    /// `end` returned; the worker is gone.
    Ended,
}

enum Job {
    Begin(Option<User>),
    Message(Message),
    Callback(CallbackQuery),
    End(Option<User>),
}

/// Handle to one chat's session. Cheap to clone via `Arc`; the worker task
/// holds its own reference, so dropping external handles does not end the
/// conversation.
pub struct Session {
    chat_id: ChatId,
    state: Mutex<SessionState>,
    jobs: mpsc::UnboundedSender<Job>,
    done: CancellationToken,
}

impl Session {
    /// Creates the session and spawns its worker.
    #[must_use]
    pub fn spawn(
        chat_id: ChatId,
        handler: Box<dyn ChatHandler>,
        shutdown: CancellationToken,
        config: &RuntimeConfig,
        stop_tx: mpsc::UnboundedSender<ChatId>,
    ) -> Arc<Self> {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            chat_id,
            state: Mutex::new(SessionState::Fresh),
            jobs: jobs_tx,
            done: CancellationToken::new(),
        });
        let worker = SessionWorker {
            session: Arc::clone(&session),
            handler,
            jobs: jobs_rx,
            shutdown,
            inactivity: config.inactivity_timeout,
            end_grace: config.end_grace,
            stop_tx,
            begun: false,
        };
        tokio::spawn(worker.run());
        session
    }

    #[must_use]
    pub const fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn accepting(&self) -> bool {
        matches!(self.state(), SessionState::Fresh | SessionState::Active)
    }

    pub(crate) fn enqueue_begin(&self, user: Option<User>) -> bool {
        self.accepting() && self.jobs.send(Job::Begin(user)).is_ok()
    }

    pub(crate) fn enqueue_message(&self, message: Message) -> bool {
        self.accepting() && self.jobs.send(Job::Message(message)).is_ok()
    }

    pub(crate) fn enqueue_callback(&self, callback: CallbackQuery) -> bool {
        self.accepting() && self.jobs.send(Job::Callback(callback)).is_ok()
    }

    /// Requests the end of this session without waiting for it. Queued work
    /// drains first; at shutdown the drain degenerates to dropping items.
    pub fn request_end(&self, user: Option<User>) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(*state, SessionState::Ending | SessionState::Ended) {
                return;
            }
            *state = SessionState::Ending;
        }
        let _ = self.jobs.send(Job::End(user));
    }

    /// Ends the session and waits until the `end` callback has returned (the
    /// worker bounds the callback itself, so this await is bounded too).
    /// Idempotent: later calls just wait.
    pub async fn end(&self, user: Option<User>) {
        self.request_end(user);
        self.done.cancelled().await;
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

enum Call {
    Begin(Option<User>),
    Message(Message),
    Callback(CallbackQuery),
    Error(anyhow::Error),
}

enum Outcome {
    Done(anyhow::Result<()>),
    Shutdown,
    Expired,
}

enum Flow {
    Continue { activity: bool },
    Finish(Option<User>),
}

struct SessionWorker {
    session: Arc<Session>,
    handler: Box<dyn ChatHandler>,
    jobs: mpsc::UnboundedReceiver<Job>,
    shutdown: CancellationToken,
    inactivity: Option<Duration>,
    end_grace: Duration,
    stop_tx: mpsc::UnboundedSender<ChatId>,
    begun: bool,
}

async fn idle_wait(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl SessionWorker {
    async fn run(mut self) {
        let mut deadline = self.next_deadline();
        let end_user = loop {
            let job = tokio::select! {
                biased;
                job = self.jobs.recv() => job,
                () = idle_wait(deadline) => {
                    debug!(chat_id = %self.session.chat_id, "session idle deadline expired");
                    let _ = self.stop_tx.send(self.session.chat_id.clone());
                    break None;
                }
            };
            let Some(job) = job else { break None };
            match job {
                Job::End(user) => break user,
                Job::Begin(user) => match self.process(Call::Begin(user), deadline).await {
                    Flow::Continue { .. } => {}
                    Flow::Finish(user) => break user,
                },
                Job::Message(message) => {
                    let hint = message.from.clone();
                    match self.process_handle(Call::Message(message), hint, deadline).await {
                        Flow::Continue { activity } => {
                            if activity {
                                deadline = self.next_deadline();
                            }
                        }
                        Flow::Finish(user) => break user,
                    }
                }
                Job::Callback(callback) => {
                    match self.process_handle(Call::Callback(callback), None, deadline).await {
                        Flow::Continue { activity } => {
                            if activity {
                                deadline = self.next_deadline();
                            }
                        }
                        Flow::Finish(user) => break user,
                    }
                }
            }
        };
        self.finish(end_user).await;
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.inactivity.map(|idle| Instant::now() + idle)
    }

    /// Runs one handle-flavoured job: begin-on-first-sight, then the call,
    /// with faults funnelled into `on_error`.
    async fn process_handle(
        &mut self,
        call: Call,
        user_hint: Option<User>,
        deadline: Option<Instant>,
    ) -> Flow {
        if !self.begun {
            if let finish @ Flow::Finish(_) = self.process(Call::Begin(user_hint), deadline).await {
                return finish;
            }
            // A shutdown skip leaves begin un-run; drop the item rather than
            // handling it on a session that never began.
            if !self.begun {
                return Flow::Continue { activity: false };
            }
        }
        self.process(call, deadline).await
    }

    async fn process(&mut self, call: Call, deadline: Option<Instant>) -> Flow {
        if self.shutdown.is_cancelled() {
            debug!(chat_id = %self.session.chat_id, "dropping queued work at shutdown");
            return Flow::Continue { activity: false };
        }

        let is_begin = matches!(call, Call::Begin(_));
        if is_begin && self.begun {
            return Flow::Continue { activity: false };
        }

        let outcome = self.invoke(call, deadline).await;
        // Begin counts as invoked on every outcome except the shutdown skip,
        // so end stays paired with it and never repeats it.
        if is_begin && !matches!(outcome, Outcome::Shutdown) {
            self.begun = true;
        }
        match outcome {
            Outcome::Done(Ok(())) => {
                if is_begin {
                    self.session.set_state(SessionState::Active);
                }
                Flow::Continue { activity: true }
            }
            Outcome::Done(Err(error)) => {
                if is_begin {
                    self.session.set_state(SessionState::Active);
                }
                self.funnel_error(error, deadline).await
            }
            Outcome::Shutdown => Flow::Continue { activity: false },
            Outcome::Expired => {
                warn!(
                    chat_id = %self.session.chat_id,
                    "handler took too long; dropping update and ending session"
                );
                let _ = self.stop_tx.send(self.session.chat_id.clone());
                Flow::Finish(None)
            }
        }
    }

    /// Routes a handler fault into `on_error`; a second fault is logged and
    /// swallowed. A faulted handle is not a successful one, so none of these
    /// paths count as activity for the inactivity timer.
    async fn funnel_error(&mut self, error: anyhow::Error, deadline: Option<Instant>) -> Flow {
        debug!(chat_id = %self.session.chat_id, error = %error, "handler fault; routing to on_error");
        match self.invoke(Call::Error(error), deadline).await {
            Outcome::Done(Ok(())) => Flow::Continue { activity: false },
            Outcome::Done(Err(secondary)) => {
                warn!(
                    chat_id = %self.session.chat_id,
                    error = %secondary,
                    "on_error itself failed; dropping"
                );
                Flow::Continue { activity: false }
            }
            Outcome::Shutdown => Flow::Continue { activity: false },
            Outcome::Expired => Flow::Finish(None),
        }
    }

    /// One handler invocation under the per-call race: runtime shutdown and
    /// the inactivity deadline can both abort it.
    async fn invoke(&mut self, call: Call, deadline: Option<Instant>) -> Outcome {
        let shutdown = self.shutdown.clone();
        let handler = &mut self.handler;
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Outcome::Shutdown,
            () = idle_wait(deadline) => Outcome::Expired,
            result = async {
                match call {
                    Call::Begin(user) => handler.begin(user.as_ref()).await,
                    Call::Message(message) => handler.handle_message(message).await,
                    Call::Callback(callback) => handler.handle_callback(callback).await,
                    Call::Error(error) => handler.on_error(error).await,
                }
            } => Outcome::Done(result),
        }
    }

    /// Runs `end` once (only if `begin` ever ran), bounded by the grace
    /// period and under a fresh scope — shutdown must not cancel teardown.
    async fn finish(mut self, user: Option<User>) {
        self.session.set_state(SessionState::Ending);
        if self.begun {
            let ended =
                tokio::time::timeout(self.end_grace, self.handler.end(user.as_ref())).await;
            match ended {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(chat_id = %self.session.chat_id, error = %e, "end callback failed");
                }
                Err(_) => {
                    warn!(
                        chat_id = %self.session.chat_id,
                        grace_secs = self.end_grace.as_secs(),
                        "end callback exceeded the grace period"
                    );
                }
            }
        }
        self.session.set_state(SessionState::Ended);
        // The completion token flips only after end has returned.
        self.session.done.cancel();
        debug!(chat_id = %self.session.chat_id, "session ended");
    }
}
