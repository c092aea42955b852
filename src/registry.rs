//! Chat session registry.
//!
//! The single shared mutable structure in the runtime: a chat-id-keyed map of
//! live sessions. Every mutation goes through its lock, which is what makes
//! the one-session-per-chat invariant hold under concurrent dispatch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::chat_id::ChatId;
use crate::session::Session;

/// Chat-id → session map with atomic create-on-first-sight.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<ChatId, Arc<Session>>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session for `chat_id`, creating it with `create` if this
    /// chat has not been seen. The boolean is `true` for exactly one caller
    /// per created session. Construction runs under the registry lock, so it
    /// must stay cheap and non-blocking.
    pub fn get_or_create<F>(&self, chat_id: &ChatId, create: F) -> (Arc<Session>, bool)
    where
        F: FnOnce() -> Arc<Session>,
    {
        let mut sessions = self.lock();
        if let Some(existing) = sessions.get(chat_id) {
            return (Arc::clone(existing), false);
        }
        let session = create();
        sessions.insert(chat_id.clone(), Arc::clone(&session));
        (session, true)
    }

    /// Removes and returns the session for `chat_id`, if present.
    pub fn remove(&self, chat_id: &ChatId) -> Option<Arc<Session>> {
        self.lock().remove(chat_id)
    }

    /// Removes `chat_id` only while it still maps to `session`. Keeps a
    /// concurrently re-created session from being evicted by a stale remover.
    pub fn remove_if_same(&self, chat_id: &ChatId, session: &Arc<Session>) -> bool {
        let mut sessions = self.lock();
        match sessions.get(chat_id) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(chat_id);
                true
            }
            _ => false,
        }
    }

    /// Every live session, for shutdown. Includes everything whose
    /// `get_or_create` completed before this call.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.lock().values().cloned().collect()
    }

    /// Drops every entry. Shutdown-only.
    pub fn clear(&self) {
        self.lock().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ChatId, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
