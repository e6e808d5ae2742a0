//! Session registry: id allocation plus a reader/writer-locked map. Listing
//! operations copy out under the read lock and return before the caller does
//! any further work, so a slow consumer never holds the lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::session::{Session, SessionId};

pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn allocate_id(&self) -> SessionId {
        let raw = self.next_id.fetch_add(1, Ordering::Relaxed);
        SessionId::from_raw(raw)
    }

    pub fn insert(&self, session: Arc<Session>) {
        self.sessions.write().insert(session.id, session);
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.read().get(&id).cloned()
    }

    pub fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.write().remove(&id)
    }

    /// Defensive copy of every live session, safe to iterate without the lock held.
    pub fn list(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Empty `owner` means authentication is disabled upstream: every
    /// session is visible, matching `ListByOwner("") == List()`.
    pub fn list_by_owner(&self, owner: &str) -> Vec<Arc<Session>> {
        if owner.is_empty() {
            return self.list();
        }
        self.sessions
            .read()
            .values()
            .filter(|s| s.owner == owner)
            .cloned()
            .collect()
    }

    /// Sessions whose allocated TTY path is non-empty, for the tmux attachment poll.
    pub fn list_with_tty(&self) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .values()
            .filter(|s| !s.tty_path().is_empty())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
