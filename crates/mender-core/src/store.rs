//! In-memory session store
//!
//! Each session lives behind its own [`SessionHandle`]; the driving task is
//! the only writer, readers take snapshots. Status changes are broadcast on a
//! watch channel so `wait` never polls.

use crate::session::{Session, SessionId};
use crate::state_machine::SessionStatus;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Shared handle to one session
#[derive(Debug)]
pub struct SessionHandle {
    session: RwLock<Session>,
    cancel: CancellationToken,
    status_tx: watch::Sender<SessionStatus>,
}

impl SessionHandle {
    pub(crate) fn new(session: Session) -> Self {
        let (status_tx, _) = watch::channel(session.status);
        Self {
            session: RwLock::new(session),
            cancel: CancellationToken::new(),
            status_tx,
        }
    }

    /// Session id
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.session.read().id
    }

    /// Consistent copy of the session
    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.session.read().clone()
    }

    /// Read through a closure without cloning
    pub fn read<R>(&self, f: impl FnOnce(&Session) -> R) -> R {
        f(&self.session.read())
    }

    /// Mutate under the write lock; publishes the status if it changed.
    /// Never call across an await point.
    pub(crate) fn mutate<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let (result, status) = {
            let mut session = self.session.write();
            let before = session.status;
            let result = f(&mut session);
            (result, (session.status != before).then_some(session.status))
        };
        if let Some(status) = status {
            self.status_tx.send_replace(status);
        }
        result
    }

    /// Current status
    #[inline]
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        *self.status_tx.borrow()
    }

    /// Receiver for status changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Token that stops the session at its next check
    #[inline]
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Concurrent map of sessions
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
}

impl SessionStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session and return its handle
    pub fn insert(&self, session: Session) -> Arc<SessionHandle> {
        let id = session.id;
        let handle = Arc::new(SessionHandle::new(session));
        self.sessions.insert(id, Arc::clone(&handle));
        handle
    }

    /// Handle by id
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// All ids, oldest first
    #[must_use]
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    /// Drop a session; returns its handle if it existed
    pub fn remove(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.remove(&id).map(|(_, handle)| handle)
    }

    /// Number of sessions
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mender_sandbox::Language;

    fn session() -> Session {
        Session::new("print(1)\n", Language::Python, 2).unwrap()
    }

    #[test]
    fn test_insert_get_remove() {
        let store = SessionStore::new();
        let handle = store.insert(session());
        let id = handle.id();
        assert_eq!(store.len(), 1);
        assert!(store.get(id).is_some());
        assert_eq!(store.ids(), vec![id]);
        assert!(store.remove(id).is_some());
        assert!(store.is_empty());
        assert!(store.get(id).is_none());
    }

    #[test]
    fn test_mutate_publishes_status_changes() {
        let store = SessionStore::new();
        let handle = store.insert(session());
        let mut rx = handle.subscribe();
        assert!(!rx.has_changed().unwrap());

        handle.mutate(|s| s.current_iteration = 1);
        assert!(!rx.has_changed().unwrap());

        handle.mutate(|s| s.transition(SessionStatus::Failed)).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), SessionStatus::Failed);
        assert_eq!(handle.status(), SessionStatus::Failed);
        assert_eq!(handle.snapshot().status, SessionStatus::Failed);
    }
}
