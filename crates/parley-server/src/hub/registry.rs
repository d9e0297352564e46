//! Identity -> session registry.
//!
//! Holds at most one session per identity. Lookups take a read lock and may
//! run concurrently; mutation is `pub(crate)` and only ever performed by the
//! hub's coordinator task, one operation per lock acquisition.

use super::handle::SessionHandle;
use parley_core::UserId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Registry of currently reachable users.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: RwLock<HashMap<UserId, Arc<SessionHandle>>>,
}

impl Registry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `handle` under its user, returning the session it displaced.
    pub(crate) async fn insert(&self, handle: Arc<SessionHandle>) -> Option<Arc<SessionHandle>> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(handle.user(), handle)
    }

    /// Remove the entry for `handle`'s user only if it is this exact session.
    pub(crate) async fn remove_if_current(&self, handle: &SessionHandle) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(&handle.user()) {
            Some(current) if current.id() == handle.id() => {
                sessions.remove(&handle.user());
                true
            }
            Some(current) => {
                debug!(
                    user = %handle.user(),
                    stale = %handle.id(),
                    current = %current.id(),
                    "skipping removal of superseded session"
                );
                false
            }
            None => false,
        }
    }

    /// Remove every entry, returning the removed sessions.
    pub(crate) async fn drain(&self) -> Vec<Arc<SessionHandle>> {
        let mut sessions = self.sessions.write().await;
        sessions.drain().map(|(_, handle)| handle).collect()
    }

    /// Look up the live session for `user`.
    pub async fn get(&self, user: &UserId) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(user).cloned()
    }

    pub async fn contains(&self, user: &UserId) -> bool {
        self.sessions.read().await.contains_key(user)
    }

    /// Users with a registered session.
    pub async fn users(&self) -> Vec<UserId> {
        self.sessions.read().await.keys().copied().collect()
    }

    /// Number of registered sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
