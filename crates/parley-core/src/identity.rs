//! User and session identities.
//!
//! A [`UserId`] is the authenticated identity bound to a connection at
//! handshake time. A [`SessionId`] distinguishes successive connections made
//! by the same user, so a stale connection can never remove its replacement.

use crate::error::{ParleyError, ParleyResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Opaque user identifier (a UUID on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    /// Wrap an existing UUID.
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a fresh random identity.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Whether this is the all-zero UUID, which never names a real user.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Parse a textual UUID, rejecting the nil identity.
    pub fn parse(s: &str) -> ParleyResult<Self> {
        let id = Uuid::parse_str(s.trim())
            .map_err(|e| ParleyError::InvalidFrame(format!("invalid user id {s:?}: {e}")))?;
        if id.is_nil() {
            return Err(ParleyError::InvalidFrame("nil user id".into()));
        }
        Ok(Self(id))
    }
}

impl FromStr for UserId {
    type Err = ParleyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Server-unique identifier of one physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

impl SessionId {
    /// Allocate the next session id. Ids are never reused within a process.
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}
