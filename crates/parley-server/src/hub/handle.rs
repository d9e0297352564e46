//! The hub's view of one live session: identity plus outbound queue.

use parley_core::{Envelope, SessionId, UserId};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Why a session was torn down. Recorded once, by whichever actor closes
/// the session first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client closed the connection or the stream ended.
    PeerClosed,
    /// No frame or keepalive response within the idle deadline.
    IdleTimeout,
    /// A read or write failed or exceeded its deadline.
    TransportError,
    /// A newer connection registered under the same identity.
    Replaced,
    /// The outbound queue overflowed.
    SlowConsumer,
    /// The server is shutting down.
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::PeerClosed => "peer closed",
            CloseReason::IdleTimeout => "idle timeout",
            CloseReason::TransportError => "transport error",
            CloseReason::Replaced => "replaced by newer connection",
            CloseReason::SlowConsumer => "slow consumer",
            CloseReason::Shutdown => "server shutdown",
        }
    }
}

/// Outcome of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The bounded queue is at capacity.
    Full,
    /// The session is already closed.
    Closed,
}

/// Shared handle to a live session.
///
/// Held by the registry and by the session's own loops. Closing is
/// idempotent: only the first [`close`](Self::close) records a reason and
/// wakes the loops; later calls return `false`.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    user: UserId,
    outbound: mpsc::Sender<Envelope>,
    reason: OnceLock<CloseReason>,
    closed: CancellationToken,
}

impl SessionHandle {
    /// Create a handle with a bounded outbound queue of `capacity` envelopes.
    /// The receiver is owned by the session's outbound loop.
    pub fn new(user: UserId, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: SessionId::next(),
            user,
            outbound: tx,
            reason: OnceLock::new(),
            closed: CancellationToken::new(),
        };
        (Arc::new(handle), rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    /// Enqueue without waiting.
    pub fn try_enqueue(&self, envelope: Envelope) -> Result<(), EnqueueError> {
        if self.is_closed() {
            return Err(EnqueueError::Closed);
        }
        self.outbound.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Close the session. Returns `true` only for the call that actually
    /// closed it.
    pub fn close(&self, reason: CloseReason) -> bool {
        if self.reason.set(reason).is_err() {
            return false;
        }
        self.closed.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.reason.get().is_some()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.reason.get().copied()
    }

    /// Resolves once the session has been closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Number of envelopes currently waiting in the outbound queue.
    pub fn queued(&self) -> usize {
        self.outbound.max_capacity() - self.outbound.capacity()
    }
}
