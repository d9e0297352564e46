//! Per-connection session: an inbound reader and an outbound writer around
//! one [`SessionHandle`].
//!
//! The inbound loop runs on the connection task; the outbound loop is
//! spawned. Whichever side stops first closes the handle, which wakes the
//! other. Unregistration happens once, after the inbound side returns.

mod inbound;
mod outbound;

use crate::hub::{CloseReason, HubHandle, SessionHandle};
use crate::persist::Persister;
use crate::transport::WsStream;
use futures_util::StreamExt;
use parley_core::UserId;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Timing and queue limits applied to every session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Capacity of the outbound queue before the session is evicted.
    pub queue_capacity: usize,
    /// Read deadline, reset by every received frame.
    pub idle_timeout: Duration,
    /// Keepalive ping period. Must be shorter than `idle_timeout`.
    pub ping_interval: Duration,
    /// Deadline for a single outbound write.
    pub write_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            idle_timeout: Duration::from_secs(60),
            ping_interval: Duration::from_secs(54),
            write_timeout: Duration::from_secs(10),
        }
    }
}

/// Shared collaborators for all sessions of one server.
pub struct SessionContext {
    pub hub: HubHandle,
    pub persister: Arc<dyn Persister>,
    pub settings: SessionSettings,
    /// Cancelled when the server begins shutting down.
    pub shutdown: CancellationToken,
}

/// Drive one authenticated connection until it ends.
///
/// Returns the reason the session closed.
pub async fn run(ws: WsStream, user: UserId, ctx: Arc<SessionContext>) -> CloseReason {
    let (handle, queue) = SessionHandle::new(user, ctx.settings.queue_capacity);
    let session = handle.id();

    if let Err(e) = ctx.hub.register(handle.clone()).await {
        warn!(user = %user, session = %session, error = %e, "could not register session");
        handle.close(CloseReason::Shutdown);
    }
    info!(user = %user, session = %session, "session opened");

    let (sink, stream) = ws.split();
    let writer = tokio::spawn(outbound::run(
        sink,
        queue,
        handle.clone(),
        ctx.settings.clone(),
    ));

    let reason = inbound::run(stream, &handle, &ctx).await;
    handle.close(reason);
    ctx.hub.unregister(handle.clone()).await;

    if let Err(e) = writer.await {
        warn!(session = %session, error = %e, "outbound task failed");
    }

    let reason = handle.close_reason().unwrap_or(reason);
    info!(user = %user, session = %session, reason = reason.as_str(), "session closed");
    reason
}
