//! Reader side of a session.

use super::SessionContext;
use crate::hub::{CloseReason, SessionHandle};
use futures_util::{Stream, StreamExt};
use parley_core::{decode_inbound, Envelope};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

/// Read frames until the peer goes away, the idle deadline passes, or the
/// session is closed from elsewhere.
pub(super) async fn run<S>(mut stream: S, handle: &SessionHandle, ctx: &SessionContext) -> CloseReason
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let idle = ctx.settings.idle_timeout;
    loop {
        let next = tokio::select! {
            biased;
            _ = handle.closed() => {
                return handle.close_reason().unwrap_or(CloseReason::PeerClosed);
            }
            _ = ctx.shutdown.cancelled() => return CloseReason::Shutdown,
            next = tokio::time::timeout(idle, stream.next()) => next,
        };

        let message = match next {
            Err(_) => {
                info!(user = %handle.user(), session = %handle.id(), "idle timeout");
                return CloseReason::IdleTimeout;
            }
            Ok(None) => return CloseReason::PeerClosed,
            Ok(Some(Err(e))) => {
                debug!(session = %handle.id(), error = %e, "read failed");
                return CloseReason::TransportError;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => accept(text.as_bytes(), handle, ctx).await,
            Message::Binary(data) => accept(&data, handle, ctx).await,
            Message::Close(_) => return CloseReason::PeerClosed,
            // Pings are answered by tungstenite; pongs only reset the deadline.
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }
}

/// Decode, stamp, persist and route one client frame.
async fn accept(raw: &[u8], handle: &SessionHandle, ctx: &SessionContext) {
    let frame = match decode_inbound(raw) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(session = %handle.id(), error = %e, "dropping malformed frame");
            return;
        }
    };

    let envelope = Envelope::stamp(frame, handle.user());
    if let Err(e) = ctx.persister.create(&envelope).await {
        warn!(id = %envelope.id, error = %e, "failed to persist message");
    }
    ctx.hub.route(envelope).await;
}
