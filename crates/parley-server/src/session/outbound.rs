//! Writer side of a session.

use super::SessionSettings;
use crate::hub::{CloseReason, SessionHandle};
use futures_util::{Sink, SinkExt};
use parley_core::{encode_outbound, Envelope};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, warn};

/// Write queued envelopes and keepalive pings until the session closes.
pub(super) async fn run<S>(
    mut sink: S,
    mut queue: mpsc::Receiver<Envelope>,
    handle: Arc<SessionHandle>,
    settings: SessionSettings,
) where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let period = settings.ping_interval;
    let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let message = tokio::select! {
            biased;
            _ = handle.closed() => break,
            next = queue.recv() => match next {
                Some(envelope) => match encode_outbound(&envelope) {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        warn!(id = %envelope.id, error = %e, "failed to encode envelope");
                        continue;
                    }
                },
                None => break,
            },
            _ = keepalive.tick() => Message::Ping(Vec::new()),
        };

        if let Err(e) = write(&mut sink, message, settings.write_timeout).await {
            debug!(session = %handle.id(), error = %e, "write failed");
            handle.close(CloseReason::TransportError);
            break;
        }
    }

    let reason = handle.close_reason();
    if reason == Some(CloseReason::TransportError) {
        return;
    }
    if let Some(frame) = reason.and_then(close_frame) {
        let _ = write(&mut sink, Message::Close(Some(frame)), settings.write_timeout).await;
    }
    let _ = tokio::time::timeout(settings.write_timeout, sink.close()).await;
}

async fn write<S>(sink: &mut S, message: Message, deadline: Duration) -> Result<(), WsError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    match tokio::time::timeout(deadline, sink.send(message)).await {
        Ok(result) => result,
        Err(_) => Err(WsError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "write deadline exceeded",
        ))),
    }
}

/// Close frame sent to the peer for a server-side close.
///
/// `None` when the peer initiated the close (tungstenite replies itself) or
/// the transport is already broken.
fn close_frame(reason: CloseReason) -> Option<CloseFrame<'static>> {
    let code = match reason {
        CloseReason::Shutdown => CloseCode::Away,
        CloseReason::Replaced | CloseReason::SlowConsumer => CloseCode::Policy,
        CloseReason::IdleTimeout => CloseCode::Normal,
        CloseReason::PeerClosed | CloseReason::TransportError => return None,
    };
    Some(CloseFrame {
        code,
        reason: reason.as_str().into(),
    })
}
